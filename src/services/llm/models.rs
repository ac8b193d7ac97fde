//! LLM gateway data model: messages, content blocks, neutral tool specs,
//! stream events, and the gateway error type.

use serde::{Deserialize, Serialize};

/// One conversation message in provider-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: vec![ContentBlock::text(text)] }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self { role: "assistant".to_string(), content }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Provider-neutral content block. Mirrors the Anthropic block shapes and is
/// converted for OpenAI at the adapter boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, content: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Neutral tool definition; adapters translate into `input_schema`
/// (Anthropic) or `function.parameters` (OpenAI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One streamed gateway event.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text delta.
    Chunk { text: String },
    /// A tool call was detected; parameters are still streaming.
    ToolUseStart { id: String, name: String },
    /// Tool call complete with parsed arguments. On JSON parse failure the
    /// raw accumulated string is preserved under `_raw`.
    ToolUse { id: String, name: String, input: serde_json::Value },
    /// Terminal event with usage counters and stop reason.
    End { usage: Usage, stop_reason: Option<String>, warning: Option<String> },
}

impl StreamEvent {
    pub fn end(usage: Usage, stop_reason: Option<String>) -> Self {
        let warning = match stop_reason.as_deref() {
            Some("max_tokens") | Some("length") => Some("Response was truncated".to_string()),
            _ => None,
        };
        Self::End { usage, stop_reason, warning }
    }
}

/// Full (non-streamed) response.
#[derive(Debug, Clone, Default)]
pub struct CallResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    pub stop_reason: Option<String>,
}

impl CallResponse {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_uses(&self) -> Vec<(String, String, serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

/// One gateway request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub provider: String,
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub tools: Option<Vec<ToolSpec>>,
}

impl LlmRequest {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        system: impl Into<String>,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            system: system.into(),
            messages,
            max_tokens,
            tools: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider '{0}' is not configured (missing API key)")]
    NotConfigured(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("LLM API error (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    #[error("LLM request failed: {0}")]
    Transport(String),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_serde_shape() {
        let block = ContentBlock::ToolUse {
            id: "tu_1".into(),
            name: "list_contexts".into(),
            input: serde_json::json!({"org_id": "42"}),
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["name"], "list_contexts");

        let back: ContentBlock = serde_json::from_value(v).unwrap();
        match back {
            ContentBlock::ToolUse { name, .. } => assert_eq!(name, "list_contexts"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(LlmError::Http { status: 500, message: String::new() }.is_retryable());
        assert!(LlmError::Http { status: 429, message: String::new() }.is_retryable());
        assert!(!LlmError::Http { status: 401, message: String::new() }.is_retryable());
        assert!(!LlmError::ParseError("x".into()).is_retryable());
    }

    #[test]
    fn truncation_warning_on_end_event() {
        match StreamEvent::end(Usage::default(), Some("max_tokens".into())) {
            StreamEvent::End { warning, .. } => assert!(warning.is_some()),
            _ => panic!("wrong variant"),
        }
        match StreamEvent::end(Usage::default(), Some("end_turn".into())) {
            StreamEvent::End { warning, .. } => assert!(warning.is_none()),
            _ => panic!("wrong variant"),
        }
    }
}
