//! Anthropic Messages API adapter: request shaping and SSE event decoding.

use serde_json::{json, Value};

use super::models::{CallResponse, ChatMessage, ContentBlock, LlmError, StreamEvent, ToolSpec, Usage};

pub const API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const API_VERSION: &str = "2023-06-01";

pub fn build_body(
    model: &str,
    system: &str,
    messages: &[ChatMessage],
    max_tokens: u32,
    tools: Option<&[ToolSpec]>,
    stream: bool,
) -> Value {
    let msgs: Vec<Value> = messages
        .iter()
        .map(|m| json!({"role": m.role, "content": blocks_to_value(&m.content)}))
        .collect();

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "system": system,
        "messages": msgs,
    });
    if let Some(tools) = tools {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect(),
        );
    }
    if stream {
        body["stream"] = Value::Bool(true);
    }
    body
}

fn blocks_to_value(blocks: &[ContentBlock]) -> Value {
    Value::Array(
        blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                ContentBlock::ToolUse { id, name, input } => {
                    json!({"type": "tool_use", "id": id, "name": name, "input": input})
                }
                ContentBlock::ToolResult { tool_use_id, content } => {
                    json!({"type": "tool_result", "tool_use_id": tool_use_id, "content": content})
                }
            })
            .collect(),
    )
}

pub fn parse_call_response(body: &Value) -> Result<CallResponse, LlmError> {
    let mut content = Vec::new();
    for block in body["content"].as_array().into_iter().flatten() {
        match block["type"].as_str() {
            Some("text") => content.push(ContentBlock::Text {
                text: block["text"].as_str().unwrap_or_default().to_string(),
            }),
            Some("tool_use") => content.push(ContentBlock::ToolUse {
                id: block["id"].as_str().unwrap_or_default().to_string(),
                name: block["name"].as_str().unwrap_or_default().to_string(),
                input: block["input"].clone(),
            }),
            _ => {}
        }
    }
    if content.is_empty() {
        return Err(LlmError::ParseError("Empty response from LLM".to_string()));
    }
    Ok(CallResponse {
        content,
        usage: Usage {
            input_tokens: body["usage"]["input_tokens"].as_i64().unwrap_or(0),
            output_tokens: body["usage"]["output_tokens"].as_i64().unwrap_or(0),
        },
        stop_reason: body["stop_reason"].as_str().map(String::from),
    })
}

/// Incremental decoder for the Anthropic SSE event stream.
///
/// Tool arguments arrive as `input_json_delta` fragments; they are
/// accumulated until the containing block closes and JSON-decoded then,
/// falling back to a `_raw` record if the accumulated text does not parse.
#[derive(Default)]
pub struct StreamDecoder {
    usage: Usage,
    stop_reason: Option<String>,
    tool_id: Option<String>,
    tool_name: Option<String>,
    tool_input_json: String,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Decode one SSE `data:` payload into zero or more gateway events.
    pub fn decode(&mut self, data: &Value) -> Result<Vec<StreamEvent>, LlmError> {
        let mut events = Vec::new();
        match data["type"].as_str() {
            Some("message_start") => {
                self.usage.input_tokens =
                    data["message"]["usage"]["input_tokens"].as_i64().unwrap_or(0);
            }
            Some("content_block_start") => {
                let block = &data["content_block"];
                match block["type"].as_str() {
                    Some("text") => {
                        if let Some(text) = block["text"].as_str() {
                            if !text.is_empty() {
                                events.push(StreamEvent::Chunk { text: text.to_string() });
                            }
                        }
                    }
                    Some("tool_use") => {
                        let id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        self.tool_id = Some(id.clone());
                        self.tool_name = Some(name.clone());
                        self.tool_input_json.clear();
                        events.push(StreamEvent::ToolUseStart { id, name });
                    }
                    _ => {}
                }
            }
            Some("content_block_delta") => match data["delta"]["type"].as_str() {
                Some("text_delta") => {
                    if let Some(text) = data["delta"]["text"].as_str() {
                        events.push(StreamEvent::Chunk { text: text.to_string() });
                    }
                }
                Some("input_json_delta") => {
                    if let Some(part) = data["delta"]["partial_json"].as_str() {
                        self.tool_input_json.push_str(part);
                    }
                }
                _ => {}
            },
            Some("content_block_stop") => {
                if let (Some(id), Some(name)) = (self.tool_id.take(), self.tool_name.take()) {
                    let raw = std::mem::take(&mut self.tool_input_json);
                    let input = if raw.is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&raw).unwrap_or_else(|_| json!({"_raw": raw}))
                    };
                    events.push(StreamEvent::ToolUse { id, name, input });
                }
            }
            Some("message_delta") => {
                if let Some(reason) = data["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(out) = data["usage"]["output_tokens"].as_i64() {
                    self.usage.output_tokens = out;
                }
            }
            Some("message_stop") => {
                self.finished = true;
                events.push(StreamEvent::end(self.usage, self.stop_reason.clone()));
            }
            Some("error") => {
                let message = data["error"]["message"].as_str().unwrap_or("unknown").to_string();
                return Err(LlmError::Transport(message));
            }
            _ => {}
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_and_tool_use_stream() {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();

        for data in [
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 12}}}),
            json!({"type": "content_block_start", "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hel"}}),
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "lo"}}),
            json!({"type": "content_block_stop"}),
            json!({"type": "content_block_start", "content_block": {"type": "tool_use", "id": "tu_1", "name": "lookup"}}),
            json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}}),
            json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "\"x\"}"}}),
            json!({"type": "content_block_stop"}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 9}}),
            json!({"type": "message_stop"}),
        ] {
            events.extend(decoder.decode(&data).unwrap());
        }

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");

        let tool = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolUse { name, input, .. } => Some((name.clone(), input.clone())),
                _ => None,
            })
            .expect("tool_use event");
        assert_eq!(tool.0, "lookup");
        assert_eq!(tool.1["q"], "x");

        match events.last().unwrap() {
            StreamEvent::End { usage, stop_reason, .. } => {
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 9);
                assert_eq!(stop_reason.as_deref(), Some("tool_use"));
            }
            _ => panic!("missing end event"),
        }
    }

    #[test]
    fn unparseable_tool_args_fall_back_to_raw() {
        let mut decoder = StreamDecoder::new();
        decoder
            .decode(&json!({"type": "content_block_start", "content_block": {"type": "tool_use", "id": "t", "name": "n"}}))
            .unwrap();
        decoder
            .decode(&json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "{\"broken\": "}}))
            .unwrap();
        let events = decoder.decode(&json!({"type": "content_block_stop"})).unwrap();
        match &events[0] {
            StreamEvent::ToolUse { input, .. } => {
                assert!(input["_raw"].as_str().unwrap().contains("broken"));
            }
            _ => panic!("expected tool_use"),
        }
    }
}
