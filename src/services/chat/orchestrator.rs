//! Chat orchestrator — the multi-round loop tying LLM streaming, tool
//! execution, and the progress channel together.
//!
//! Each round streams the assistant turn, forwarding text as `chat_chunk`
//! and tool detection as `tool_preparing`; accumulated tool calls execute
//! through the registry between `tool_start`/`tool_end` events, and their
//! results feed the next round. Persistence uses three separate sessions:
//! load history, run the LLM, persist results.

use serde_json::json;
use std::sync::Arc;

use crate::config::ChatConfig;
use crate::services::llm::{
    ChatMessage, ContentBlock, LlmGateway, LlmRequest, StreamEvent, Usage,
};
use crate::services::progress::ProgressHub;
use crate::services::tools::{ToolContext, ToolRegistry};
use crate::utils::{first_line, CancelToken};

use super::prompts::build_system_prompt;
use super::store::ChatStore;

pub struct ChatService {
    store: ChatStore,
    gateway: LlmGateway,
    tools: Arc<ToolRegistry>,
    hub: Arc<ProgressHub>,
    config: ChatConfig,
}

pub struct ChatRequest {
    pub conversation_id: Option<String>,
    pub request_id: String,
    pub connection_id: String,
    pub message: String,
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl ChatService {
    pub fn new(
        store: ChatStore,
        gateway: LlmGateway,
        tools: Arc<ToolRegistry>,
        hub: Arc<ProgressHub>,
        config: ChatConfig,
    ) -> Self {
        Self { store, gateway, tools, hub, config }
    }

    /// Run one chat request end to end. Cancellation is observed between
    /// streamed chunks and between tool-call rounds; `chat_end` is emitted
    /// immediately on cancel so the UI never waits on persistence.
    pub async fn run(
        &self,
        ctx: ToolContext,
        request: ChatRequest,
        cancel: Arc<CancelToken>,
    ) -> anyhow::Result<()> {
        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| self.gateway.default_provider().to_string());
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.gateway.default_model().to_string());
        let connection_id = request.connection_id.clone();
        let send = |message: serde_json::Value| {
            self.hub.send_to_connection(&connection_id, &message);
        };

        // Session 1: conversation + history.
        let conversation_id = self
            .store
            .ensure_conversation(
                request.conversation_id.as_deref(),
                ctx.user_id,
                &ctx.org_id,
                &request.message,
            )
            .await?;
        let mut messages = self
            .store
            .load_history(&conversation_id, self.config.history_window)
            .await?;
        let user_blocks = vec![ContentBlock::text(request.message.clone())];
        messages.push(ChatMessage { role: "user".to_string(), content: user_blocks.clone() });

        // Tooling for this caller.
        let permitted = self.tools.permitted_tools(&ctx).await;
        let tool_specs: Vec<_> = permitted.iter().map(|t| t.to_spec()).collect();
        let tool_names: Vec<String> = permitted.iter().map(|t| t.name.clone()).collect();
        let system = build_system_prompt(&ctx.org_id, &tool_names);

        let mut all_text = String::new();
        let mut total_usage = Usage::default();
        let mut assistant_turns: Vec<Vec<ContentBlock>> = Vec::new();
        let mut tool_result_turns: Vec<Vec<ContentBlock>> = Vec::new();
        let mut cancelled = false;

        // No persistence session is open anywhere in this loop.
        for round in 0..=self.config.max_tool_rounds {
            tracing::info!(
                "Chat round {}/{} (provider={}, model={})",
                round + 1,
                self.config.max_tool_rounds + 1,
                provider,
                model
            );

            let mut llm_request = LlmRequest::new(
                &provider,
                &model,
                system.clone(),
                messages.clone(),
                self.config.max_output_tokens,
            );
            if !tool_specs.is_empty() {
                llm_request = llm_request.with_tools(tool_specs.clone());
            }

            let mut rx = self.gateway.stream(llm_request, Some(Arc::clone(&cancel))).await?;
            let mut round_text = String::new();
            let mut round_tools: Vec<(String, String, serde_json::Value)> = Vec::new();

            while let Some(event) = rx.recv().await {
                match event? {
                    StreamEvent::Chunk { text } => {
                        round_text.push_str(&text);
                        send(json!({
                            "type": "chat_chunk",
                            "conversation_id": conversation_id,
                            "request_id": request.request_id,
                            "text": text,
                        }));
                    }
                    StreamEvent::ToolUseStart { id, name } => {
                        let display = self
                            .tools
                            .get(&name)
                            .map(|t| t.display())
                            .unwrap_or_else(|| format!("Running {}...", name));
                        send(json!({
                            "type": "tool_preparing",
                            "conversation_id": conversation_id,
                            "tool_id": id,
                            "tool_name": name,
                            "display": display,
                        }));
                    }
                    StreamEvent::ToolUse { id, name, input } => {
                        round_tools.push((id, name, input));
                    }
                    StreamEvent::End { usage, stop_reason, .. } => {
                        total_usage.add(usage);
                        if stop_reason.as_deref() == Some("cancelled") {
                            cancelled = true;
                        }
                    }
                }
            }

            all_text.push_str(&round_text);
            if cancelled || round_tools.is_empty() {
                if !round_text.is_empty() {
                    assistant_turns.push(vec![ContentBlock::text(round_text)]);
                }
                break;
            }

            // Assistant turn carrying text plus tool_use blocks.
            let mut assistant_content = Vec::new();
            if !round_text.is_empty() {
                assistant_content.push(ContentBlock::text(round_text));
            }
            for (id, name, input) in &round_tools {
                assistant_content.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
            }
            messages.push(ChatMessage::assistant(assistant_content.clone()));
            assistant_turns.push(assistant_content);

            // Execute tools; a cancel between tools ends the round early.
            let mut results = Vec::new();
            for (id, name, input) in round_tools {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let display = self
                    .tools
                    .get(&name)
                    .map(|t| t.display())
                    .unwrap_or_else(|| format!("Running {}...", name));
                send(json!({
                    "type": "tool_start",
                    "conversation_id": conversation_id,
                    "tool_id": id,
                    "tool_name": name,
                    "display": display,
                }));

                let result = self.tools.execute(&name, &ctx, input).await;
                send(json!({
                    "type": "tool_end",
                    "conversation_id": conversation_id,
                    "tool_id": id,
                    "tool_name": name,
                    "summary": first_line(&result),
                }));
                results.push(ContentBlock::ToolResult { tool_use_id: id, content: result });
            }
            if cancelled {
                break;
            }

            // One user message carries all of the round's tool results.
            messages.push(ChatMessage { role: "user".to_string(), content: results.clone() });
            tool_result_turns.push(results);
        }

        // chat_end goes out before any persistence session opens.
        send(json!({
            "type": "chat_end",
            "conversation_id": conversation_id,
            "request_id": request.request_id,
            "cancelled": cancelled,
            "usage": {
                "input_tokens": total_usage.input_tokens,
                "output_tokens": total_usage.output_tokens,
            },
        }));

        // Session 2 onwards: persist the exchange.
        self.store
            .append_message(&conversation_id, "user", &user_blocks, None, None)
            .await?;
        let turn_count = assistant_turns.len();
        for (i, content) in assistant_turns.into_iter().enumerate() {
            let (input_tokens, output_tokens) = if i + 1 == turn_count {
                (Some(total_usage.input_tokens), Some(total_usage.output_tokens))
            } else {
                (None, None)
            };
            self.store
                .append_message(&conversation_id, "assistant", &content, input_tokens, output_tokens)
                .await?;
        }
        for content in tool_result_turns {
            self.store
                .append_message(&conversation_id, "user", &content, None, None)
                .await?;
        }

        Ok(())
    }
}
