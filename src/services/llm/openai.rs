//! OpenAI Chat Completions adapter: message/tool conversion and streamed
//! chunk decoding.

use serde_json::{json, Value};

use super::models::{CallResponse, ChatMessage, ContentBlock, LlmError, StreamEvent, ToolSpec, Usage};

pub const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub fn build_body(
    model: &str,
    system: &str,
    messages: &[ChatMessage],
    max_tokens: u32,
    tools: Option<&[ToolSpec]>,
    stream: bool,
) -> Value {
    let mut msgs: Vec<Value> = vec![json!({"role": "system", "content": system})];
    for m in messages {
        msgs.extend(convert_message(m));
    }

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": msgs,
    });
    if let Some(tools) = tools {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    })
                })
                .collect(),
        );
    }
    if stream {
        body["stream"] = Value::Bool(true);
        body["stream_options"] = json!({"include_usage": true});
    }
    body
}

/// Neutral blocks -> OpenAI message list. Assistant tool_use blocks become
/// `tool_calls`; tool results become separate `role: tool` messages.
fn convert_message(m: &ChatMessage) -> Vec<Value> {
    let text = m.text();
    let tool_uses: Vec<&ContentBlock> = m
        .content
        .iter()
        .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
        .collect();
    let tool_results: Vec<&ContentBlock> = m
        .content
        .iter()
        .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
        .collect();

    if !tool_results.is_empty() {
        return tool_results
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, content } => Some(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                })),
                _ => None,
            })
            .collect();
    }

    if !tool_uses.is_empty() {
        let calls: Vec<Value> = tool_uses
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": input.to_string(),
                    },
                })),
                _ => None,
            })
            .collect();
        let mut msg = json!({"role": m.role, "tool_calls": calls});
        if !text.is_empty() {
            msg["content"] = Value::String(text);
        } else {
            msg["content"] = Value::Null;
        }
        return vec![msg];
    }

    vec![json!({"role": m.role, "content": text})]
}

pub fn parse_call_response(body: &Value) -> Result<CallResponse, LlmError> {
    let choice = body["choices"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice["message"]["content"].as_str() {
        if !text.is_empty() {
            content.push(ContentBlock::Text { text: text.to_string() });
        }
    }
    for tc in choice["message"]["tool_calls"].as_array().into_iter().flatten() {
        let args = tc["function"]["arguments"].as_str().unwrap_or("");
        let input = if args.is_empty() {
            json!({})
        } else {
            serde_json::from_str(args).unwrap_or_else(|_| json!({"_raw": args}))
        };
        content.push(ContentBlock::ToolUse {
            id: tc["id"].as_str().unwrap_or_default().to_string(),
            name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
            input,
        });
    }
    if content.is_empty() {
        return Err(LlmError::ParseError("Empty response from LLM".to_string()));
    }

    Ok(CallResponse {
        content,
        usage: Usage {
            input_tokens: body["usage"]["prompt_tokens"].as_i64().unwrap_or(0),
            output_tokens: body["usage"]["completion_tokens"].as_i64().unwrap_or(0),
        },
        stop_reason: choice["finish_reason"].as_str().map(map_finish_reason),
    })
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "length" => "max_tokens".to_string(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct ToolCallAcc {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

/// Incremental decoder for OpenAI streamed chunks. Tool calls accumulate
/// across deltas keyed by index and are emitted when the stream finishes.
#[derive(Default)]
pub struct StreamDecoder {
    usage: Usage,
    finish_reason: Option<String>,
    tool_calls: Vec<(u64, ToolCallAcc)>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn decode(&mut self, data: &Value) -> Result<Vec<StreamEvent>, LlmError> {
        let mut events = Vec::new();

        if let Some(usage) = data.get("usage").filter(|u| !u.is_null()) {
            self.usage.input_tokens = usage["prompt_tokens"].as_i64().unwrap_or(0);
            self.usage.output_tokens = usage["completion_tokens"].as_i64().unwrap_or(0);
        }

        if let Some(choice) = data["choices"].as_array().and_then(|c| c.first()) {
            let delta = &choice["delta"];
            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    events.push(StreamEvent::Chunk { text: text.to_string() });
                }
            }

            for tc in delta["tool_calls"].as_array().into_iter().flatten() {
                let idx = tc["index"].as_u64().unwrap_or(0);
                let acc = match self.tool_calls.iter_mut().find(|(i, _)| *i == idx) {
                    Some((_, acc)) => acc,
                    None => {
                        self.tool_calls.push((idx, ToolCallAcc::default()));
                        &mut self.tool_calls.last_mut().unwrap().1
                    }
                };
                if let Some(id) = tc["id"].as_str() {
                    acc.id = id.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    if !name.is_empty() {
                        acc.name = name.to_string();
                        if !acc.announced {
                            acc.announced = true;
                            events.push(StreamEvent::ToolUseStart {
                                id: acc.id.clone(),
                                name: acc.name.clone(),
                            });
                        }
                    }
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    acc.arguments.push_str(args);
                }
            }

            if let Some(reason) = choice["finish_reason"].as_str() {
                self.finish_reason = Some(map_finish_reason(reason));
            }
        }

        Ok(events)
    }

    /// Emit accumulated tool calls plus the terminal event. Called when the
    /// `[DONE]` sentinel arrives.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.finished = true;
        let mut events = Vec::new();
        self.tool_calls.sort_by_key(|(idx, _)| *idx);
        for (_, acc) in self.tool_calls.drain(..) {
            let input = if acc.arguments.is_empty() {
                json!({})
            } else {
                serde_json::from_str(&acc.arguments)
                    .unwrap_or_else(|_| json!({"_raw": acc.arguments}))
            };
            events.push(StreamEvent::ToolUse { id: acc.id, name: acc.name, input });
        }
        events.push(StreamEvent::end(self.usage, self.finish_reason.clone()));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::models::ChatMessage;

    #[test]
    fn tool_results_become_tool_role_messages() {
        let msg = ChatMessage {
            role: "user".to_string(),
            content: vec![ContentBlock::ToolResult {
                tool_use_id: "call_1".to_string(),
                content: "42 rows".to_string(),
            }],
        };
        let converted = convert_message(&msg);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0]["role"], "tool");
        assert_eq!(converted[0]["tool_call_id"], "call_1");
    }

    #[test]
    fn streamed_tool_calls_accumulate_arguments() {
        let mut decoder = StreamDecoder::new();
        decoder
            .decode(&json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_9", "function": {"name": "search", "arguments": "{\"q\""}}
            ]}}]}))
            .unwrap();
        decoder
            .decode(&json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": ": \"loyalty\"}"}}
            ]}, "finish_reason": "tool_calls"}]}))
            .unwrap();

        let events = decoder.finish();
        match &events[0] {
            StreamEvent::ToolUse { id, name, input } => {
                assert_eq!(id, "call_9");
                assert_eq!(name, "search");
                assert_eq!(input["q"], "loyalty");
            }
            _ => panic!("expected tool_use"),
        }
        assert!(matches!(events.last().unwrap(), StreamEvent::End { .. }));
    }

    #[test]
    fn length_finish_reason_maps_to_max_tokens() {
        let body = json!({
            "choices": [{"message": {"content": "hi"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2},
        });
        let resp = parse_call_response(&body).unwrap();
        assert_eq!(resp.stop_reason.as_deref(), Some("max_tokens"));
    }
}
