//! Provider-agnostic LLM gateway.
//!
//! Two operations: `call` (await the full response) and `stream` (receive
//! events). Tool definitions are accepted in a neutral form and translated
//! to each provider's schema shape. Streaming honors a cooperative cancel
//! token checked between chunks.

mod anthropic;
mod client;
mod models;
mod openai;

pub use client::LlmGateway;
pub use models::{
    CallResponse, ChatMessage, ContentBlock, LlmError, LlmRequest, StreamEvent, ToolSpec, Usage,
};
