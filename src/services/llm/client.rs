//! The gateway client: provider dispatch, cached HTTP clients, retry with
//! backoff for transient errors, and SSE streaming with cooperative
//! cancellation.

use dashmap::DashMap;
use futures::StreamExt;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::LlmConfig;
use crate::utils::CancelToken;

use super::anthropic;
use super::models::{CallResponse, LlmError, LlmRequest, StreamEvent, Usage};
use super::openai;

/// HTTP clients cached per API key so their internal connection pools are
/// reused across requests.
static HTTP_CLIENTS: Lazy<DashMap<String, Client>> = Lazy::new(DashMap::new);

fn cached_client(api_key: &str) -> Result<Client, LlmError> {
    if let Some(client) = HTTP_CLIENTS.get(api_key) {
        return Ok(client.clone());
    }
    // No overall request timeout: streams are bounded by max_tokens and
    // cooperative cancellation.
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| LlmError::Transport(e.to_string()))?;
    HTTP_CLIENTS.insert(api_key.to_string(), client.clone());
    Ok(client)
}

const MAX_CALL_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct LlmGateway {
    config: LlmConfig,
}

impl LlmGateway {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    pub fn default_provider(&self) -> &str {
        &self.config.default_provider
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn fast_model(&self) -> &str {
        &self.config.fast_model
    }

    pub fn is_available(&self) -> bool {
        self.config.anthropic_api_key.is_some() || self.config.openai_api_key.is_some()
    }

    fn api_key(&self, provider: &str) -> Result<String, LlmError> {
        let key = match provider {
            "anthropic" => self.config.anthropic_api_key.clone(),
            "openai" => self.config.openai_api_key.clone(),
            other => return Err(LlmError::UnknownProvider(other.to_string())),
        };
        key.ok_or_else(|| LlmError::NotConfigured(provider.to_string()))
    }

    /// Await a full response. Transient upstream errors retry with backoff
    /// up to a small cap; terminal errors surface as typed failures.
    pub async fn call(&self, req: &LlmRequest) -> Result<CallResponse, LlmError> {
        let mut last_err = None;
        for attempt in 0..MAX_CALL_RETRIES {
            match self.call_once(req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt + 1 < MAX_CALL_RETRIES => {
                    let wait = Duration::from_secs(2 * (attempt as u64 + 1));
                    tracing::warn!(
                        "LLM call failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        MAX_CALL_RETRIES,
                        wait,
                        e
                    );
                    tokio::time::sleep(wait).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| LlmError::Transport("retries exhausted".to_string())))
    }

    async fn call_once(&self, req: &LlmRequest) -> Result<CallResponse, LlmError> {
        let api_key = self.api_key(&req.provider)?;
        let client = cached_client(&api_key)?;

        let response = match req.provider.as_str() {
            "anthropic" => {
                let body = anthropic::build_body(
                    &req.model,
                    &req.system,
                    &req.messages,
                    req.max_tokens,
                    req.tools.as_deref(),
                    false,
                );
                client
                    .post(anthropic::API_URL)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", anthropic::API_VERSION)
                    .json(&body)
                    .send()
                    .await
            }
            "openai" => {
                let body = openai::build_body(
                    &req.model,
                    &req.system,
                    &req.messages,
                    req.max_tokens,
                    req.tools.as_deref(),
                    false,
                );
                client
                    .post(openai::API_URL)
                    .bearer_auth(&api_key)
                    .json(&body)
                    .send()
                    .await
            }
            other => return Err(LlmError::UnknownProvider(other.to_string())),
        }
        .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                message: crate::utils::truncate_chars(&text, 500).to_string(),
            });
        }

        let body: Value =
            response.json().await.map_err(|e| LlmError::ParseError(e.to_string()))?;
        match req.provider.as_str() {
            "anthropic" => anthropic::parse_call_response(&body),
            _ => openai::parse_call_response(&body),
        }
    }

    /// Stream events. The cancel token is polled between chunks; an aborted
    /// stream ends cleanly with `stop_reason = "cancelled"` and whatever
    /// partial text was produced.
    pub async fn stream(
        &self,
        req: LlmRequest,
        cancel: Option<Arc<CancelToken>>,
    ) -> Result<mpsc::Receiver<Result<StreamEvent, LlmError>>, LlmError> {
        let api_key = self.api_key(&req.provider)?;
        let client = cached_client(&api_key)?;

        let response = match req.provider.as_str() {
            "anthropic" => {
                let body = anthropic::build_body(
                    &req.model,
                    &req.system,
                    &req.messages,
                    req.max_tokens,
                    req.tools.as_deref(),
                    true,
                );
                client
                    .post(anthropic::API_URL)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", anthropic::API_VERSION)
                    .json(&body)
                    .send()
                    .await
            }
            "openai" => {
                let body = openai::build_body(
                    &req.model,
                    &req.system,
                    &req.messages,
                    req.max_tokens,
                    req.tools.as_deref(),
                    true,
                );
                client
                    .post(openai::API_URL)
                    .bearer_auth(&api_key)
                    .json(&body)
                    .send()
                    .await
            }
            other => return Err(LlmError::UnknownProvider(other.to_string())),
        }
        .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited(60));
            }
            return Err(LlmError::Http {
                status: status.as_u16(),
                message: crate::utils::truncate_chars(&text, 500).to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let provider = req.provider.clone();
        tokio::spawn(async move {
            drive_sse(response, provider, cancel, tx).await;
        });
        Ok(rx)
    }

    /// Convenience: stream, concatenate text, invoke `on_chunk` per delta.
    /// Returns (full_text, usage, stop_reason). Cancellation surfaces as
    /// `stop_reason == Some("cancelled")`.
    pub async fn stream_text<F>(
        &self,
        req: LlmRequest,
        cancel: Option<Arc<CancelToken>>,
        mut on_chunk: F,
    ) -> Result<(String, Usage, Option<String>), LlmError>
    where
        F: FnMut(&str),
    {
        let mut rx = self.stream(req, cancel).await?;
        let mut full = String::new();
        let mut usage = Usage::default();
        let mut stop_reason = None;
        while let Some(event) = rx.recv().await {
            match event? {
                StreamEvent::Chunk { text } => {
                    on_chunk(&text);
                    full.push_str(&text);
                }
                StreamEvent::End { usage: u, stop_reason: reason, .. } => {
                    usage = u;
                    stop_reason = reason;
                }
                _ => {}
            }
        }
        Ok((full, usage, stop_reason))
    }
}

/// Pump the SSE byte stream through the provider decoder into the event
/// channel, polling the cancel token between chunks.
async fn drive_sse(
    response: reqwest::Response,
    provider: String,
    cancel: Option<Arc<CancelToken>>,
    tx: mpsc::Sender<Result<StreamEvent, LlmError>>,
) {
    let mut anthropic_decoder = anthropic::StreamDecoder::new();
    let mut openai_decoder = openai::StreamDecoder::new();
    let mut byte_stream = response.bytes_stream();
    let mut buf = String::new();
    let mut usage_sent = false;

    loop {
        if let Some(token) = &cancel {
            if token.is_cancelled() {
                let _ = tx
                    .send(Ok(StreamEvent::end(Usage::default(), Some("cancelled".to_string()))))
                    .await;
                return;
            }
        }

        let chunk = match byte_stream.next().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                let _ = tx.send(Err(LlmError::Transport(e.to_string()))).await;
                return;
            }
            None => break,
        };

        buf.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buf.find('\n') {
            let line: String = buf.drain(..=pos).collect();
            let line = line.trim_end();
            let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };

            if payload == "[DONE]" {
                for event in openai_decoder.finish() {
                    if matches!(event, StreamEvent::End { .. }) {
                        usage_sent = true;
                    }
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
                continue;
            }

            let data: Value = match serde_json::from_str(payload) {
                Ok(v) => v,
                Err(_) => continue,
            };

            let decoded = if provider == "anthropic" {
                anthropic_decoder.decode(&data)
            } else {
                openai_decoder.decode(&data)
            };

            match decoded {
                Ok(events) => {
                    for event in events {
                        if matches!(event, StreamEvent::End { .. }) {
                            usage_sent = true;
                        }
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        if anthropic_decoder.finished() || openai_decoder.finished() {
            break;
        }
    }

    // Upstream closed without a terminal frame; still deliver an end event
    // so callers observe a clean stop.
    if !usage_sent {
        let _ = tx.send(Ok(StreamEvent::end(Usage::default(), None))).await;
    }
}
