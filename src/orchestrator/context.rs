//! Request context and prompt extraction.

use std::net::IpAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::Instant;

use crate::locale::Locale;
use crate::orchestrator::error::GuardError;

/// Immutable per-request record created once the prompt is known.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client: IpAddr,
    pub prompt: String,
    pub locale: Locale,
    pub arrived_at: Instant,
    /// Latest moment an admission slot may still be granted.
    pub deadline: Instant,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        client: IpAddr,
        prompt: String,
        locale: Locale,
        arrived_at: Instant,
        queue_timeout: Duration,
    ) -> Self {
        Self {
            request_id,
            client,
            prompt,
            locale,
            arrived_at,
            deadline: arrived_at + queue_timeout,
        }
    }
}

/// Where prompt text lives in the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slots {
    Prompt,
    /// Indices of `messages` entries with string content.
    Messages(Vec<usize>),
}

/// A parsed completion or chat request.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    body: Value,
    slots: Slots,
    /// Text handed to the input pipeline.
    pub prompt: String,
    pub model: Option<String>,
    pub stream: Option<bool>,
}

impl PromptPayload {
    /// Accepts `{"prompt": "..."}` or `{"messages": [{"content": "..."}, ...]}`.
    pub fn parse(bytes: &[u8]) -> Result<Self, GuardError> {
        let body: Value = serde_json::from_slice(bytes)
            .map_err(|e| GuardError::InvalidRequest(format!("body is not valid JSON: {}", e)))?;
        if !body.is_object() {
            return Err(GuardError::InvalidRequest("body must be a JSON object".to_string()));
        }

        let model = body.get("model").and_then(Value::as_str).map(str::to_string);
        let stream = body.get("stream").and_then(Value::as_bool);

        let prompt = body.get("prompt").and_then(Value::as_str).map(str::to_string);
        if let Some(prompt) = prompt {
            return Ok(Self {
                prompt,
                body,
                slots: Slots::Prompt,
                model,
                stream,
            });
        }

        let messages = body.get("messages").and_then(Value::as_array).map(|messages| {
            let mut indices = Vec::new();
            let mut parts = Vec::new();
            for (i, message) in messages.iter().enumerate() {
                if let Some(content) = message.get("content").and_then(Value::as_str) {
                    indices.push(i);
                    parts.push(content);
                }
            }
            (indices, parts.join("\n"))
        });
        if let Some((indices, prompt)) = messages {
            if !indices.is_empty() {
                return Ok(Self {
                    prompt,
                    body,
                    slots: Slots::Messages(indices),
                    model,
                    stream,
                });
            }
        }

        Err(GuardError::InvalidRequest(
            "expected a \"prompt\" string or \"messages\" with text content".to_string(),
        ))
    }

    /// Replace the prompt with sanitized text. Only possible when the prompt
    /// occupies a single slot; returns false otherwise.
    pub fn apply_sanitized(&mut self, text: &str) -> bool {
        let pointer = match &self.slots {
            Slots::Prompt => "/prompt".to_string(),
            Slots::Messages(indices) if indices.len() == 1 => {
                format!("/messages/{}/content", indices[0])
            }
            Slots::Messages(_) => return false,
        };
        match self.body.pointer_mut(&pointer) {
            Some(slot) => {
                *slot = Value::String(text.to_string());
                self.prompt = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Body to forward, with any sanitization applied.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.body.to_string())
    }
}

/// Read the request body, failing once more than `limit` bytes arrive.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, GuardError> {
    let mut stream = body.into_data_stream();
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GuardError::InvalidRequest(format!("failed to read body: {}", e)))?;
        if out.len() + chunk.len() > limit {
            return Err(GuardError::PayloadTooLarge { limit });
        }
        out.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(out))
}
