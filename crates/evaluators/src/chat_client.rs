//! Streaming HTTP client for the chat API under adversarial test (spec.md
//! §4.10). Sends one turn, parses the SSE response frame-by-frame, and
//! folds each frame into the caller's session state.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/kaira_client.py`,
//! converted from `aiohttp` streaming to `reqwest`'s `bytes_stream` (the
//! same `reqwest` + `stream` feature + `futures` combination the teacher's
//! own `internal/reqwest-sse-stream` crate builds its SSE reader on).

use std::time::Duration;

use evalengine_core::error::{Error, Result};
use futures::StreamExt;
use serde_json::Value;

use crate::session::SessionState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct StreamResponse {
    pub full_message: String,
    pub detected_intents: Vec<Value>,
    pub agent_responses: Vec<Value>,
    pub is_multi_intent: bool,
}

pub struct ChatApiClient {
    client: reqwest::Client,
    auth_token: String,
    base_url: String,
}

impl ChatApiClient {
    pub fn new(auth_token: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth_token,
            base_url,
        }
    }

    pub async fn stream_message(&self, query: &str, session_state: &mut SessionState) -> Result<StreamResponse> {
        let payload = session_state.build_request_payload(query)?;
        let url = format!("{}/chat/stream", self.base_url);

        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("Accept", "*/*")
            .header("token", &self.auth_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("chat stream request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::upstream(format!("chat stream returned HTTP {status}")));
        }

        let mut result = StreamResponse::default();
        let mut buffer = String::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| Error::upstream(format!("chat stream read failed: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline_at) = buffer.find('\n') {
                let line = buffer[..newline_at].trim().to_string();
                buffer.drain(..=newline_at);
                Self::process_line(&line, session_state, &mut result);
            }
        }
        let remaining = buffer.trim().to_string();
        if !remaining.is_empty() {
            Self::process_line(&remaining, session_state, &mut result);
        }

        Ok(result)
    }

    fn process_line(line: &str, session_state: &mut SessionState, result: &mut StreamResponse) {
        if line.is_empty() || line == "data: [DONE]" {
            return;
        }
        let Some(json_str) = line.strip_prefix("data: ") else {
            return;
        };
        let trimmed = json_str.trim();
        if trimmed.is_empty() || trimmed.chars().all(|c| c.is_ascii_digit()) {
            return;
        }

        let Ok(chunk) = serde_json::from_str::<Value>(trimmed) else {
            tracing::warn!(chunk = %trimmed, "failed to parse chat stream frame");
            return;
        };

        session_state.apply_chunk(&chunk);
        Self::apply_to_response(&chunk, result);
    }

    fn apply_to_response(chunk: &Value, result: &mut StreamResponse) {
        match chunk.get("type").and_then(Value::as_str).unwrap_or_default() {
            "intent_classification" => {
                if let Some(intents) = chunk.get("detected_intents").and_then(Value::as_array) {
                    result.detected_intents = intents.clone();
                }
                result.is_multi_intent = chunk.get("is_multi_intent").and_then(Value::as_bool).unwrap_or(false);
            }
            "agent_response" => {
                result.agent_responses.push(chunk.clone());
                let success = chunk.get("success").and_then(Value::as_bool).unwrap_or(false);
                if let Some(message) = chunk.get("message").and_then(Value::as_str) {
                    if success {
                        result.full_message = message.to_string();
                    }
                }
            }
            "summary" => {
                if let Some(message) = chunk.get("message").and_then(Value::as_str) {
                    result.full_message = message.to_string();
                }
            }
            "error" => {
                tracing::error!(error = ?chunk.get("error"), "chat stream returned an error frame");
            }
            _ => {}
        }
    }
}
