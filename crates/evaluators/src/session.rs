//! The Chat-API session protocol (spec.md §4.10): tracks session
//! identifiers across turns and builds request payloads for the
//! first-message / subsequent-message shapes.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/models.py`'s
//! `KairaSessionState`.

use evalengine_core::error::{Error, Result};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub user_id: String,
    pub thread_id: Option<String>,
    pub session_id: Option<String>,
    pub response_id: Option<String>,
    pub is_first_message: bool,
}

impl SessionState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: None,
            session_id: None,
            response_id: None,
            is_first_message: true,
        }
    }

    /// Builds the request payload for the next turn. The first message
    /// authenticates by setting `session_id = user_id` and `end_session:
    /// true`; every subsequent message requires both `session_id` and
    /// `thread_id` to already be known from a prior `apply_chunk` call.
    pub fn build_request_payload(&self, query: &str) -> Result<Value> {
        let mut obj = serde_json::Map::new();
        obj.insert("query".to_string(), json!(query));
        obj.insert("user_id".to_string(), json!(self.user_id));
        obj.insert("context".to_string(), json!({"additionalProp1": {}}));
        obj.insert("stream".to_string(), json!(false));

        if self.is_first_message {
            obj.insert("session_id".to_string(), json!(self.user_id));
            obj.insert("end_session".to_string(), json!(true));
        } else {
            let session_id = self
                .session_id
                .as_ref()
                .ok_or_else(|| Error::validation("session_id and thread_id required for subsequent messages"))?;
            let thread_id = self
                .thread_id
                .as_ref()
                .ok_or_else(|| Error::validation("session_id and thread_id required for subsequent messages"))?;
            obj.insert("session_id".to_string(), json!(session_id));
            obj.insert("thread_id".to_string(), json!(thread_id));
            obj.insert("end_session".to_string(), json!(false));
        }
        Ok(Value::Object(obj))
    }

    /// Syncs session identifiers from any SSE chunk type (spec.md §4.10):
    /// `stream_start`, `session_context`, `session_start`, `agent_response`,
    /// `session_end`. Only `session_context` flips `is_first_message` off.
    pub fn apply_chunk(&mut self, chunk: &Value) {
        let chunk_type = chunk.get("type").and_then(Value::as_str).unwrap_or_default();
        let string_field = |key: &str| chunk.get(key).and_then(Value::as_str).map(str::to_string);

        match chunk_type {
            "stream_start" => {
                if let Some(thread_id) = string_field("thread_id") {
                    self.thread_id = Some(thread_id);
                }
            }
            "session_context" => {
                if let Some(thread_id) = string_field("thread_id") {
                    self.thread_id = Some(thread_id);
                }
                if let Some(session_id) = string_field("session_id") {
                    self.session_id = Some(session_id);
                }
                if let Some(response_id) = string_field("response_id") {
                    self.response_id = Some(response_id);
                }
                self.is_first_message = false;
            }
            "session_start" => {
                if let Some(thread_id) = string_field("thread_id") {
                    self.thread_id = Some(thread_id);
                }
            }
            "agent_response" => {
                if let Some(thread_id) = string_field("thread_id") {
                    self.thread_id = Some(thread_id);
                }
                if let Some(response_id) = string_field("response_id") {
                    self.response_id = Some(response_id);
                }
            }
            "session_end" => {
                if let Some(thread_id) = string_field("thread_id") {
                    self.thread_id = Some(thread_id);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_payload_sets_session_id_to_user_id() {
        let state = SessionState::new("user-1");
        let payload = state.build_request_payload("hi").expect("builds");
        assert_eq!(payload["session_id"], "user-1");
        assert_eq!(payload["end_session"], true);
        assert!(payload.get("thread_id").is_none());
    }

    #[test]
    fn subsequent_message_without_thread_id_errors() {
        let mut state = SessionState::new("user-1");
        state.is_first_message = false;
        assert!(state.build_request_payload("hi").is_err());
    }

    #[test]
    fn session_context_chunk_clears_first_message_flag() {
        let mut state = SessionState::new("user-1");
        state.apply_chunk(&json!({"type": "session_context", "thread_id": "t1", "session_id": "s1", "response_id": "r1"}));
        assert!(!state.is_first_message);
        assert_eq!(state.thread_id.as_deref(), Some("t1"));
        assert_eq!(state.session_id.as_deref(), Some("s1"));
        assert_eq!(state.response_id.as_deref(), Some("r1"));
    }

    #[test]
    fn agent_response_chunk_updates_thread_and_response_id_only() {
        let mut state = SessionState::new("user-1");
        state.apply_chunk(&json!({"type": "agent_response", "thread_id": "t2", "response_id": "r2"}));
        assert_eq!(state.thread_id.as_deref(), Some("t2"));
        assert_eq!(state.response_id.as_deref(), Some("r2"));
        assert!(state.session_id.is_none());
    }
}
