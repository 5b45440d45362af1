//! Thin row structs for the external aggregates the core touches but does
//! not own (spec.md §9 Non-goals / SPEC_FULL.md §3): `listings`,
//! `chat_sessions`, `chat_messages`, `evaluators`, `file_records`, and
//! `history`. Only the columns a pipeline runner actually reads or writes
//! are modeled here — the full CRUD surface for these tables (search,
//! tagging, soft-delete, …) stays out of scope.
//!
//! Grounded in `examples/original_source/backend/app/models/{listing,chat,
//! evaluator,file_record,history}.py`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schema_gen::EvaluatorOutputField;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Listing {
    pub id: Uuid,
    pub app_id: String,
    /// The reference transcript, shaped like `TranscriptData` (segments +
    /// full text), not plain text — grounded in the original's `JSON`
    /// column, not a string one.
    pub transcript: Option<Value>,
    pub source_type: Option<String>,
    pub api_response: Option<Value>,
    /// `{"id": "<file_record uuid>", "mimeType": "audio/mpeg"}` or null.
    pub audio_file: Option<Value>,
    pub evaluator_runs: Value,
    /// The Voice-Rx `AIEvaluation` result blob (spec.md §4.9), written
    /// wholesale by the `evaluate-voice-rx` runner.
    pub ai_eval: Option<Value>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub app_id: String,
    pub evaluator_runs: Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessageRow {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EvaluatorDef {
    pub id: Uuid,
    pub name: String,
    pub model_id: Option<String>,
    pub prompt: String,
    /// Parsed on demand with [`EvaluatorDef::output_fields`] rather than at
    /// load time — a malformed stored schema should fail the one run that
    /// needs it, not every unrelated query that touches the row.
    pub output_schema: Value,
}

impl EvaluatorDef {
    pub fn output_fields(&self) -> crate::error::Result<Vec<EvaluatorOutputField>> {
        serde_json::from_value(self.output_schema.clone())
            .map_err(|e| crate::error::Error::validation(format!("invalid evaluator output_schema: {e}")))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRecord {
    pub storage_path: String,
    pub mime_type: Option<String>,
}

/// One entry appended to `listing.evaluator_runs` / `session.evaluator_runs`
/// (spec.md §4.9's "custom evaluator run" record). Serialized with
/// `serde_json::to_value` before being folded into the JSON array column,
/// so field naming here is what callers of the read API actually see.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorRun {
    pub id: Uuid,
    pub evaluator_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub app_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub source_id: String,
    pub status: String,
    pub duration_ms: Option<f64>,
    pub data: Value,
    pub timestamp_ms: i64,
}
