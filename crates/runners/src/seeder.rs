//! The Seeder (spec.md §2, §8 round-trip law: "re-running against a fully
//! seeded store yields zero inserts and zero updates"): idempotent
//! installation of the default Voice-Rx prompts/schemas as `evaluators`
//! rows.
//!
//! `examples/original_source/` doesn't carry the seeder's own source (per
//! SPEC_FULL.md §9), so this is grounded instead on the teacher's
//! ClickHouse migration manager's "check current state, apply only the
//! delta" idiom (`gateway/src/clickhouse_migration_manager/mod.rs`), reused
//! here against `Repository::upsert_evaluator_seed`'s row-level diff rather
//! than ClickHouse DDL.

use evalengine_core::error::Result;
use evalengine_core::repository::{Repository, SeedAction};
use evalengine_evaluators::voicerx::prompts;
use serde_json::Value;
use uuid::Uuid;

const SEED_APP_ID: &str = "voice-rx";

/// Deterministic ids so reseeding always targets the same rows regardless
/// of insertion order — `Uuid::from_u128` is infallible, unlike parsing a
/// string literal.
const UPLOAD_TRANSCRIPTION_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0001_0001_0001);
const UPLOAD_CRITIQUE_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0001_0001_0002);
const API_CRITIQUE_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0001_0001_0003);

struct SeedItem {
    id: Uuid,
    name: &'static str,
    model_id: Option<&'static str>,
    prompt: String,
    schema: Value,
}

fn seed_items() -> Vec<SeedItem> {
    vec![
        SeedItem {
            id: UPLOAD_TRANSCRIPTION_ID,
            name: "Voice-Rx: Upload transcription",
            model_id: None,
            prompt: "Transcribe the attached audio into speaker-labeled, time-anchored segments.".to_string(),
            schema: prompts::upload_evaluation_schema(),
        },
        SeedItem {
            id: UPLOAD_CRITIQUE_ID,
            name: "Voice-Rx: Upload critique",
            model_id: None,
            prompt: prompts::build_upload_evaluation_prompt(0, "{{comparison_table}}"),
            schema: prompts::upload_evaluation_schema(),
        },
        SeedItem {
            id: API_CRITIQUE_ID,
            name: "Voice-Rx: API critique",
            model_id: None,
            prompt: prompts::build_api_evaluation_prompt("{{comparison}}"),
            schema: prompts::api_evaluation_schema(),
        },
    ]
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeedReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[tracing::instrument(skip(repository))]
pub async fn run_seeder(repository: &Repository) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for item in seed_items() {
        let action = repository
            .upsert_evaluator_seed(item.id, SEED_APP_ID, item.name, item.model_id, &item.prompt, &item.schema)
            .await?;
        match action {
            SeedAction::Inserted => report.inserted += 1,
            SeedAction::Updated => report.updated += 1,
            SeedAction::Unchanged => report.unchanged += 1,
        }
        tracing::info!(evaluator = item.name, action = ?action, "seeded evaluator");
    }
    Ok(report)
}
