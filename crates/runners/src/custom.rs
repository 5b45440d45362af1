//! The `evaluate-custom` job runner (spec.md §4.9): executes a single
//! user-defined evaluator against one listing or chat session, appends the
//! run to that entity's `evaluator_runs` array, and records a `History`
//! entry.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/custom_evaluator_runner.py`,
//! scoped down per SPEC_FULL.md §3/§9: no full listing/session ORM, only
//! the thin row structs in `evalengine_core::entities` needed to run the
//! pipeline and append the result.

use std::time::Instant;

use chrono::Utc;
use evalengine_core::entities::{EvaluatorRun, HistoryEntry};
use evalengine_core::error::{Error, Result};
use evalengine_core::file_storage::FileStorage;
use evalengine_core::models::JobProgress;
use evalengine_core::prompt_resolver::ResolverContext;
use evalengine_core::repository::Repository;
use evalengine_core::schema_gen::{EvaluatorOutputField, FieldType};
use evalengine_evaluators::CustomEvaluator;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::provider_factory::create_llm_provider;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CustomJobParams {
    pub evaluator_id: Uuid,
    #[serde(default)]
    pub listing_id: Option<Uuid>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

pub async fn run_custom_evaluator(
    repository: &Repository,
    storage: &FileStorage,
    job_id: Uuid,
    params: CustomJobParams,
) -> Result<Value> {
    let start = Instant::now();
    let is_session_flow = params.session_id.is_some();
    let entity_ref = if is_session_flow {
        params.session_id.map(|id| id.to_string())
    } else {
        params.listing_id.map(|id| id.to_string())
    }
    .ok_or_else(|| Error::validation("one of listing_id/session_id is required"))?;

    repository
        .update_job_progress(
            job_id,
            &JobProgress {
                current: 0,
                total: 2,
                message: "Loading evaluator...".to_string(),
                run_id: None,
                listing_id: params.listing_id,
                evaluator_id: Some(params.evaluator_id),
            },
        )
        .await?;

    let evaluator = repository
        .get_evaluator(params.evaluator_id)
        .await?
        .ok_or_else(|| Error::not_found("evaluator", params.evaluator_id.to_string()))?;
    let output_fields = evaluator.output_fields()?;

    let mut ctx = ResolverContext::default();
    let mut audio_bytes: Option<Vec<u8>> = None;
    let mut mime_type = "audio/mpeg".to_string();

    if let Some(session_id) = params.session_id {
        repository
            .get_chat_session(session_id)
            .await?
            .ok_or_else(|| Error::not_found("chat_session", session_id.to_string()))?;
        let rows = repository.get_chat_session_messages(session_id).await?;
        let messages: Vec<evalengine_core::data_loader::ChatMessage> = rows
            .into_iter()
            .map(|row| evalengine_core::data_loader::ChatMessage {
                thread_id: session_id.to_string(),
                timestamp: Utc::now(),
                is_user: row.role == "user",
                text: row.content,
                has_image: false,
                intent: None,
                raw: Value::Null,
            })
            .collect();
        ctx.chat_messages = Some(messages);
    } else if let Some(listing_id) = params.listing_id {
        let listing = repository
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| Error::not_found("listing", listing_id.to_string()))?;

        if let Some(audio_ref) = listing.audio_file.as_ref().and_then(|v| v.get("id")).and_then(Value::as_str) {
            if let Ok(file_id) = audio_ref.parse::<Uuid>() {
                if let Some(file_record) = repository.get_file_record(file_id).await? {
                    audio_bytes = storage.read(&file_record.storage_path).await.ok();
                    mime_type = file_record.mime_type.unwrap_or(mime_type);
                }
            }
        }

        ctx.api_response = json!({
            "listing": {
                "id": listing.id,
                "appId": listing.app_id,
                "transcript": listing.transcript,
                "sourceType": listing.source_type,
                "apiResponse": listing.api_response,
            },
        });
    }

    let settings = repository.load_llm_settings().await;
    let model = evaluator.model_id.clone().filter(|m| !m.is_empty()).unwrap_or(settings.selected_model);
    let audited = create_llm_provider(&settings.provider, &settings.api_key, &model, repository.clone())?;
    audited.set_context(evalengine_providers::AuditContext {
        run_id: None,
        thread_id: Some(format!("ceval-{}", &entity_ref[..entity_ref.len().min(8)])),
    });

    let run_id = Uuid::now_v7();
    let started_at = Utc::now();

    if repository.is_job_cancelled(job_id).await? {
        return Err(Error::JobCancelled);
    }

    repository
        .update_job_progress(
            job_id,
            &JobProgress {
                current: 1,
                total: 2,
                message: "Running evaluator...".to_string(),
                run_id: None,
                listing_id: params.listing_id,
                evaluator_id: Some(params.evaluator_id),
            },
        )
        .await?;

    let evaluator_runner = CustomEvaluator::new(audited);
    let audio_ref = audio_bytes.as_deref().map(|bytes| (bytes, mime_type.as_str()));
    let call_result = evaluator_runner.evaluate(&evaluator.prompt, &output_fields, &ctx, audio_ref).await;

    if repository.is_job_cancelled(job_id).await? {
        return Err(Error::JobCancelled);
    }

    let completed_at = Utc::now();
    let (run, run_failed) = match call_result {
        Ok(output) => (
            EvaluatorRun {
                id: run_id,
                evaluator_id: params.evaluator_id,
                status: "completed".to_string(),
                started_at,
                completed_at: Some(completed_at),
                listing_id: params.listing_id,
                session_id: params.session_id,
                output: Some(output.output.clone()),
                raw_request: Some(output.prompt_text),
                raw_response: Some(output.raw_response),
                error: None,
            },
            None,
        ),
        Err(e) => (
            EvaluatorRun {
                id: run_id,
                evaluator_id: params.evaluator_id,
                status: "failed".to_string(),
                started_at,
                completed_at: Some(completed_at),
                listing_id: params.listing_id,
                session_id: params.session_id,
                output: None,
                raw_request: None,
                raw_response: None,
                error: Some(e.to_string()),
            },
            Some(e),
        ),
    };

    if is_session_flow {
        if let Some(session_id) = params.session_id {
            repository.append_session_evaluator_run(session_id, &run).await?;
        }
    } else if let Some(listing_id) = params.listing_id {
        repository.append_listing_evaluator_run(listing_id, &run).await?;
    }

    let history_app_id = "voicerx".to_string();
    let scores = extract_scores(run.output.as_ref().unwrap_or(&Value::Null), &output_fields);
    let history_entry = HistoryEntry {
        id: Uuid::now_v7(),
        app_id: history_app_id,
        entity_type: if is_session_flow { "session".to_string() } else { "listing".to_string() },
        entity_id: entity_ref.clone(),
        source_id: params.evaluator_id.to_string(),
        status: run.status.clone(),
        duration_ms: Some((completed_at - started_at).num_milliseconds() as f64),
        data: json!({
            "evaluatorName": evaluator.name,
            "outputPayload": run.raw_response,
            "scores": scores,
            "error": run.error,
        }),
        timestamp_ms: completed_at.timestamp_millis(),
    };
    if let Err(e) = repository.insert_history(&history_entry).await {
        tracing::error!(error = %e, "failed to persist evaluator-run history entry");
    }

    if let Some(e) = run_failed {
        return Err(e);
    }

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    Ok(json!({
        "evaluatorId": params.evaluator_id,
        "runId": run_id,
        "status": run.status,
        "durationMs": duration_ms,
        "listingId": params.listing_id,
        "sessionId": params.session_id,
    }))
}

/// Extracts a display-ready score summary for the `History` row: the main
/// metric's value, its pass threshold as a nominal max, a breakdown of
/// every other field, and whichever field looks like free-text reasoning.
fn extract_scores(output: &Value, fields: &[EvaluatorOutputField]) -> Value {
    let Some(main_field) = fields.iter().find(|f| f.is_main_metric) else {
        return json!({"overallScore": Value::Null, "maxScore": Value::Null, "breakdown": output, "reasoning": Value::Null});
    };

    let overall_score = output.get(&main_field.key).cloned().unwrap_or(Value::Null);

    let mut breakdown = serde_json::Map::new();
    for field in fields {
        if let Some(v) = output.get(&field.key) {
            breakdown.insert(field.key.clone(), v.clone());
        }
    }

    let reasoning = fields
        .iter()
        .find(|f| {
            let key_lower = f.key.to_lowercase();
            key_lower.contains("reason") || key_lower.contains("explanation") || key_lower.contains("comment")
        })
        .and_then(|f| output.get(&f.key))
        .and_then(Value::as_str)
        .map(str::to_string);

    let max_score = if main_field.r#type == FieldType::Number {
        main_field.thresholds.as_ref().and_then(|t| t.pass_min).unwrap_or(100.0)
    } else {
        0.0
    };

    json!({
        "overallScore": overall_score,
        "maxScore": max_score,
        "breakdown": breakdown,
        "reasoning": reasoning,
    })
}
