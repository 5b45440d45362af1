//! The `evaluate-voice-rx` job runner (spec.md §4.9): the two-call
//! Voice-Rx pipeline — transcribe (optional), normalize (optional), and
//! critique — for both the upload flow (audio + a reference transcript)
//! and the API flow (audio + structured rx JSON).
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/voice_rx_runner.py`.
//! Unlike `custom.rs`, there's no `EvalRun` row here: mirroring the
//! original, this writes its one result straight onto `listings.ai_eval`
//! and logs provider calls under a synthetic `thread_id` instead of a
//! `run_id` (the original's comment: "not creating EvalRun for voice-rx
//! single-listing evals").
//!
//! The API-flow critique step diverges from the original: rather than
//! dumping `json.dumps` of both structured payloads into the prompt, it
//! builds the field-by-field alignment through
//! `evalengine_core::comparator::build_deep_comparison`, per spec.md §4.6
//! and its "Deep-comparator alignment" test scenario.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use evalengine_core::comparator::{build_deep_comparison, format_comparison_for_prompt};
use evalengine_core::error::{Error, Result};
use evalengine_core::file_storage::FileStorage;
use evalengine_core::models::JobProgress;
use evalengine_core::prompt_resolver::{resolve_prompt, ResolverContext};
use evalengine_core::repository::Repository;
use evalengine_evaluators::voicerx::{self, parse_api_critique_response, parse_critique_response, parse_transcript_response};
use evalengine_providers::{AuditContext, AuditedProvider, GenerateOptions, LlmProvider};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::provider_factory::create_llm_provider;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VoiceRxJobParams {
    pub listing_id: Uuid,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default)]
    pub transcription_prompt: String,
    #[serde(default)]
    pub evaluation_prompt: String,
    #[serde(default)]
    pub transcription_schema: Option<Value>,
    #[serde(default)]
    pub evaluation_schema: Option<Value>,
    #[serde(default)]
    pub skip_transcription: bool,
    #[serde(default)]
    pub normalize_original: bool,
    #[serde(default)]
    pub prerequisites: Value,
    #[serde(default)]
    pub transcription_model: Option<String>,
    #[serde(default)]
    pub evaluation_model: Option<String>,
}

fn default_app_id() -> String {
    "voice-rx".to_string()
}

type AuditedLlm = Arc<AuditedProvider<Box<dyn LlmProvider>>>;

fn create_provider(repository: &Repository, provider: &str, api_key: &str, model: &str, thread_id: &str) -> Result<AuditedLlm> {
    let llm = create_llm_provider(provider, api_key, model, repository.clone())?;
    llm.set_context(AuditContext { run_id: None, thread_id: Some(thread_id.to_string()) });
    Ok(llm)
}

fn segments_of(v: &Value) -> Vec<Value> {
    v.get("segments").and_then(Value::as_array).cloned().unwrap_or_default()
}

fn speakers_of(segments: &[Value]) -> Vec<String> {
    let mut seen = Vec::new();
    for seg in segments {
        if let Some(s) = seg.get("speaker").and_then(Value::as_str) {
            if !seen.iter().any(|existing: &String| existing == s) {
                seen.push(s.to_string());
            }
        }
    }
    seen
}

pub async fn run_voice_rx_evaluation(
    repository: &Repository,
    storage: &FileStorage,
    job_id: Uuid,
    params: VoiceRxJobParams,
) -> Result<Value> {
    let start = Instant::now();
    let listing_id = params.listing_id;

    repository
        .update_job_progress(
            job_id,
            &JobProgress {
                current: 0,
                total: 3,
                message: "Initializing...".to_string(),
                run_id: None,
                listing_id: Some(listing_id),
                evaluator_id: None,
            },
        )
        .await?;

    let listing = repository
        .get_listing(listing_id)
        .await?
        .ok_or_else(|| Error::not_found("listing", listing_id.to_string()))?;

    let audio_ref = listing
        .audio_file
        .as_ref()
        .ok_or_else(|| Error::validation(format!("listing {listing_id} has no audio file")))?;
    let file_id = audio_ref
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("listing audio_file is missing an id"))?
        .parse::<Uuid>()
        .map_err(|e| Error::validation(format!("invalid audio file id: {e}")))?;
    let file_record = repository
        .get_file_record(file_id)
        .await?
        .ok_or_else(|| Error::not_found("file_record", file_id.to_string()))?;
    let audio_bytes = storage.read(&file_record.storage_path).await?;
    let mime_type = file_record
        .mime_type
        .or_else(|| audio_ref.get("mimeType").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "audio/mpeg".to_string());

    let settings = repository.load_llm_settings().await;
    let transcription_model = params
        .transcription_model
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| settings.selected_model.clone());
    let evaluation_model = params
        .evaluation_model
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| settings.selected_model.clone());

    let thread_id = format!("vrx-{}", &listing_id.to_string()[..8]);
    let is_api_flow = listing.source_type.as_deref() == Some("api");

    let mut total_steps: i64 = if params.skip_transcription { 0 } else { 1 };
    if params.normalize_original && !is_api_flow {
        total_steps += 1;
    }
    total_steps += 1;

    let mut evaluation = Map::new();
    evaluation.insert("id".to_string(), json!(format!("eval-{}", Utc::now().timestamp_millis())));
    evaluation.insert("createdAt".to_string(), json!(Utc::now().to_rfc3339()));
    evaluation.insert("model".to_string(), json!(transcription_model));
    evaluation.insert("status".to_string(), json!("processing"));
    evaluation.insert(
        "prompts".to_string(),
        json!({"transcription": params.transcription_prompt, "evaluation": params.evaluation_prompt}),
    );

    let outcome = run_pipeline(
        repository,
        job_id,
        &params,
        &listing,
        &audio_bytes,
        &mime_type,
        &transcription_model,
        &evaluation_model,
        &thread_id,
        &settings,
        is_api_flow,
        total_steps,
        &mut evaluation,
    )
    .await;

    match outcome {
        Ok(()) => {
            evaluation.insert("status".to_string(), json!("completed"));
            repository.update_listing_ai_eval(listing_id, &Value::Object(evaluation)).await?;
            Ok(json!({
                "listingId": listing_id,
                "status": "completed",
                "durationSeconds": start.elapsed().as_secs_f64(),
            }))
        }
        Err(Error::JobCancelled) => {
            evaluation.insert("status".to_string(), json!("cancelled"));
            let _ = repository.update_listing_ai_eval(listing_id, &Value::Object(evaluation)).await;
            Err(Error::JobCancelled)
        }
        Err(e) => {
            evaluation.insert("status".to_string(), json!("failed"));
            evaluation.insert("error".to_string(), json!(e.to_string()));
            let _ = repository.update_listing_ai_eval(listing_id, &Value::Object(evaluation)).await;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    repository: &Repository,
    job_id: Uuid,
    params: &VoiceRxJobParams,
    listing: &evalengine_core::entities::Listing,
    audio_bytes: &[u8],
    mime_type: &str,
    transcription_model: &str,
    evaluation_model: &str,
    thread_id: &str,
    settings: &evalengine_core::models::LlmSettings,
    is_api_flow: bool,
    total_steps: i64,
    evaluation: &mut Map<String, Value>,
) -> Result<()> {
    let mut current_step: i64 = 0;
    let options = GenerateOptions { temperature: Some(0.3), thinking_level: None };

    let check_cancel = || async {
        if repository.is_job_cancelled(job_id).await? {
            Err(Error::JobCancelled)
        } else {
            Ok(())
        }
    };

    let mut report_progress = |current_step: i64, message: &str| {
        let repository = repository.clone();
        let message = message.to_string();
        let listing_id = params.listing_id;
        async move {
            repository
                .update_job_progress(
                    job_id,
                    &JobProgress {
                        current: current_step,
                        total: total_steps,
                        message,
                        run_id: None,
                        listing_id: Some(listing_id),
                        evaluator_id: None,
                    },
                )
                .await
        }
    };

    if is_api_flow {
        current_step += 1;
        report_progress(current_step, "Judge is transcribing audio...").await?;
        check_cancel().await?;

        let llm_transcription = create_provider(repository, &settings.provider, &settings.api_key, transcription_model, thread_id)?;
        let schema = params
            .transcription_schema
            .clone()
            .ok_or_else(|| Error::validation("no API response schema configured for transcription"))?;
        let response = llm_transcription
            .generate_with_audio(None, &params.transcription_prompt, audio_bytes, mime_type, &schema, &options)
            .await?;
        check_cancel().await?;

        let judge_transcript = response.value.get("input").and_then(Value::as_str).unwrap_or("").to_string();
        let judge_structured = response.value.get("rx").cloned().unwrap_or(Value::Null);
        evaluation.insert(
            "judgeOutput".to_string(),
            json!({"transcript": judge_transcript, "structuredData": judge_structured}),
        );

        current_step += 1;
        report_progress(current_step, "Comparing outputs...").await?;
        check_cancel().await?;

        let api_response = listing.api_response.clone().unwrap_or(Value::Null);
        let api_transcript = api_response.get("input").and_then(Value::as_str).unwrap_or("");
        let api_rx = api_response.get("rx").cloned().unwrap_or(Value::Null);

        let entries = build_deep_comparison(&api_rx, &judge_structured);
        let field_comparison = format_comparison_for_prompt(&entries);
        let transcript_section = format!(
            "=== TRANSCRIPT COMPARISON ===\nAPI TRANSCRIPT:\n{api_transcript}\n\nJUDGE TRANSCRIPT:\n{judge_transcript}"
        );
        let comparison = format!("{transcript_section}\n\n{field_comparison}");
        let full_prompt = format!("{}\n\n{}", params.evaluation_prompt, voicerx::prompts::build_api_evaluation_prompt(&comparison));

        let schema = params.evaluation_schema.clone().unwrap_or_else(voicerx::prompts::api_evaluation_schema);
        let llm_evaluation = create_provider(repository, &settings.provider, &settings.api_key, evaluation_model, thread_id)?;
        let critique_response = llm_evaluation
            .generate_with_audio(None, &full_prompt, audio_bytes, mime_type, &schema, &options)
            .await?;
        check_cancel().await?;

        evaluation.insert(
            "apiCritique".to_string(),
            parse_api_critique_response(&critique_response.value, evaluation_model, Utc::now()),
        );
        return Ok(());
    }

    // ── Upload flow ──────────────────────────────────────────────
    let mut original_for_critique = listing.transcript.clone();
    let mut llm_transcript_data: Option<Value> = None;

    if params.skip_transcription {
        let existing_eval = listing.ai_eval.clone().unwrap_or(Value::Null);
        let existing_transcript = existing_eval.get("llmTranscript").cloned();
        let existing_transcript =
            existing_transcript.filter(|v| !v.is_null()).ok_or_else(|| {
                Error::validation("cannot skip transcription: no existing AI transcript available")
            })?;
        evaluation.insert("llmTranscript".to_string(), existing_transcript.clone());
        if let Some(prompt) = existing_eval.pointer("/prompts/transcription").and_then(Value::as_str) {
            if let Some(prompts) = evaluation.get_mut("prompts").and_then(Value::as_object_mut) {
                prompts.insert("transcription".to_string(), json!(prompt));
            }
        }
        llm_transcript_data = Some(existing_transcript);
    } else {
        current_step += 1;
        report_progress(current_step, "Transcribing audio...").await?;
        check_cancel().await?;

        let llm_transcription = create_provider(repository, &settings.provider, &settings.api_key, transcription_model, thread_id)?;

        let mut ctx = ResolverContext { audio_present: true, ..Default::default() };
        ctx.transcript = original_for_critique.as_ref().and_then(|t| t.get("fullTranscript")).and_then(Value::as_str).map(str::to_string);
        ctx.script_preference = params.prerequisites.get("targetScript").and_then(Value::as_str).map(str::to_string);
        ctx.language_hint = params.prerequisites.get("language").and_then(Value::as_str).map(str::to_string);
        ctx.api_response = json!({
            "listing": {"transcript": listing.transcript, "sourceType": listing.source_type, "apiResponse": listing.api_response},
            "prerequisites": params.prerequisites,
        });
        let prompt_text = resolve_prompt(&params.transcription_prompt, &ctx).prompt;

        let schema = params.transcription_schema.clone().unwrap_or(Value::Null);
        let response = llm_transcription.generate_with_audio(None, &prompt_text, audio_bytes, mime_type, &schema, &options).await?;
        check_cancel().await?;

        let parsed = parse_transcript_response(&response.value, Utc::now());
        evaluation.insert("llmTranscript".to_string(), parsed.clone());
        llm_transcript_data = Some(parsed);
    }

    if params.normalize_original {
        if let Some(original) = original_for_critique.clone() {
            current_step += 1;
            report_progress(current_step, "Normalizing transcript...").await?;
            check_cancel().await?;

            let target_script = params
                .prerequisites
                .get("targetScript")
                .or_else(|| params.prerequisites.get("target_script"))
                .and_then(Value::as_str)
                .unwrap_or("latin");
            let source_script = params
                .prerequisites
                .get("sourceScript")
                .or_else(|| params.prerequisites.get("source_script"))
                .and_then(Value::as_str);
            let language = params.prerequisites.get("language").and_then(Value::as_str).unwrap_or("");

            let transcript_json = serde_json::to_string_pretty(&original).map_err(|e| Error::internal(e.to_string()))?;
            let norm_prompt = voicerx::prompts::build_normalization_prompt(target_script, source_script, language, &transcript_json);
            let norm_schema = voicerx::prompts::build_normalization_schema(target_script);

            let norm_model = params
                .prerequisites
                .get("normalizationModel")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or(transcription_model);
            let llm_norm = create_provider(repository, &settings.provider, &settings.api_key, norm_model, thread_id)?;

            let norm_result = llm_norm.generate_json(None, &norm_prompt, &norm_schema, &options).await?;
            check_cancel().await?;

            let norm_segments = segments_of(&norm_result.value);
            if !norm_segments.is_empty() {
                let orig_segments = segments_of(&original);
                let normalized_segments: Vec<Value> = norm_segments
                    .iter()
                    .enumerate()
                    .map(|(idx, seg)| {
                        let start_seconds = orig_segments.get(idx).and_then(|s| s.get("startSeconds")).cloned().unwrap_or(Value::Null);
                        let end_seconds = orig_segments.get(idx).and_then(|s| s.get("endSeconds")).cloned().unwrap_or(Value::Null);
                        json!({
                            "speaker": seg.get("speaker").and_then(Value::as_str).unwrap_or("Unknown"),
                            "text": seg.get("text").and_then(Value::as_str).unwrap_or(""),
                            "startTime": seg.get("startTime").and_then(Value::as_str).unwrap_or("00:00:00"),
                            "endTime": seg.get("endTime").and_then(Value::as_str).unwrap_or("00:00:00"),
                            "startSeconds": start_seconds,
                            "endSeconds": end_seconds,
                        })
                    })
                    .collect();
                let full_transcript = normalized_segments
                    .iter()
                    .map(|s| format!("[{}]: {}", s["speaker"].as_str().unwrap_or(""), s["text"].as_str().unwrap_or("")))
                    .collect::<Vec<_>>()
                    .join("\n");

                let mut normalized = original.clone();
                if let Some(obj) = normalized.as_object_mut() {
                    obj.insert("segments".to_string(), Value::Array(normalized_segments));
                    obj.insert("fullTranscript".to_string(), json!(full_transcript));
                    obj.insert("generatedAt".to_string(), json!(Utc::now().to_rfc3339()));
                }
                evaluation.insert("normalizedOriginal".to_string(), normalized.clone());
                evaluation.insert(
                    "normalizationMeta".to_string(),
                    json!({
                        "enabled": true,
                        "sourceScript": source_script,
                        "targetScript": target_script,
                        "normalizedAt": Utc::now().to_rfc3339(),
                    }),
                );
                original_for_critique = Some(normalized);
            }
        }
    }

    let llm_transcript_data = llm_transcript_data.ok_or_else(|| Error::validation("no valid transcription data for critique step"))?;

    current_step += 1;
    report_progress(current_step, "Generating critique...").await?;
    check_cancel().await?;

    let llm_evaluation = create_provider(repository, &settings.provider, &settings.api_key, evaluation_model, thread_id)?;

    let original_segments = original_for_critique.as_ref().map(segments_of).unwrap_or_default();
    let llm_segments = segments_of(&llm_transcript_data);

    let mut ctx = ResolverContext { audio_present: true, ..Default::default() };
    ctx.transcript = original_for_critique.as_ref().and_then(|t| t.get("fullTranscript")).and_then(Value::as_str).map(str::to_string);
    ctx.llm_transcript = llm_transcript_data.get("fullTranscript").and_then(Value::as_str).map(str::to_string);
    ctx.segment_count = Some(original_segments.len());
    ctx.speaker_list = Some(speakers_of(&original_segments));
    ctx.structured_output = Some(llm_transcript_data.clone());
    ctx.api_response = json!({
        "listing": {"transcript": original_for_critique, "sourceType": listing.source_type, "apiResponse": listing.api_response},
        "ai_eval": {"llmTranscript": llm_transcript_data},
        "prerequisites": params.prerequisites,
    });
    let eval_prompt_text = resolve_prompt(&params.evaluation_prompt, &ctx).prompt;

    let schema = params.evaluation_schema.clone().unwrap_or(Value::Null);
    let critique_response = llm_evaluation
        .generate_with_audio(None, &eval_prompt_text, audio_bytes, mime_type, &schema, &options)
        .await?;
    check_cancel().await?;

    let total_segments = original_segments.len().max(llm_segments.len()) as i64;
    let critique = parse_critique_response(&critique_response.value, &original_segments, &llm_segments, evaluation_model, total_segments, Utc::now());
    evaluation.insert("critique".to_string(), critique);

    Ok(())
}
