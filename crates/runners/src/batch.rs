//! The `evaluate-batch` job runner (spec.md §4.9): loads a CSV data file,
//! runs the optional intent/correctness/efficiency judges over some or all
//! threads, and persists one `ThreadEvaluation` row per thread as it
//! completes.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/batch_runner.py`.
//! Deliberately sequential, not [`evalengine_core::parallel::run_parallel`]:
//! the audited provider's mutable `AuditContext` is set once per thread
//! before that thread's judge calls run, and concurrent threads would race
//! which `thread_id` gets attached to which `api_logs` row.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use evalengine_core::data_loader::DataLoader;
use evalengine_core::error::{Error, Result};
use evalengine_core::models::{EvalRun, EvalType, JobProgress, RunStatus, ThreadEvaluation, Verdict};
use evalengine_core::repository::Repository;
use evalengine_evaluators::{CorrectnessJudge, EfficiencyJudge, IntentJudge};
use evalengine_providers::AuditContext;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::provider_factory::create_llm_provider;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchJobParams {
    pub csv_content: String,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default)]
    pub llm_model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub intent_system_prompt: String,
    #[serde(default = "default_true")]
    pub evaluate_intent: bool,
    #[serde(default = "default_true")]
    pub evaluate_correctness: bool,
    #[serde(default = "default_true")]
    pub evaluate_efficiency: bool,
    #[serde(default)]
    pub thread_ids: Option<Vec<String>>,
    #[serde(default)]
    pub sample_size: Option<usize>,
}

fn default_app_id() -> String {
    "kaira-bot".to_string()
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f64 {
    0.1
}

/// A short fingerprint for the uploaded CSV, used the way the original's
/// `_file_hash` dedups by file path — there is no file path here, only the
/// content itself, so we fingerprint that instead.
fn content_fingerprint(content: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:012x}", hasher.finish())
}

fn resolve_thread_ids(loader: &DataLoader, params: &BatchJobParams) -> Vec<String> {
    if let Some(ids) = &params.thread_ids {
        if !ids.is_empty() {
            return ids.clone();
        }
    }
    let all_ids = loader.get_all_thread_ids();
    if let Some(sample_size) = params.sample_size {
        let mut rng = rand::thread_rng();
        let take = sample_size.min(all_ids.len());
        let mut shuffled = all_ids.clone();
        shuffled.shuffle(&mut rng);
        shuffled.truncate(take);
        return shuffled;
    }
    all_ids
}

const SEVERITY_ORDER: [Verdict; 5] = [
    Verdict::NotApplicable,
    Verdict::Pass,
    Verdict::SoftFail,
    Verdict::HardFail,
    Verdict::Critical,
];

fn severity_rank(v: Verdict) -> usize {
    SEVERITY_ORDER.iter().position(|s| *s == v).unwrap_or(0)
}

pub async fn run_batch_evaluation(
    repository: &Repository,
    job_id: Uuid,
    user_id: &str,
    params: BatchJobParams,
) -> Result<serde_json::Value> {
    let start = Instant::now();
    let run_id = Uuid::now_v7();

    let loader = DataLoader::from_csv_content(&params.csv_content)?;
    let ids_to_evaluate = resolve_thread_ids(&loader, &params);
    let total = ids_to_evaluate.len() as i64;
    let data_hash = content_fingerprint(&params.csv_content);

    let audited = create_llm_provider(&params.llm_provider, &params.api_key, &params.llm_model, repository.clone())?;
    audited.set_context(AuditContext {
        run_id: Some(run_id),
        thread_id: None,
    });
    let llm_model = audited.model_name().to_string();

    let intent_judge = params
        .evaluate_intent
        .then(|| IntentJudge::new(audited.clone(), params.intent_system_prompt.clone()));
    let config = repository.load_adversarial_config().await;
    let correctness_judge = params.evaluate_correctness.then(|| CorrectnessJudge::new(audited.clone(), config.clone()));
    let efficiency_judge = params.evaluate_efficiency.then(|| EfficiencyJudge::new(audited.clone(), config.clone()));

    let run = EvalRun {
        id: run_id,
        app_id: params.app_id.clone(),
        user_id: user_id.to_string(),
        eval_type: EvalType::BatchThread.as_str().to_string(),
        listing_id: None,
        session_id: None,
        evaluator_id: None,
        job_id: Some(job_id),
        status: RunStatus::Running.as_str().to_string(),
        error_message: None,
        started_at: Some(chrono::Utc::now()),
        completed_at: None,
        duration_ms: None,
        provider: Some(params.llm_provider.clone()),
        model: Some(llm_model),
        config: json!({"temperature": params.temperature, "dataFileHash": data_hash}),
        result: None,
        summary: None,
        batch_metadata: None,
        created_at: chrono::Utc::now(),
    };
    repository.insert_eval_run(&run).await?;

    let mut completed: i64 = 0;
    let mut errors: i64 = 0;
    let mut intent_accuracy_sum = 0.0_f64;
    let mut correctness_verdicts: BTreeMap<String, i64> = BTreeMap::new();
    let mut efficiency_verdicts: BTreeMap<String, i64> = BTreeMap::new();

    for (i, thread_id) in ids_to_evaluate.iter().enumerate() {
        let current = (i + 1) as i64;
        repository
            .update_job_progress(
                job_id,
                &JobProgress {
                    current,
                    total,
                    message: format!("Evaluating thread {current}/{total}"),
                    run_id: Some(run_id),
                    listing_id: None,
                    evaluator_id: None,
                },
            )
            .await?;

        if repository.is_job_cancelled(job_id).await? {
            repository.cancel_eval_run(run_id).await?;
            return Err(Error::JobCancelled);
        }

        audited.set_context(AuditContext {
            run_id: Some(run_id),
            thread_id: Some(thread_id.clone()),
        });

        let outcome = process_one_thread(
            &loader,
            thread_id,
            intent_judge.as_ref(),
            correctness_judge.as_ref(),
            efficiency_judge.as_ref(),
        )
        .await;

        match outcome {
            Ok(Some((mut thread_eval, intent_accuracy, worst_correctness, eff_verdict))) => {
                thread_eval.run_id = run_id;
                thread_eval.data_file_hash = Some(data_hash.clone());
                if let Some(accuracy) = intent_accuracy {
                    intent_accuracy_sum += accuracy;
                }
                *correctness_verdicts.entry(worst_correctness).or_insert(0) += 1;
                *efficiency_verdicts.entry(eff_verdict).or_insert(0) += 1;
                if let Err(e) = repository.insert_thread_evaluation(&thread_eval).await {
                    tracing::error!(thread_id, error = %e, "failed to persist thread evaluation");
                    errors += 1;
                } else {
                    completed += 1;
                }
            }
            Ok(None) => {
                tracing::warn!(thread_id, "thread not found in data file, skipping");
                errors += 1;
            }
            Err(e) => {
                tracing::error!(thread_id, error = %e, "error evaluating thread");
                errors += 1;
            }
        }
    }

    let avg_intent_accuracy = if completed > 0 { intent_accuracy_sum / completed as f64 } else { 0.0 };
    let summary = json!({
        "totalThreads": total,
        "completed": completed,
        "errors": errors,
        "avgIntentAccuracy": (avg_intent_accuracy * 10_000.0).round() / 10_000.0,
        "correctnessVerdicts": correctness_verdicts,
        "efficiencyVerdicts": efficiency_verdicts,
    });
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    repository.complete_eval_run(run_id, &summary, &serde_json::Value::Null, duration_ms).await?;

    Ok(json!({"runId": run_id, "durationMs": duration_ms, "summary": summary}))
}

type ThreadOutcome = Option<(ThreadEvaluation, Option<f64>, String, String)>;

async fn process_one_thread(
    loader: &DataLoader,
    thread_id: &str,
    intent_judge: Option<&IntentJudge>,
    correctness_judge: Option<&CorrectnessJudge>,
    efficiency_judge: Option<&EfficiencyJudge>,
) -> Result<ThreadOutcome> {
    let Some(thread) = loader.get_thread(thread_id) else {
        return Ok(None);
    };

    let intent_results = match intent_judge {
        Some(judge) => judge.evaluate_thread(&thread.messages).await?,
        None => Vec::new(),
    };

    let correctness_results = match correctness_judge {
        Some(judge) => judge.evaluate_thread(&thread.messages).await?,
        None => Vec::new(),
    };

    let efficiency_result = match efficiency_judge {
        Some(judge) => Some(judge.evaluate_thread(&thread).await),
        None => None,
    };

    let intent_accuracy = if intent_results.is_empty() {
        None
    } else {
        let correct = intent_results.iter().filter(|e| e.is_correct_intent).count();
        Some(correct as f64 / intent_results.len() as f64)
    };

    let worst_correctness = correctness_results
        .iter()
        .map(|e| e.verdict)
        .max_by_key(|v| severity_rank(*v))
        .unwrap_or(Verdict::NotApplicable);

    let eff_verdict_str = efficiency_result.as_ref().map(|e| e.verdict.as_str().to_string()).unwrap_or_else(|| "N/A".to_string());

    let result_data = json!({
        "intentEvaluations": intent_results,
        "correctnessEvaluations": correctness_results,
        "efficiencyEvaluation": efficiency_result,
        "successStatus": thread.is_successful(),
    });

    let thread_eval = ThreadEvaluation {
        id: 0,
        run_id: Uuid::nil(),
        thread_id: thread_id.to_string(),
        data_file_hash: None,
        intent_accuracy,
        worst_correctness: Some(worst_correctness.as_str().to_string()),
        efficiency_verdict: Some(eff_verdict_str.clone()),
        success_status: thread.is_successful(),
        result: result_data,
        created_at: chrono::Utc::now(),
    };

    Ok(Some((thread_eval, intent_accuracy, worst_correctness.as_str().to_string(), eff_verdict_str)))
}
