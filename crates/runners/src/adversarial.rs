//! The `evaluate-adversarial` job runner (spec.md §4.9, §4.10): generates a
//! batch of synthetic adversarial test cases, drives each one through a live
//! conversation against the chat API under test, judges the resulting
//! transcript, and persists one `AdversarialEvaluation` row per case as it
//! completes.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/adversarial_runner.py`
//! and `adversarial_evaluator.py`. Sequential like `batch.rs`, for the same
//! reason: the audited provider's `AuditContext` is set once per run (there
//! is no per-thread context here, only `run_id` — adversarial cases don't
//! correspond to a stored thread), and the turn/case delays are meant to
//! pace requests against the live chat API, not to be parallelized away.

use std::time::{Duration, Instant};

use evalengine_core::error::{Error, Result};
use evalengine_core::models::{AdversarialEvaluation, EvalRun, EvalType, JobProgress, RunStatus};
use evalengine_core::repository::Repository;
use evalengine_evaluators::{AdversarialJudge, ChatApiClient, ConversationAgent};
use evalengine_providers::AuditContext;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::provider_factory::create_llm_provider;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdversarialJobParams {
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default)]
    pub kaira_api_url: String,
    #[serde(default)]
    pub kaira_auth_token: String,
    #[serde(default = "default_test_count")]
    pub test_count: usize,
    #[serde(default)]
    pub extra_instructions: Option<String>,
    #[serde(default = "default_turn_delay_secs")]
    pub turn_delay_secs: f64,
    #[serde(default = "default_case_delay_secs")]
    pub case_delay_secs: f64,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default)]
    pub llm_model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_app_id() -> String {
    "kaira-bot".to_string()
}

fn default_test_count() -> usize {
    15
}

fn default_turn_delay_secs() -> f64 {
    1.5
}

fn default_case_delay_secs() -> f64 {
    3.0
}

fn default_max_turns() -> u32 {
    10
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

fn default_temperature() -> f64 {
    0.1
}

pub async fn run_adversarial_evaluation(
    repository: &Repository,
    job_id: Uuid,
    user_id: &str,
    params: AdversarialJobParams,
) -> Result<serde_json::Value> {
    let start = Instant::now();
    let run_id = Uuid::now_v7();
    let total = params.test_count as i64;

    let config = repository.load_adversarial_config().await;

    let audited = create_llm_provider(&params.llm_provider, &params.api_key, &params.llm_model, repository.clone())?;
    audited.set_context(AuditContext {
        run_id: Some(run_id),
        thread_id: None,
    });
    let llm_model = audited.model_name().to_string();

    // Create the run record first so a generation failure below still shows
    // up as a failed run in the UI, not a silently-lost job.
    let run = EvalRun {
        id: run_id,
        app_id: params.app_id.clone(),
        user_id: user_id.to_string(),
        eval_type: EvalType::BatchAdversarial.as_str().to_string(),
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
        config: json!({"temperature": params.temperature, "maxTurns": params.max_turns}),
        result: None,
        summary: None,
        batch_metadata: Some(serde_json::to_value(&config).map_err(|e| Error::internal(e.to_string()))?),
        created_at: chrono::Utc::now(),
    };
    repository.insert_eval_run(&run).await?;

    // Write run_id into job progress immediately so the frontend can redirect
    // to the run page before any test case has finished.
    repository
        .update_job_progress(
            job_id,
            &JobProgress {
                current: 0,
                total,
                message: "Generating adversarial test cases...".to_string(),
                run_id: Some(run_id),
                listing_id: None,
                evaluator_id: None,
            },
        )
        .await?;

    match run_cases(repository, job_id, run_id, user_id, &params, audited.clone(), config).await {
        Ok(summary) => {
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            repository.complete_eval_run(run_id, &summary, &serde_json::Value::Null, duration_ms).await?;
            Ok(json!({"runId": run_id, "durationMs": duration_ms, "summary": summary}))
        }
        Err(Error::JobCancelled) => {
            repository.cancel_eval_run(run_id).await?;
            Err(Error::JobCancelled)
        }
        Err(e) => {
            repository.fail_eval_run(run_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn run_cases(
    repository: &Repository,
    job_id: Uuid,
    run_id: Uuid,
    user_id: &str,
    params: &AdversarialJobParams,
    audited: std::sync::Arc<evalengine_providers::AuditedProvider<Box<dyn evalengine_providers::LlmProvider>>>,
    config: evalengine_core::models::AdversarialConfig,
) -> Result<serde_json::Value> {
    let total = params.test_count as i64;
    let judge = AdversarialJudge::new(audited.clone(), config);
    let test_cases = judge.generate_test_cases(params.test_count, params.extra_instructions.as_deref()).await?;

    let agent = ConversationAgent::new(audited.clone(), params.max_turns);
    let client = ChatApiClient::new(params.kaira_auth_token.clone(), params.kaira_api_url.clone());
    let turn_delay = Duration::from_secs_f64(params.turn_delay_secs);
    let case_delay = Duration::from_secs_f64(params.case_delay_secs);

    let mut verdict_distribution: std::collections::BTreeMap<String, i64> = std::collections::BTreeMap::new();
    let mut category_distribution: std::collections::BTreeMap<String, i64> = std::collections::BTreeMap::new();
    let mut goal_achieved_count: i64 = 0;
    let mut completed: i64 = 0;

    for (i, test_case) in test_cases.iter().enumerate() {
        let current = (i + 1) as i64;
        if i > 0 {
            tokio::time::sleep(case_delay).await;
        }

        repository
            .update_job_progress(
                job_id,
                &JobProgress {
                    current,
                    total,
                    message: format!("Running adversarial case {current}/{total} ({})", test_case.category),
                    run_id: Some(run_id),
                    listing_id: None,
                    evaluator_id: None,
                },
            )
            .await?;

        if repository.is_job_cancelled(job_id).await? {
            return Err(Error::JobCancelled);
        }

        let transcript = agent.run_conversation(test_case, &client, user_id, turn_delay).await;

        let judged = match judge.evaluate_transcript(test_case, &transcript).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(category = %test_case.category, error = %e, "adversarial judge call failed");
                continue;
            }
        };

        let result_value = json!({
            "testCase": judged.test_case,
            "transcript": judged.transcript,
            "verdict": judged.verdict,
            "failureModes": judged.failure_modes,
            "reasoning": judged.reasoning,
            "goalAchieved": judged.goal_achieved,
            "ruleCompliance": judged.rule_compliance,
        });

        let row = AdversarialEvaluation {
            id: 0,
            run_id,
            category: Some(judged.test_case.category.clone()),
            difficulty: Some(format!("{:?}", judged.test_case.difficulty).to_uppercase()),
            verdict: Some(judged.verdict.as_str().to_string()),
            goal_achieved: judged.goal_achieved,
            total_turns: judged.transcript.total_turns as i32,
            result: result_value,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = repository.insert_adversarial_evaluation(&row).await {
            tracing::error!(category = %test_case.category, error = %e, "failed to persist adversarial evaluation");
            continue;
        }

        *verdict_distribution.entry(judged.verdict.as_str().to_string()).or_insert(0) += 1;
        *category_distribution.entry(judged.test_case.category.clone()).or_insert(0) += 1;
        if judged.goal_achieved {
            goal_achieved_count += 1;
        }
        completed += 1;
    }

    Ok(json!({
        "totalTests": completed,
        "verdictDistribution": verdict_distribution,
        "categoryDistribution": category_distribution,
        "goalAchievedCount": goal_achieved_count,
    }))
}
