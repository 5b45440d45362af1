//! The `evaluate-custom-batch` job runner (spec.md §4.9): runs several
//! custom evaluators against the same listing or chat session, each as its
//! own [`run_custom_evaluator`] sub-run with its own `EvalRun`/`History`
//! row.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/voice_rx_batch_custom_runner.py`.
//! Unlike `batch.rs`/`adversarial.rs`, each sub-run builds its own audited
//! provider and sets its own `AuditContext`, so there's no shared mutable
//! state to race on — this is the one runner that actually parallelizes,
//! via [`evalengine_core::parallel::run_parallel`], when `params.parallel`
//! is true (the default).

use std::sync::Arc;
use std::time::Duration;

use evalengine_core::error::{Error, Result};
use evalengine_core::file_storage::FileStorage;
use evalengine_core::models::JobProgress;
use evalengine_core::parallel::{run_parallel, ItemOutcome, RunParallelOptions};
use evalengine_core::repository::Repository;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::custom::{run_custom_evaluator, CustomJobParams};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CustomBatchJobParams {
    pub evaluator_ids: Vec<Uuid>,
    #[serde(default)]
    pub listing_id: Option<Uuid>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_parallel() -> bool {
    true
}

pub async fn run_custom_batch_evaluator(
    repository: &Repository,
    storage: &FileStorage,
    job_id: Uuid,
    params: CustomBatchJobParams,
) -> Result<Value> {
    let mut valid_ids = Vec::with_capacity(params.evaluator_ids.len());
    for eid in &params.evaluator_ids {
        match repository.get_evaluator(*eid).await {
            Ok(Some(_)) => valid_ids.push(*eid),
            Ok(None) => tracing::warn!(evaluator_id = %eid, "evaluator not found, skipping"),
            Err(e) => {
                tracing::warn!(evaluator_id = %eid, error = %e, "failed to look up evaluator, skipping")
            }
        }
    }

    if valid_ids.is_empty() {
        return Err(Error::validation("no valid evaluators found"));
    }

    let total = valid_ids.len() as i64;
    repository
        .update_job_progress(
            job_id,
            &JobProgress {
                current: 0,
                total,
                message: format!("Starting {total} evaluators..."),
                run_id: None,
                listing_id: params.listing_id,
                evaluator_id: None,
            },
        )
        .await?;

    let mut eval_run_ids: Vec<Value> = Vec::with_capacity(valid_ids.len());
    let mut completed: i64 = 0;
    let mut errors: i64 = 0;

    if params.parallel {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<JobProgress>();
        let progress_repo = repository.clone();
        let progress_task = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                let _ = progress_repo.update_job_progress(job_id, &progress).await;
            }
        });

        let repo_for_workers = repository.clone();
        let storage_for_workers = storage.clone();
        let listing_id = params.listing_id;
        let session_id = params.session_id;

        let results = run_parallel(
            valid_ids.clone(),
            move |_index, eid: Uuid| {
                let repository = repo_for_workers.clone();
                let storage = storage_for_workers.clone();
                async move {
                    run_custom_evaluator(
                        &repository,
                        &storage,
                        job_id,
                        CustomJobParams { evaluator_id: eid, listing_id, session_id },
                    )
                    .await
                }
            },
            RunParallelOptions {
                concurrency: 4,
                job_id,
                inter_item_delay: Duration::ZERO,
                cancellation: Arc::new(repository.clone()),
            },
            |update| {
                let _ = tx.send(JobProgress {
                    current: update.completed as i64,
                    total,
                    message: update.message.to_string(),
                    run_id: None,
                    listing_id: params.listing_id,
                    evaluator_id: None,
                });
            },
        )
        .await;

        drop(tx);
        let _ = progress_task.await;

        for (eid, outcome) in valid_ids.iter().zip(results) {
            match outcome {
                ItemOutcome::Ok(value) => {
                    eval_run_ids.push(value.get("runId").cloned().unwrap_or(Value::Null));
                    completed += 1;
                }
                ItemOutcome::Err(e) => {
                    errors += 1;
                    tracing::error!(evaluator_id = %eid, error = %e, "batch custom eval failed");
                    eval_run_ids.push(Value::Null);
                }
            }
        }
    } else {
        for (i, eid) in valid_ids.iter().enumerate() {
            repository
                .update_job_progress(
                    job_id,
                    &JobProgress {
                        current: i as i64,
                        total,
                        message: format!("Running evaluator {}/{total}...", i + 1),
                        run_id: None,
                        listing_id: params.listing_id,
                        evaluator_id: None,
                    },
                )
                .await?;

            if repository.is_job_cancelled(job_id).await? {
                return Err(Error::JobCancelled);
            }

            let sub_params = CustomJobParams {
                evaluator_id: *eid,
                listing_id: params.listing_id,
                session_id: params.session_id,
            };
            match run_custom_evaluator(repository, storage, job_id, sub_params).await {
                Ok(value) => {
                    eval_run_ids.push(value.get("runId").cloned().unwrap_or(Value::Null));
                    completed += 1;
                }
                Err(e) => {
                    errors += 1;
                    tracing::error!(evaluator_id = %eid, error = %e, "batch custom eval failed");
                    eval_run_ids.push(Value::Null);
                }
            }
        }
    }

    repository
        .update_job_progress(
            job_id,
            &JobProgress {
                current: total,
                total,
                message: format!("Completed: {completed} success, {errors} failed"),
                run_id: None,
                listing_id: params.listing_id,
                evaluator_id: None,
            },
        )
        .await?;

    Ok(json!({
        "total": total,
        "completed": completed,
        "errors": errors,
        "evalRunIds": eval_run_ids,
    }))
}
