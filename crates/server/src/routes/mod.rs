//! Route modules, grounded on the teacher's `gateway/src/main.rs` pattern of
//! building one `Router` via chained `.route(...)` calls over an `AppState`.

pub mod adversarial_config;
pub mod eval_runs;
pub mod jobs;
pub mod threads;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/api/jobs/{id}", get(jobs::get_job))
        .route("/api/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/api/eval-runs", get(eval_runs::list_eval_runs))
        .route("/api/eval-runs/preview", post(eval_runs::preview_eval_run))
        .route("/api/eval-runs/stats/summary", get(eval_runs::stats_summary))
        .route("/api/eval-runs/trends", get(eval_runs::trends))
        .route("/api/eval-runs/logs", get(eval_runs::list_logs).delete(eval_runs::delete_logs))
        .route("/api/eval-runs/{id}", get(eval_runs::get_eval_run).delete(eval_runs::delete_eval_run))
        .route("/api/eval-runs/{id}/logs", get(eval_runs::get_run_logs))
        .route("/api/eval-runs/{id}/threads", get(eval_runs::get_run_threads))
        .route("/api/eval-runs/{id}/adversarial", get(eval_runs::get_run_adversarial))
        .route("/api/threads/{thread_id}/history", get(threads::thread_history))
        .route(
            "/api/adversarial-config",
            get(adversarial_config::get_config).put(adversarial_config::put_config),
        )
        .route("/api/adversarial-config/reset", post(adversarial_config::reset_config))
        .route("/api/adversarial-config/export", get(adversarial_config::export_config))
        .route("/api/adversarial-config/import", post(adversarial_config::import_config))
}
