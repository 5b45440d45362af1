//! `POST/GET /api/jobs`, `GET /api/jobs/{id}`, `POST /api/jobs/{id}/cancel`
//! (spec.md §6). Validates only that `job_type` names one of the five
//! runners; the params shape itself is checked by the worker at dispatch
//! time (spec.md §7: an unknown job type or malformed params fails the job,
//! it does not reject job creation).

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use evalengine_core::models::{Job, JobProgress, JobStatus, JobType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub params: Value,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct JobResponse(Job);

impl From<Job> for JobResponse {
    fn from(mut job: Job) -> Self {
        job.strip_csv_content();
        Self(job)
    }
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    JobType::from_str(&request.job_type).map_err(ApiError::from)?;

    let job = Job {
        id: Uuid::new_v4(),
        user_id: request.user_id.unwrap_or_else(|| "default".to_string()),
        job_type: request.job_type,
        status: JobStatus::Queued.as_str().to_string(),
        params: request.params,
        progress: JobProgress::default(),
        result: None,
        error_message: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    };
    state.repository.insert_job(&job).await.map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let jobs = state
        .repository
        .list_jobs(query.status.as_deref(), query.limit.clamp(1, 200), query.offset.max(0))
        .await
        .map_err(ApiError::from)?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<JobResponse>, ApiError> {
    let job = state.repository.get_job(id).await.map_err(ApiError::from)?;
    Ok(Json(job.into()))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    state.repository.cancel_job(id).await.map_err(ApiError::from)?;
    state.cancel_set.mark(id).await;
    let job = state.repository.get_job(id).await.map_err(ApiError::from)?;
    Ok(Json(job.into()))
}
