//! `GET/DELETE /api/eval-runs` and its sub-resources (spec.md §6).
//!
//! `POST /api/eval-runs/preview` takes the CSV body directly (`Content-Type:
//! text/csv`) rather than a multipart upload — the teacher's stack has no
//! multipart precedent anywhere in `gateway`, and spec.md never requires
//! multi-part framing, only "a CSV upload"; see DESIGN.md.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use evalengine_core::data_loader::DataLoader;
use evalengine_core::models::{AdversarialEvaluation, ApiLog, DailyVerdictCount, EvalRun, EvalRunStatsSummary, EvalType, ThreadEvaluation};
use evalengine_core::repository::EvalRunFilter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListEvalRunsQuery {
    pub app_id: Option<String>,
    pub eval_type: Option<String>,
    /// Legacy alias (spec.md §9 Open Questions): `"evaluate-batch"` ->
    /// `batch_thread`, `"adversarial"` -> `batch_adversarial`. Ignored if
    /// `eval_type` is also given; `eval_type` wins.
    pub command: Option<String>,
    pub listing_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub evaluator_id: Option<Uuid>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl From<ListEvalRunsQuery> for EvalRunFilter {
    fn from(query: ListEvalRunsQuery) -> Self {
        let eval_type = query
            .eval_type
            .or_else(|| query.command.as_deref().and_then(EvalType::from_legacy_command).map(|t| t.as_str().to_string()));
        EvalRunFilter {
            app_id: query.app_id,
            eval_type,
            listing_id: query.listing_id,
            session_id: query.session_id,
            evaluator_id: query.evaluator_id,
            status: query.status,
            limit: query.limit.clamp(1, 200),
            offset: query.offset.max(0),
        }
    }
}

pub async fn list_eval_runs(
    State(state): State<AppState>,
    Query(query): Query<ListEvalRunsQuery>,
) -> Result<Json<Vec<EvalRun>>, ApiError> {
    let filter: EvalRunFilter = query.into();
    let runs = state.repository.list_eval_runs(&filter).await.map_err(ApiError::from)?;
    Ok(Json(runs))
}

pub async fn get_eval_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<EvalRun>, ApiError> {
    Ok(Json(state.repository.get_eval_run(id).await.map_err(ApiError::from)?))
}

pub async fn delete_eval_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<(), ApiError> {
    state.repository.delete_eval_run(id).await.map_err(ApiError::from)?;
    Ok(())
}

pub async fn get_run_threads(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ThreadEvaluation>>, ApiError> {
    Ok(Json(state.repository.list_thread_evaluations(id).await.map_err(ApiError::from)?))
}

pub async fn get_run_adversarial(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AdversarialEvaluation>>, ApiError> {
    Ok(Json(state.repository.list_adversarial_evaluations(id).await.map_err(ApiError::from)?))
}

pub async fn get_run_logs(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Vec<ApiLog>>, ApiError> {
    Ok(Json(state.repository.list_api_logs_for_run(id).await.map_err(ApiError::from)?))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub run_id: Uuid,
}

pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<ApiLog>>, ApiError> {
    Ok(Json(state.repository.list_api_logs_for_run(query.run_id).await.map_err(ApiError::from)?))
}

pub async fn delete_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Result<(), ApiError> {
    state.repository.delete_api_logs_for_run(query.run_id).await.map_err(ApiError::from)?;
    Ok(())
}

pub async fn stats_summary(State(state): State<AppState>) -> Result<Json<EvalRunStatsSummary>, ApiError> {
    Ok(Json(state.repository.get_eval_run_stats_summary().await.map_err(ApiError::from)?))
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    #[serde(default = "default_trend_days")]
    pub days: i64,
}

fn default_trend_days() -> i64 {
    30
}

pub async fn trends(
    State(state): State<AppState>,
    Query(query): Query<TrendsQuery>,
) -> Result<Json<Vec<DailyVerdictCount>>, ApiError> {
    let days = query.days.clamp(1, 365);
    Ok(Json(state.repository.get_verdict_trends(days).await.map_err(ApiError::from)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub total_messages: usize,
    pub total_threads: usize,
    pub total_users: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)>,
    pub thread_ids: Vec<String>,
    pub intent_distribution: std::collections::BTreeMap<String, usize>,
    pub messages_with_errors: usize,
    pub messages_with_images: usize,
}

/// No persistence — the loader is built, summarized, and dropped.
pub async fn preview_eval_run(body: Bytes) -> Result<Json<PreviewResponse>, ApiError> {
    let csv_content = String::from_utf8(body.to_vec())
        .map_err(|e| evalengine_core::error::Error::validation(format!("CSV body is not valid UTF-8: {e}")))?;
    let loader = DataLoader::from_csv_content(&csv_content).map_err(ApiError::from)?;
    let stats = loader.get_statistics();
    let date_range = loader
        .messages()
        .iter()
        .map(|m| m.timestamp)
        .fold(None, |acc: Option<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)>, ts| match acc {
            None => Some((ts, ts)),
            Some((min, max)) => Some((min.min(ts), max.max(ts))),
        });

    Ok(Json(PreviewResponse {
        total_messages: stats.total_messages,
        total_threads: stats.total_threads,
        total_users: stats.total_users,
        date_range,
        thread_ids: loader.get_all_thread_ids(),
        intent_distribution: stats.intent_distribution.into_iter().collect(),
        messages_with_errors: stats.messages_with_errors,
        messages_with_images: stats.messages_with_images,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_query() -> ListEvalRunsQuery {
        ListEvalRunsQuery {
            app_id: None,
            eval_type: None,
            command: None,
            listing_id: None,
            session_id: None,
            evaluator_id: None,
            status: None,
            limit: default_limit(),
            offset: 0,
        }
    }

    #[test]
    fn eval_type_wins_over_legacy_command() {
        let mut query = base_query();
        query.eval_type = Some("human".to_string());
        query.command = Some("adversarial".to_string());
        let filter: EvalRunFilter = query.into();
        assert_eq!(filter.eval_type.as_deref(), Some("human"));
    }

    #[test]
    fn legacy_command_maps_to_eval_type() {
        let mut query = base_query();
        query.command = Some("adversarial".to_string());
        let filter: EvalRunFilter = query.into();
        assert_eq!(filter.eval_type.as_deref(), Some(EvalType::BatchAdversarial.as_str()));
    }

    #[test]
    fn unrecognized_legacy_command_leaves_eval_type_unset() {
        let mut query = base_query();
        query.command = Some("not-a-real-command".to_string());
        let filter: EvalRunFilter = query.into();
        assert_eq!(filter.eval_type, None);
    }

    #[test]
    fn limit_and_offset_are_clamped() {
        let mut query = base_query();
        query.limit = 10_000;
        query.offset = -5;
        let filter: EvalRunFilter = query.into();
        assert_eq!(filter.limit, 200);
        assert_eq!(filter.offset, 0);
    }
}
