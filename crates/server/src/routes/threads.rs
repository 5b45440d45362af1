//! `GET /api/threads/{thread_id}/history` (spec.md §6): the evaluation-run
//! history recorded against a thread. Not the generic history CRUD surface
//! spec.md §1/§9 keeps out of scope.

use axum::extract::{Path, State};
use axum::Json;
use evalengine_core::entities::HistoryEntry;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn thread_history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(state.repository.list_history_for_thread(&thread_id).await.map_err(ApiError::from)?))
}
