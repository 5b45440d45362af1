//! `GET/PUT /api/adversarial-config`, `POST .../reset`, `GET .../export`,
//! `POST .../import` (spec.md §6). Validation failures respond `422`
//! ([`crate::error::ConfigApiError`]) rather than the general `400`.

use axum::extract::State;
use axum::Json;
use evalengine_core::models::AdversarialConfig;
use evalengine_core::rules;

use crate::error::ConfigApiError;
use crate::state::AppState;

pub async fn get_config(State(state): State<AppState>) -> Json<AdversarialConfig> {
    Json(state.repository.load_adversarial_config().await)
}

pub async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<AdversarialConfig>,
) -> Result<Json<AdversarialConfig>, ConfigApiError> {
    state.repository.save_adversarial_config(&config).await.map_err(ConfigApiError::from)?;
    Ok(Json(config))
}

pub async fn reset_config(State(state): State<AppState>) -> Result<Json<AdversarialConfig>, ConfigApiError> {
    let config = rules::default_config();
    state.repository.save_adversarial_config(&config).await.map_err(ConfigApiError::from)?;
    Ok(Json(config))
}

pub async fn export_config(State(state): State<AppState>) -> Json<AdversarialConfig> {
    Json(state.repository.load_adversarial_config().await)
}

pub async fn import_config(
    State(state): State<AppState>,
    Json(config): Json<AdversarialConfig>,
) -> Result<Json<AdversarialConfig>, ConfigApiError> {
    state.repository.save_adversarial_config(&config).await.map_err(ConfigApiError::from)?;
    Ok(Json(config))
}
