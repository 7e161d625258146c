use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use recap_store::document::{ConfigDocument, ConfigPatch};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigStateResponse {
    pub has_password: bool,
    pub unlocked: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

/// `GET /api/config/state`
pub async fn config_state(State(state): State<Arc<AppState>>) -> Json<ConfigStateResponse> {
    Json(ConfigStateResponse {
        has_password: state.store.has_password(),
        unlocked: state.store.is_unlocked(),
    })
}

/// `POST /api/config/unlock`
///
/// On success the persisted document is loaded, installed as the live
/// snapshot and returned in full.
///
/// # Errors
/// 400 without a password set or with an empty password, 401 on mismatch,
/// 500 if the persisted document cannot be read back.
pub async fn config_unlock(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PasswordRequest>,
) -> ApiResult<Json<ConfigDocument>> {
    if !state.store.has_password() {
        return Err(ApiError::BadRequest("no configuration password has been set".into()));
    }
    let password = request.password.trim();
    if password.is_empty() {
        return Err(ApiError::BadRequest("password is required".into()));
    }

    state.store.unlock(password)?;
    let doc = state.store.load_config()?;
    state.coordinator.replace(doc.clone());
    Ok(Json(doc))
}

/// `POST /api/config/password`
///
/// First-time call (`{password}`) sets the initial password and persists
/// the current snapshot under it. Rotation (`{old_password,
/// new_password}`) verifies the old password, re-encrypts the stored
/// items under the new key and persists the snapshot again.
///
/// # Errors
/// 400 for missing/short passwords, 401 for a wrong old password.
pub async fn config_password(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PasswordRequest>,
) -> ApiResult<Json<ConfigStateResponse>> {
    if !state.store.has_password() {
        let password = request.password.trim();
        if password.is_empty() {
            return Err(ApiError::BadRequest("password must not be empty".into()));
        }
        state.store.set_password(password)?;

        // Make the running configuration durable right away. Failure here
        // is logged, not fatal: the password itself is already set.
        if let Err(err) = state.store.save_config(&state.coordinator.document()) {
            warn!("initial configuration persist failed: {err}");
        }
        return Ok(Json(ConfigStateResponse {
            has_password: true,
            unlocked: true,
        }));
    }

    let old_password = request.old_password.trim();
    let new_password = request.new_password.trim();
    if old_password.is_empty() || new_password.is_empty() {
        return Err(ApiError::BadRequest(
            "both the old and the new password are required".into(),
        ));
    }

    if state.store.is_unlocked() {
        state.store.verify_password(old_password)?;
    } else {
        state.store.unlock(old_password)?;
    }

    state.store.update_password(new_password)?;
    state.store.save_config(&state.coordinator.document())?;

    Ok(Json(ConfigStateResponse {
        has_password: true,
        unlocked: true,
    }))
}

/// `GET /api/config`
///
/// # Errors
/// 403 while the store is locked or no password has been set; the full
/// document is only served from an unlocked store.
pub async fn config_get(State(state): State<Arc<AppState>>) -> ApiResult<Json<ConfigDocument>> {
    if !state.store.is_unlocked() {
        return Err(ApiError::Forbidden(
            "configuration is locked; unlock it with the password first".into(),
        ));
    }
    Ok(Json(state.coordinator.document()))
}

/// `POST /api/config`
///
/// Accepts a partial patch; omitted fields are left untouched. With no
/// password set the update still applies in memory (the skipped
/// persistence is logged by the coordinator).
///
/// # Errors
/// 403 while a password exists and the store is locked, 500 on
/// non-lock-state persistence failures.
pub async fn config_update(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<ConfigPatch>,
) -> ApiResult<Json<ConfigDocument>> {
    if state.store.has_password() && !state.store.is_unlocked() {
        return Err(ApiError::Forbidden(
            "configuration is locked; unlock it before saving changes".into(),
        ));
    }
    let doc = state.coordinator.update(&patch)?;
    Ok(Json(doc))
}
