//! Admin HTTP API.
//!
//! The surface `tidectl` talks to: read rollouts, apply specs, and drive
//! promotion, abort, retry, and restart. Handlers mutate status through the
//! same compare-and-swap write path the reconciler uses, then enqueue a
//! reconcile so the engine acts on the new signal.
//!
//! Error mapping: validation 422, not-found 404, stale-version conflict 409.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tideway_api::{validate_spec, RolloutPhase, RolloutSpec, RolloutStatus, ValidationError};
use tracing::info;

use crate::error::ControllerError;
use crate::queue::WorkQueue;
use crate::store::{RolloutRecord, RolloutStore};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn RolloutStore>,
    pub queue: Arc<WorkQueue>,
}

/// Build the admin API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/rollouts", get(list_rollouts))
        .route(
            "/v1/rollouts/{name}",
            get(get_rollout).put(apply_rollout).delete(delete_rollout),
        )
        .route("/v1/rollouts/{name}/promote", post(promote_rollout))
        .route("/v1/rollouts/{name}/abort", post(abort_rollout))
        .route("/v1/rollouts/{name}/retry", post(retry_rollout))
        .route("/v1/rollouts/{name}/restart", post(restart_rollout))
        .with_state(state)
}

/// A rollout as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct RolloutView {
    pub id: String,
    pub name: String,
    pub generation: i64,
    pub version: i64,
    pub spec: RolloutSpec,
    pub status: RolloutStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<RolloutRecord> for RolloutView {
    fn from(record: RolloutRecord) -> Self {
        Self {
            id: record.id.to_string(),
            name: record.spec.name.clone(),
            generation: record.generation,
            version: record.version,
            spec: record.spec,
            status: record.status,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PromoteRequest {
    /// Skip all remaining steps instead of completing one gate.
    #[serde(default)]
    pub full: bool,
}

/// API error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Handler-level error with an HTTP mapping.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "validation_error",
            message: message.into(),
        }
    }
}

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        match &e {
            ControllerError::Validation(_) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "validation_error",
                message: e.to_string(),
            },
            ControllerError::NotFound(_) => Self {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: e.to_string(),
            },
            ControllerError::Conflict { .. } => Self {
                status: StatusCode::CONFLICT,
                code: "conflict",
                message: e.to_string(),
            },
            _ => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

async fn list_rollouts(
    State(state): State<ApiState>,
) -> Result<Json<Vec<RolloutView>>, ApiError> {
    let records = state.store.list().await?;
    Ok(Json(records.into_iter().map(RolloutView::from).collect()))
}

async fn get_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<RolloutView>, ApiError> {
    let record = state.store.get(&name).await?;
    Ok(Json(record.into()))
}

async fn apply_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<RolloutView>, ApiError> {
    // Decode by hand so an unknown strategy kind or step variant surfaces
    // as a validation error, not a bare 400.
    let spec: RolloutSpec = serde_json::from_value(body)
        .map_err(|e| ApiError::from(ControllerError::Validation(ValidationError::Malformed(e.to_string()))))?;
    if spec.name != name {
        return Err(ApiError::validation(format!(
            "spec name '{}' does not match path '{}'",
            spec.name, name
        )));
    }
    validate_spec(&spec).map_err(ControllerError::Validation)?;

    let record = state.store.apply_spec(spec).await?;
    info!(rollout = %record.spec.name, generation = record.generation, "Spec applied");
    state.queue.enqueue(record.id);
    Ok(Json(record.into()))
}

async fn delete_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&name).await?;
    info!(rollout = %name, "Rollout deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn promote_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Option<Json<PromoteRequest>>,
) -> Result<Json<RolloutView>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let record = mutate_status(&state, &name, |status| {
        if status.phase == RolloutPhase::Degraded {
            return Err(ApiError::validation(
                "rollout is degraded; use retry to re-attempt it",
            ));
        }
        if request.full {
            status.promote_full = true;
        } else {
            status.promote_requested = true;
        }
        Ok(())
    })
    .await?;
    Ok(Json(record.into()))
}

async fn abort_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<RolloutView>, ApiError> {
    let record = mutate_status(&state, &name, |status| {
        status.abort = true;
        if status.message.is_none() {
            status.message = Some("rollout aborted by user request".to_string());
        }
        Ok(())
    })
    .await?;
    Ok(Json(record.into()))
}

async fn retry_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<RolloutView>, ApiError> {
    let record = mutate_status(&state, &name, |status| {
        if status.phase != RolloutPhase::Degraded {
            return Err(ApiError::validation("rollout is not degraded"));
        }
        status.abort = false;
        status.message = None;
        status.phase = RolloutPhase::Progressing;
        // Verdicts from the aborted attempt must not gate the retry.
        status.analysis_runs.clear();
        status.pause_conditions.clear();
        Ok(())
    })
    .await?;
    Ok(Json(record.into()))
}

async fn restart_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<RolloutView>, ApiError> {
    let record = state.store.get(&name).await?;
    let mut spec = record.spec;
    spec.restarted_at = Some(Utc::now());
    let updated = state.store.apply_spec(spec).await?;
    info!(rollout = %name, "Restart requested (template hash bumped)");
    state.queue.enqueue(updated.id);
    Ok(Json(updated.into()))
}

/// Read-modify-write a status through the CAS path, then wake the engine.
async fn mutate_status<F>(state: &ApiState, name: &str, mutate: F) -> Result<RolloutRecord, ApiError>
where
    F: FnOnce(&mut RolloutStatus) -> Result<(), ApiError>,
{
    let record = state.store.get(name).await?;
    let mut status = record.status.clone();
    mutate(&mut status)?;
    let updated = state
        .store
        .update_status(record.id, status, record.version)
        .await?;
    state.queue.enqueue(record.id);
    Ok(updated)
}
