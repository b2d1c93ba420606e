//! HTTP route handlers: health, session merge and read, faults, scenarios.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ce_interchange::{
    parse_request, DeviationPayload, FaultPayload, InterchangeError, MergeResponse, MergeStatus,
    ResolvedDocument,
};
use ce_storage::{ScenarioSource, SessionStore, StorageError};
use ce_sync::SyncError;
use tracing::{error, warn};

use super::json_error;
use super::state::AppState;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

/// Map a coordinator error to its HTTP status and JSON body.
fn sync_error_response(err: SyncError) -> Response {
    let message = err.to_string();
    match err {
        SyncError::Invalid(InterchangeError::DocumentMismatch { .. }) | SyncError::Merge(_) => {
            json_error(StatusCode::CONFLICT, &message).into_response()
        }
        SyncError::Invalid(_) => json_error(StatusCode::BAD_REQUEST, &message).into_response(),
        SyncError::UnknownScenario { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, &message).into_response()
        }
        SyncError::SessionNotFound { .. } => {
            json_error(StatusCode::NOT_FOUND, &message).into_response()
        }
        SyncError::SyncFailed {
            document_id,
            last_error,
            request,
            ..
        } => {
            warn!(document_id = %document_id, error = %last_error, "answering sync_failed");
            let mut body = serde_json::to_value(MergeResponse::sync_failed(*request))
                .unwrap_or_else(|_| serde_json::json!({}));
            body["error"] = serde_json::Value::String(message);
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
        SyncError::OutOfOrder { request, .. } => {
            let mut body = serde_json::to_value(MergeResponse::sync_failed(*request))
                .unwrap_or_else(|_| serde_json::json!({}));
            body["error"] = serde_json::Value::String(message);
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        SyncError::Storage(e) => {
            error!(error = %e, "storage error");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &message).into_response()
        }
    }
}

/// POST /sessions/{document_id}/merge
pub(crate) async fn handle_merge(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Json(parsed): Json<serde_json::Value>,
) -> Response {
    let request = match parse_request(&parsed) {
        Ok(r) => r,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response(),
    };
    if let Err(e) = request.check_document(&document_id) {
        return sync_error_response(e.into());
    }

    match state
        .coordinator
        .submit_with_timeout(request, state.round_trip_timeout)
        .await
    {
        Ok(response) => {
            let status = match response.status {
                MergeStatus::Queued => StatusCode::ACCEPTED,
                _ => StatusCode::OK,
            };
            (status, Json(response)).into_response()
        }
        Err(e) => sync_error_response(e),
    }
}

/// GET /sessions/{document_id}
pub(crate) async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Response {
    let view = match state.coordinator.session(&document_id).await {
        Ok(v) => v,
        Err(e) => return sync_error_response(e),
    };
    let document = &view.stored.document;
    let deviations: Vec<DeviationPayload> =
        view.report.deviations.iter().map(DeviationPayload::from).collect();
    let faults: Vec<FaultPayload> = view.report.faults.iter().map(FaultPayload::from).collect();

    let response = serde_json::json!({
        "document": ResolvedDocument {
            document_id: document.document_id.clone(),
            scenario_id: document.scenario_id.clone(),
            vector_clock: document.vector_clock.clone(),
            steps: view.resolved.clone(),
        },
        "version": view.stored.version,
        "updated_at": view.stored.updated_at,
        "overall_status": view.report.overall_status,
        "review_required": document.review_required(),
        "deviations": deviations,
        "faults": faults,
        "findings": view.report.findings,
    });
    (StatusCode::OK, Json(response)).into_response()
}

/// GET /sessions/{document_id}/faults
pub(crate) async fn handle_get_faults(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Response {
    let store = state.coordinator.store();
    match store.get_document(&document_id).await {
        Ok(_) => {}
        Err(StorageError::DocumentNotFound { .. }) => {
            return json_error(
                StatusCode::NOT_FOUND,
                &format!("session '{}' not found", document_id),
            )
            .into_response()
        }
        Err(e) => return sync_error_response(e.into()),
    }
    match store.list_faults(&document_id).await {
        Ok(faults) => {
            let faults: Vec<FaultPayload> = faults.iter().map(FaultPayload::from).collect();
            let response = serde_json::json!({
                "document_id": document_id,
                "faults": faults,
            });
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => sync_error_response(e.into()),
    }
}

/// GET /scenarios
pub(crate) async fn handle_list_scenarios(State(state): State<Arc<AppState>>) -> Response {
    match state.coordinator.scenarios().list_scenarios().await {
        Ok(scenarios) => {
            let list: Vec<serde_json::Value> = scenarios
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "scenario_id": s.scenario_id,
                        "name": s.name,
                        "step_count": s.steps.len(),
                        "mandatory_steps": s.mandatory_steps().count(),
                    })
                })
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "scenarios": list }))).into_response()
        }
        Err(e) => sync_error_response(e.into()),
    }
}
