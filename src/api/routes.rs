//! API route definitions.

use super::state::AppState;
use crate::signal::{IncidentSignal, SignalSpec};
use crate::storage;
use crate::triage::TriageError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::error;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/investigate", post(investigate))
        .route("/incidents", get(list_incidents))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Run a full investigation for the posted signal. The assembled case is
/// written to the case log and returned.
async fn investigate(
    State(state): State<AppState>,
    Json(spec): Json<SignalSpec>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let signal = IncidentSignal::new(spec)
        .map_err(TriageError::from)
        .map_err(into_error_response)?;

    let case = state
        .pipeline
        .investigate(signal)
        .await
        .map_err(into_error_response)?;

    if let Err(e) = storage::save_case(&state.pool, &case) {
        error!(case_id = %case.id, "Failed to persist case: {e:#}");
    }

    Ok(Json(json!({ "data": case })))
}

async fn list_incidents(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let cases = storage::list_recent_cases(&state.pool, 20).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{e:#}") })),
        )
    })?;
    let total = cases.len();
    Ok(Json(json!({ "data": cases, "meta": { "total": total } })))
}

fn into_error_response(err: TriageError) -> (StatusCode, Json<Value>) {
    match err {
        TriageError::InvalidSignal(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string(), "stage": "signal" })),
        ),
        TriageError::EvidenceRetrieval(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": format!("{e:#}"), "stage": "evidence-retrieval" })),
        ),
        // The computed assessment is still valid; hand it back with the error.
        TriageError::Generation { outcome, source } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": format!("{source:#}"),
                "stage": "generation",
                "data": { "outcome": outcome }
            })),
        ),
    }
}
