//! Relay endpoint handlers.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use mediamesh_core::relay::{Fact, PullQuery, PullResponse};
use serde_json::{Value, json};

use crate::server::RelayState;

/// Longest long-poll a client may request.
pub const MAX_WAIT: Duration = Duration::from_secs(30);

pub async fn health(State(state): State<RelayState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "Mediamesh Relay",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "lastCursor": state.log.last_cursor(),
        "epoch": state.log.epoch(),
    }))
}

pub async fn push_facts(
    State(state): State<RelayState>,
    Json(fact): Json<Fact>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if fact.namespace.is_empty() || fact.key.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "namespace and key are required" })),
        ));
    }

    let fact_id = fact.metadata.fact_id.clone();
    let cursor = state.log.append(fact);
    tracing::debug!("Stored fact {} at cursor {}", fact_id, cursor);

    Ok(Json(json!({ "cursor": cursor })))
}

pub async fn pull_facts(
    State(state): State<RelayState>,
    Query(query): Query<PullQuery>,
) -> Json<PullResponse> {
    let wait = Duration::from_millis(query.wait_ms).min(MAX_WAIT);
    let facts = state
        .log
        .wait_for_facts(&query.namespace, query.after, wait)
        .await;

    Json(PullResponse {
        facts,
        epoch: state.log.epoch().to_string(),
    })
}
