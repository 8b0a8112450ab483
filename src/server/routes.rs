//! HTTP routes: member ingestion, options, health, and the WebSocket upgrade

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::domain::{IngestError, MemberReport};
use crate::hub::{Hub, HubError};

use super::websocket::websocket_handler;

/// Build the hub's router
pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/", get(websocket_handler).post(ingest_report))
        .route("/update-client", post(update_client))
        .route("/update-options", post(update_options))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(hub)
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Rejected member report");
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Request failed");
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn success() -> Json<Value> {
    Json(json!({ "status": "success" }))
}

/// Full report; waits for the policy decision
async fn ingest_report(State(hub): State<Hub>, body: Bytes) -> Result<Json<Value>, Response> {
    let report = MemberReport::from_slice(&body).map_err(IntoResponse::into_response)?;
    let task = hub
        .ingest_report(report, body.len())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(task))
}

/// Partial update; never runs the policy engine
async fn update_client(State(hub): State<Hub>, body: Bytes) -> Result<Json<Value>, Response> {
    let report = MemberReport::from_slice(&body).map_err(IntoResponse::into_response)?;
    let known = hub.update_member(report).await.map_err(IntoResponse::into_response)?;
    debug!(known, "update_client: done");
    Ok(success())
}

async fn update_options(State(hub): State<Hub>, body: Bytes) -> Result<Json<Value>, Response> {
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| IngestError::Malformed(e).into_response())?;
    hub.update_options(&raw);
    Ok(success())
}

async fn health_check() -> &'static str {
    "OK"
}
