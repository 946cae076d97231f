//! Bridge health endpoint
//!
//! `GET /health` (and its `/status` alias) report the monitor's view of
//! every downstream. The HTTP status mirrors the verdict: 200 when at
//! least one downstream is initialised and reachable, 503 otherwise.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use crate::bridge::SharedBridge;
use crate::bridge::health::health_document;
use crate::models::HealthStatus;
use crate::web::extractors::RequestContext;
use crate::web::responses::xregistry_response;

pub async fn health(State(state): State<SharedBridge>, context: RequestContext) -> Response {
    let document = health_document(&state);
    let status = match document.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = serde_json::to_value(&document).unwrap_or_else(|_| serde_json::json!({}));
    xregistry_response(status, &body, &HeaderMap::new(), &context.request_id, vec![])
}
