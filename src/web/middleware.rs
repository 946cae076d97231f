//! HTTP middleware
//!
//! Request logging with timing and request ids, and the optional
//! authentication gate in front of every non-health path.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, Uri};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{info, warn};

use crate::bridge::SharedBridge;
use crate::errors::RegistryError;
use crate::web::extractors::RequestContext;
use crate::web::responses::problem_response;

/// Log every request with its id, status, and timing.
pub async fn request_logging_middleware(
    method: Method,
    uri: Uri,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let request_id = RequestContext::from_headers(request.headers()).request_id;

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration = start.elapsed();

    if status >= 400 {
        warn!(
            method = %method,
            uri = %uri,
            status,
            request_id = %request_id,
            duration_ms = duration.as_millis() as u64,
            "request completed with error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status,
            request_id = %request_id,
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );
    }

    response
}

/// Authentication gate.
///
/// Active only when an API key or required-groups set is configured.
/// `/health` and `/status` always bypass; CORS preflights pass through;
/// the localhost bypass is opt-in configuration because it trusts the
/// spoofable `Host` header.
pub async fn auth_middleware(
    State(state): State<SharedBridge>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let auth = &state.config.auth;
    if !auth.enabled() {
        return next.run(request).await;
    }

    let path = request.uri().path();
    if path == "/health" || path == "/status" || request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let context = RequestContext::from_headers(request.headers());

    if auth.allow_localhost_bypass && is_localhost(context.host.as_deref()) {
        return next.run(request).await;
    }

    if let Some(api_key) = &auth.api_key {
        if let Some(header) = request
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            let presented = header.strip_prefix("Bearer ").unwrap_or(header);
            if presented == api_key {
                return next.run(request).await;
            }
        }
    }

    if !auth.required_groups.is_empty() {
        if let Some(principal) = &context.principal {
            let claims = principal.claim_values();
            if claims.iter().any(|c| auth.required_groups.contains(c)) {
                return next.run(request).await;
            }
        }
    }

    let instance = request.uri().path().to_string();
    problem_response(
        &RegistryError::unauthorized("missing or rejected credentials"),
        &instance,
        &context.request_id,
    )
}

fn is_localhost(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if let Some(stripped) = host.strip_prefix('[') {
        // Bracketed IPv6 literal, optionally with a port.
        return stripped.split(']').next() == Some("::1");
    }
    let hostname = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    matches!(hostname, "localhost" | "127.0.0.1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_detection_handles_ports() {
        assert!(is_localhost(Some("localhost")));
        assert!(is_localhost(Some("localhost:8080")));
        assert!(is_localhost(Some("127.0.0.1:8080")));
        assert!(is_localhost(Some("[::1]:8080")));
        assert!(!is_localhost(Some("bridge.example")));
        assert!(!is_localhost(None));
    }
}
