//! Request extractors and header interpretation
//!
//! [`RequestContext`] carries the request id and the authenticated client
//! principal; [`resolve_base_url`] implements the effective-base-URL
//! resolution order every `self` value derives from.

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// Default header a fronting proxy uses to dictate the base URL.
pub const DEFAULT_BASE_URL_HEADER: &str = "x-base-url";

/// Canonical form of a base-URL candidate from a header, the
/// configuration, or a downstream declaration.
///
/// `self` values are composed as `{base}{xid}`, so the base must carry a
/// scheme (headers like `x-forwarded-host` arrive without one; http is
/// assumed) and no trailing slash.
pub fn canonical_base(raw: &str) -> String {
    let candidate = raw.trim();
    let with_scheme = if candidate.contains("://") {
        candidate.to_string()
    } else {
        format!("http://{candidate}")
    };
    with_scheme.trim_end_matches('/').to_string()
}

/// Client principal decoded from `x-ms-client-principal` (base64 JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientPrincipal {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub claims: Vec<Value>,
}

impl ClientPrincipal {
    pub fn from_header(raw: &str) -> Option<Self> {
        let decoded = BASE64_STANDARD.decode(raw.trim()).ok()?;
        serde_json::from_slice(&decoded).ok()
    }

    /// Claim values, accepting both `["group-a"]` and
    /// `[{"typ": "groups", "val": "group-a"}]` shapes.
    pub fn claim_values(&self) -> Vec<String> {
        self.claims
            .iter()
            .filter_map(|claim| match claim {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map.get("val").and_then(|v| v.as_str()).map(String::from),
                _ => None,
            })
            .collect()
    }
}

/// Per-request context available to every handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub principal: Option<ClientPrincipal>,
    pub host: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let principal = headers
            .get("x-ms-client-principal")
            .and_then(|v| v.to_str().ok())
            .and_then(ClientPrincipal::from_header);

        let host = headers
            .get(axum::http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self {
            request_id,
            principal,
            host,
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// Resolve the effective base URL for one request, in order: the
/// configured base-URL header, `x-forwarded-proto`/`x-forwarded-host`, the
/// configured `base_url`, then the request's own `Host`.
pub fn resolve_base_url(
    headers: &HeaderMap,
    configured: Option<&str>,
    base_url_header: &str,
) -> String {
    if let Some(base) = headers
        .get(base_url_header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return canonical_base(base);
    }

    if let Some(host) = headers
        .get("x-forwarded-host")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or("http");
        return canonical_base(&format!("{proto}://{host}"));
    }

    if let Some(base) = configured.filter(|v| !v.is_empty()) {
        return canonical_base(base);
    }

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("localhost");
    canonical_base(&format!("http://{host}"))
}
