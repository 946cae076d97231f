//! Reverse proxying to downstreams
//!
//! Forwards group-scoped requests to the owning downstream with the bridge
//! base URL injected via the configured base-URL header, so the downstream
//! emits bridge-correct `self` values. Bodies stream through untouched; a
//! buffered single-pass textual rewrite exists only as a fallback for
//! downstreams that ignore the header.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use tracing::{debug, warn};

use crate::bridge::BridgeState;
use crate::errors::{RegistryError, RegistryResult};

/// Request headers forwarded to the downstream.
const FORWARDED_REQUEST_HEADERS: &[header::HeaderName] = &[
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
];

/// Response headers preserved from the downstream.
const PRESERVED_RESPONSE_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::ETAG,
    header::LAST_MODIFIED,
    header::CACHE_CONTROL,
    header::LINK,
];

/// How much of a JSON body is scanned for the downstream's own URL before
/// deciding whether the rewrite fallback is needed.
const REWRITE_SCAN_WINDOW: usize = 64 * 1024;

/// Forward one request to a downstream and translate the response.
///
/// `path_and_query` must start with `/`. The outer deadline is the
/// configured request timeout; exceeding it yields `504 gateway_timeout`.
pub async fn forward(
    state: &BridgeState,
    downstream_base: &str,
    bridge_base: &str,
    method: &Method,
    path_and_query: &str,
    request_headers: &HeaderMap,
    request_id: &str,
) -> RegistryResult<Response> {
    let target = format!("{downstream_base}{path_and_query}");
    let reqwest_method = if *method == Method::GET {
        reqwest::Method::GET
    } else if *method == Method::HEAD {
        reqwest::Method::HEAD
    } else {
        return Err(RegistryError::api_not_found(path_and_query));
    };

    let mut request = state
        .proxy_client
        .request(reqwest_method, &target)
        .header(state.config.web.base_url_header.as_str(), bridge_base)
        .header("x-request-id", request_id);
    for name in FORWARDED_REQUEST_HEADERS {
        if let Some(value) = request_headers.get(name) {
            request = request.header(name, value);
        }
    }

    let deadline = state.config.web.request_timeout();
    let upstream = tokio::time::timeout(deadline, request.send())
        .await
        .map_err(|_| {
            RegistryError::timeout(format!(
                "downstream did not answer within {}s",
                deadline.as_secs()
            ))
        })?
        .map_err(|e| RegistryError::from_transport(&target, &e))?;

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status).header("x-request-id", request_id);
    let mut is_json = false;
    for name in PRESERVED_RESPONSE_HEADERS {
        if let Some(value) = upstream.headers().get(name.as_str()) {
            if *name == header::CONTENT_TYPE {
                is_json = value
                    .to_str()
                    .map(|v| v.starts_with("application/json") || v.contains("+json"))
                    .unwrap_or(false);
            }
            if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                builder = builder.header(name, value);
            }
        }
    }

    // Rewrite is a fallback for downstreams that ignored the base-URL
    // header; only JSON bodies are eligible, everything else streams.
    if is_json {
        let raw = tokio::time::timeout(deadline, upstream.bytes())
            .await
            .map_err(|_| RegistryError::timeout("downstream body read exceeded the deadline"))?
            .map_err(|e| RegistryError::from_transport(&target, &e))?;

        let body = if needs_rewrite(&raw, downstream_base) {
            warn!(
                target = %target,
                "downstream ignored the base-URL header, rewriting body"
            );
            let rewritten = rewrite_body(&raw, downstream_base, bridge_base);
            builder = builder.header(header::CONTENT_LENGTH, rewritten.len());
            Body::from(rewritten)
        } else {
            Body::from(raw)
        };
        return builder
            .body(body)
            .map_err(|e| RegistryError::internal(format!("cannot assemble proxy response: {e}")));
    }

    debug!(target = %target, status = status.as_u16(), "streaming proxied response");
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| RegistryError::internal(format!("cannot assemble proxy response: {e}")))
}

/// Fan a partitioned group type's listing out to every owner and union
/// the returned maps.
///
/// Listing bodies are JSON objects keyed by group id; the ids are
/// disjoint across owners per the startup validation, so the merge is a
/// plain union. The original query flags are forwarded to each owner
/// unchanged.
pub async fn merge_listing(
    state: &BridgeState,
    owners: &[crate::bridge::downstream::Downstream],
    bridge_base: &str,
    path_and_query: &str,
    request_id: &str,
) -> RegistryResult<serde_json::Value> {
    let deadline = state.config.web.request_timeout();

    let fetches = owners.iter().map(|owner| {
        let target = format!("{}{}", owner.base_url, path_and_query);
        let request = state
            .proxy_client
            .get(&target)
            .header(state.config.web.base_url_header.as_str(), bridge_base)
            .header("x-request-id", request_id);
        async move {
            let response = request
                .send()
                .await
                .map_err(|e| RegistryError::from_transport(&target, &e))?;
            if !response.status().is_success() {
                return Err(RegistryError::from_upstream_status(
                    &target,
                    response.status().as_u16(),
                ));
            }
            response.json::<serde_json::Value>().await.map_err(|e| {
                RegistryError::unavailable(format!("{target} returned unparsable JSON: {e}"))
            })
        }
    });

    let results = tokio::time::timeout(deadline, futures::future::join_all(fetches))
        .await
        .map_err(|_| {
            RegistryError::timeout(format!(
                "partitioned listing did not complete within {}s",
                deadline.as_secs()
            ))
        })?;

    let mut merged = serde_json::Map::new();
    for result in results {
        match result? {
            serde_json::Value::Object(map) => merged.extend(map),
            other => {
                return Err(RegistryError::unavailable(format!(
                    "owner returned a non-object listing: {other}"
                )));
            }
        }
    }
    Ok(serde_json::Value::Object(merged))
}

/// Scan the first window of the body for the downstream's configured URL.
fn needs_rewrite(raw: &[u8], downstream_base: &str) -> bool {
    let window = &raw[..raw.len().min(REWRITE_SCAN_WINDOW)];
    memmem(window, downstream_base.as_bytes())
}

/// Single-pass textual substitution of the downstream URL for the bridge
/// URL. The response is valid JSON both before and after because URLs only
/// appear inside string values.
fn rewrite_body(raw: &[u8], downstream_base: &str, bridge_base: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(raw);
    text.replace(downstream_base, bridge_base).into_bytes()
}

fn memmem(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_detection_scans_the_window() {
        let body = br#"{"self": "http://downstream:3100/noderegistries/npmjs.org"}"#;
        assert!(needs_rewrite(body, "http://downstream:3100"));
        assert!(!needs_rewrite(body, "http://other:9999"));
    }

    #[test]
    fn rewrite_substitutes_every_occurrence() {
        let body = br#"{"self": "http://d:3100/a", "versionsurl": "http://d:3100/a/versions"}"#;
        let rewritten = rewrite_body(body, "http://d:3100", "http://bridge");
        let text = String::from_utf8(rewritten).unwrap();
        assert_eq!(
            text,
            r#"{"self": "http://bridge/a", "versionsurl": "http://bridge/a/versions"}"#
        );
    }

    #[test]
    fn honoured_header_means_no_rewrite() {
        let body = br#"{"self": "http://bridge/noderegistries/npmjs.org/packages/express"}"#;
        assert!(!needs_rewrite(body, "http://downstream:3100"));
    }
}
