//! HTTP response helpers
//!
//! Every xRegistry payload is emitted with the schema-tagged JSON content
//! type, a strong ETag (honouring `If-None-Match`), and the request id.
//! Errors are RFC 9457 problem documents.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::Response;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::RegistryError;
use crate::models::SPECVERSION;

/// Content type for every xRegistry payload.
pub fn xregistry_content_type() -> String {
    format!("application/json; charset=utf-8; schema=\"xRegistry-json/{SPECVERSION}\"")
}

/// Strong ETag over the serialized body.
pub fn etag_of(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Serialize an entity and wrap it in the standard response envelope.
///
/// A matching `If-None-Match` short-circuits to `304 Not Modified`.
pub fn xregistry_response(
    status: StatusCode,
    body: &Value,
    request_headers: &HeaderMap,
    request_id: &str,
    extra_headers: Vec<(&'static str, String)>,
) -> Response {
    let raw = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let etag = etag_of(&raw);

    if let Some(if_none_match) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if if_none_match == etag || if_none_match == "*" {
            return respond(StatusCode::NOT_MODIFIED, &etag, request_id, extra_headers, Body::empty());
        }
    }

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, xregistry_content_type())
        .header(header::ETAG, &etag)
        .header("x-request-id", request_id);
    for (name, value) in extra_headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(raw))
        .unwrap_or_else(|_| axum::response::IntoResponse::into_response(StatusCode::INTERNAL_SERVER_ERROR))
}

fn respond(
    status: StatusCode,
    etag: &str,
    request_id: &str,
    extra_headers: Vec<(&'static str, String)>,
    body: Body,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::ETAG, etag)
        .header("x-request-id", request_id);
    for (name, value) in extra_headers {
        builder = builder.header(name, value);
    }
    builder
        .body(body)
        .unwrap_or_else(|_| axum::response::IntoResponse::into_response(StatusCode::INTERNAL_SERVER_ERROR))
}

/// Render a [`RegistryError`] as an `application/problem+json` response.
pub fn problem_response(error: &RegistryError, instance: &str, request_id: &str) -> Response {
    let problem = error.to_problem(instance);
    let raw = serde_json::to_vec(&problem).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(header::CONTENT_TYPE, "application/problem+json")
        .header("x-request-id", request_id)
        .body(Body::from(raw))
        .unwrap_or_else(|_| axum::response::IntoResponse::into_response(StatusCode::INTERNAL_SERVER_ERROR))
}

/// Build the `Link: <...>; rel="next"` value for the following page,
/// preserving every other query flag (including repeated `filter`s).
pub fn next_link(uri: &Uri, next_offset: usize, limit: usize) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();
    if let Some(query) = uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key != "offset" && key != "limit" {
                pairs.push((key.into_owned(), value.into_owned()));
            }
        }
    }
    pairs.push(("limit".to_string(), limit.to_string()));
    pairs.push(("offset".to_string(), next_offset.to_string()));

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    format!("<{}?{}>; rel=\"next\"", uri.path(), serializer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_type_carries_schema() {
        assert_eq!(
            xregistry_content_type(),
            "application/json; charset=utf-8; schema=\"xRegistry-json/1.0-rc2\""
        );
    }

    #[test]
    fn etag_is_stable_and_quoted() {
        let a = etag_of(b"{}");
        let b = etag_of(b"{}");
        assert_eq!(a, b);
        assert!(a.starts_with('"') && a.ends_with('"'));
        assert_ne!(a, etag_of(b"{\"x\":1}"));
    }

    #[test]
    fn if_none_match_yields_304() {
        let body = json!({"xid": "/"});
        let raw = serde_json::to_vec(&body).unwrap();
        let etag = etag_of(&raw);

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, etag.parse().unwrap());
        let response = xregistry_response(StatusCode::OK, &body, &headers, "req-1", vec![]);
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn next_link_preserves_flags_and_replaces_offset() {
        let uri: Uri = "/noderegistries/npmjs.org/packages?filter=name%3D*azure*&sort=name%3Dasc&limit=10&offset=10"
            .parse()
            .unwrap();
        let link = next_link(&uri, 20, 10);
        assert!(link.starts_with("</noderegistries/npmjs.org/packages?"));
        assert!(link.contains("filter=name%3D*azure*"));
        assert!(link.contains("offset=20"));
        assert!(link.contains("limit=10"));
        assert!(link.ends_with("; rel=\"next\""));
        assert_eq!(link.matches("offset=").count(), 1);
    }

    #[test]
    fn problem_response_is_problem_json() {
        let response = problem_response(
            &RegistryError::api_not_found("/nope"),
            "/nope",
            "req-2",
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
