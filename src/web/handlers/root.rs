//! Unified root, model, and capabilities
//!
//! Synthesised locally from the cached per-downstream fragments; no
//! downstream round-trip happens on these paths. All URLs are rooted at
//! the bridge's effective base URL.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::Response;
use serde_json::{Map, Value, json};

use crate::bridge::SharedBridge;
use crate::catalog::filter::ListFlags;
use crate::models::{BRIDGE_REGISTRY_ID, SPECVERSION};
use crate::utils::datetime::to_rfc3339;
use crate::web::extractors::{RequestContext, resolve_base_url};
use crate::web::responses::{problem_response, xregistry_response};

fn bridge_base(state: &SharedBridge, headers: &HeaderMap) -> String {
    resolve_base_url(
        headers,
        state.config.web.base_url.as_deref(),
        &state.config.web.base_url_header,
    )
}

fn parse_flags(uri: &Uri, context: &RequestContext) -> Result<ListFlags, Response> {
    ListFlags::from_query(uri.query())
        .map_err(|e| problem_response(&e, uri.path(), &context.request_id))
}

/// Assemble the unified root entity.
pub fn unified_root_body(state: &SharedBridge, base: &str, flags: &ListFlags) -> Value {
    let mut obj = Map::new();
    obj.insert("specversion".to_string(), json!(SPECVERSION));
    obj.insert("registryid".to_string(), json!(BRIDGE_REGISTRY_ID));
    obj.insert("xid".to_string(), json!("/"));
    obj.insert("self".to_string(), json!(format!("{base}/")));
    if !flags.noepoch {
        obj.insert("epoch".to_string(), json!(state.current_epoch()));
    }
    obj.insert(
        "createdat".to_string(),
        json!(to_rfc3339(state.entity_state.get_created_at("/"))),
    );
    obj.insert(
        "modifiedat".to_string(),
        json!(to_rfc3339(state.entity_state.get_modified_at("/"))),
    );

    let counts = state.group_counts();
    for group_type in state.group_types() {
        obj.insert(
            format!("{group_type}url"),
            json!(format!("{base}/{group_type}")),
        );
        obj.insert(
            format!("{group_type}count"),
            json!(counts.get(&group_type).copied().unwrap_or(0)),
        );
    }
    obj.insert("modelurl".to_string(), json!(format!("{base}/model")));
    obj.insert(
        "capabilitiesurl".to_string(),
        json!(format!("{base}/capabilities")),
    );

    if let Some(inline) = &flags.inline {
        if inline.includes("capabilities") {
            obj.insert(
                "capabilities".to_string(),
                serde_json::to_value(state.merged_capabilities()).unwrap_or_else(|_| json!({})),
            );
        }
        if inline.includes("model") || inline.includes("modelsource") {
            obj.insert(
                "model".to_string(),
                serde_json::to_value(state.merged_model()).unwrap_or_else(|_| json!({})),
            );
        }
        // Group collections stay URL pointers: they live on the owning
        // downstreams and the bridge does not fan out on a root read.
    }

    Value::Object(obj)
}

pub async fn unified_root(
    State(state): State<SharedBridge>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = bridge_base(&state, &headers);
    let body = unified_root_body(&state, &base, &flags);
    xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![])
}

pub async fn unified_model(
    State(state): State<SharedBridge>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = parse_flags(&uri, &context) {
        return response;
    }
    let body = serde_json::to_value(state.merged_model()).unwrap_or_else(|_| json!({}));
    xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![])
}

pub async fn unified_capabilities(
    State(state): State<SharedBridge>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = parse_flags(&uri, &context) {
        return response;
    }
    let body = serde_json::to_value(state.merged_capabilities()).unwrap_or_else(|_| json!({}));
    xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![])
}

/// `GET /export` redirects to the self-contained doc view of the root.
pub async fn export(
    State(state): State<SharedBridge>,
    context: RequestContext,
    headers: HeaderMap,
) -> Response {
    let base = bridge_base(&state, &headers);
    Response::builder()
        .status(StatusCode::FOUND)
        .header(
            header::LOCATION,
            format!("{base}/?doc&inline=*,capabilities,modelsource"),
        )
        .header("x-request-id", &context.request_id)
        .body(Body::empty())
        .unwrap_or_else(|_| {
            axum::response::IntoResponse::into_response(StatusCode::INTERNAL_SERVER_ERROR)
        })
}
