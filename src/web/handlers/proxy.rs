//! Group-scoped reverse proxy handlers
//!
//! Paths under `/{groupType}` resolve through the router maps: an
//! unpartitioned type has a single owner and is forwarded directly; a
//! partitioned type routes on the addressed group id, and its bare
//! listing is answered by fanning out to every owner and merging the
//! slices. Owners that are uninitialised or unhealthy yield 503.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;

use crate::bridge::{RouteTarget, SharedBridge, proxy};
use crate::web::extractors::{RequestContext, resolve_base_url};
use crate::web::responses::{problem_response, xregistry_response};

/// `GET /{groupType}`
pub async fn proxy_group(
    State(state): State<SharedBridge>,
    Path(group_type): Path<String>,
    context: RequestContext,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let target = match state.route(&group_type, None) {
        Ok(target) => target,
        Err(e) => return problem_response(&e, uri.path(), &context.request_id),
    };

    match target {
        RouteTarget::One(downstream) => {
            forward(&state, &downstream.base_url, &context, &method, &uri, &headers).await
        }
        RouteTarget::Many(owners) => {
            let bridge_base = bridge_base(&state, &headers);
            match proxy::merge_listing(
                &state,
                &owners,
                &bridge_base,
                &path_and_query(&uri),
                &context.request_id,
            )
            .await
            {
                Ok(body) => {
                    let count = body.as_object().map(|m| m.len()).unwrap_or(0);
                    xregistry_response(
                        StatusCode::OK,
                        &body,
                        &headers,
                        &context.request_id,
                        vec![("x-registry-count", count.to_string())],
                    )
                }
                Err(e) => problem_response(&e, uri.path(), &context.request_id),
            }
        }
    }
}

/// `GET /{groupType}/{*rest}` — the first `rest` segment is the group id.
pub async fn proxy_group_subtree(
    State(state): State<SharedBridge>,
    Path((group_type, rest)): Path<(String, String)>,
    context: RequestContext,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let group_id = rest.split('/').next().unwrap_or(rest.as_str());
    let downstream = match state.route(&group_type, Some(group_id)) {
        Ok(RouteTarget::One(downstream)) => downstream,
        Ok(RouteTarget::Many(_)) => {
            return problem_response(
                &crate::errors::RegistryError::internal(
                    "group-id routing resolved to multiple owners",
                ),
                uri.path(),
                &context.request_id,
            );
        }
        Err(e) => return problem_response(&e, uri.path(), &context.request_id),
    };

    forward(&state, &downstream.base_url, &context, &method, &uri, &headers).await
}

fn bridge_base(state: &SharedBridge, headers: &HeaderMap) -> String {
    resolve_base_url(
        headers,
        state.config.web.base_url.as_deref(),
        &state.config.web.base_url_header,
    )
}

fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

async fn forward(
    state: &SharedBridge,
    downstream_base: &str,
    context: &RequestContext,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Response {
    match proxy::forward(
        state,
        downstream_base,
        &bridge_base(state, headers),
        method,
        &path_and_query(uri),
        headers,
        &context.request_id,
    )
    .await
    {
        Ok(response) => response,
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}
