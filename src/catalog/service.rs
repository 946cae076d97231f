//! HTTP surface for one backend
//!
//! Builds an `axum::Router` exposing a single backend's xRegistry tree.
//! Handlers stay thin: flag parsing and base-URL resolution happen at the
//! boundary, assembly is delegated to [`CatalogEngine`], and every payload
//! goes out through the shared response helpers.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::Response;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::engine::{CatalogEngine, ListPage};
use crate::catalog::filter::ListFlags;
use crate::errors::RegistryError;
use crate::models::{HealthStatus, SPECVERSION};
use crate::web::extractors::{RequestContext, resolve_base_url};
use crate::web::responses::{next_link, problem_response, xregistry_response};

/// Shared state for one backend's router.
#[derive(Clone)]
pub struct CatalogService {
    pub engine: Arc<CatalogEngine>,
    /// Configured `BASE_URL`, consulted after the forwarding headers.
    pub base_url: Option<String>,
    /// Header a fronting bridge uses to dictate the base URL.
    pub base_url_header: String,
}

impl CatalogService {
    fn base(&self, headers: &HeaderMap) -> String {
        resolve_base_url(headers, self.base_url.as_deref(), &self.base_url_header)
    }
}

/// Router serving one backend's xRegistry surface.
pub fn catalog_router(service: CatalogService) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/model", get(model))
        .route("/capabilities", get(capabilities))
        .route("/export", get(export))
        .route("/health", get(health))
        .route("/{group_type}", get(groups))
        .route("/{group_type}/{group_id}", get(group))
        .route("/{group_type}/{group_id}/{resource_type}", get(resources))
        .route(
            "/{group_type}/{group_id}/{resource_type}/{resource_id}",
            get(resource),
        )
        .route(
            "/{group_type}/{group_id}/{resource_type}/{resource_id}/meta",
            get(meta),
        )
        .route(
            "/{group_type}/{group_id}/{resource_type}/{resource_id}/versions",
            get(versions),
        )
        .route(
            "/{group_type}/{group_id}/{resource_type}/{resource_id}/versions/{version_id}",
            get(version),
        )
        .route(
            "/{group_type}/{group_id}/{resource_type}/{resource_id}/versions/{version_id}/meta",
            get(version_meta),
        )
        .fallback(not_found)
        .layer(cors_layer())
        .with_state(service)
}

/// CORS policy shared with the bridge: read-only methods, xRegistry
/// response headers exposed, preflight cached for a day.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::HEAD,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([
            header::HeaderName::from_static("x-registry-id"),
            header::HeaderName::from_static("x-registry-version"),
            header::HeaderName::from_static("x-registry-epoch"),
            header::HeaderName::from_static("x-registry-self"),
            header::LINK,
            header::ETAG,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::LAST_MODIFIED,
        ])
        .max_age(std::time::Duration::from_secs(86_400))
}

fn parse_flags(uri: &Uri, context: &RequestContext) -> Result<ListFlags, Response> {
    ListFlags::from_query(uri.query())
        .map_err(|e| problem_response(&e, uri.path(), &context.request_id))
}

fn check_group_type(
    service: &CatalogService,
    group_type: &str,
    uri: &Uri,
    context: &RequestContext,
) -> Result<(), Response> {
    if service.engine.descriptor().group_type == group_type {
        Ok(())
    } else {
        Err(problem_response(
            &RegistryError::api_not_found(uri.path()),
            uri.path(),
            &context.request_id,
        ))
    }
}

fn check_resource_type(
    service: &CatalogService,
    resource_type: &str,
    uri: &Uri,
    context: &RequestContext,
) -> Result<(), Response> {
    if service.engine.descriptor().resource_type == resource_type {
        Ok(())
    } else {
        Err(problem_response(
            &RegistryError::api_not_found(uri.path()),
            uri.path(),
            &context.request_id,
        ))
    }
}

fn page_response(
    page: ListPage,
    flags: &ListFlags,
    service: &CatalogService,
    uri: &Uri,
    headers: &HeaderMap,
    context: &RequestContext,
) -> Response {
    let mut extra = vec![("x-registry-count", page.total.to_string())];
    if page.has_more {
        let limit = service.engine.effective_limit(flags);
        extra.push(("link", next_link(uri, page.next_offset, limit)));
    }
    xregistry_response(StatusCode::OK, &page.body, headers, &context.request_id, extra)
}

async fn root(
    State(service): State<CatalogService>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service.engine.root(&base, &flags).await {
        Ok(body) => xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![]),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn model(
    State(service): State<CatalogService>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = parse_flags(&uri, &context) {
        return response;
    }
    let body = service.engine.model();
    xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![])
}

async fn capabilities(
    State(service): State<CatalogService>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = parse_flags(&uri, &context) {
        return response;
    }
    let body = service.engine.capabilities();
    xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![])
}

/// `GET /export` is shorthand for the self-contained doc view.
async fn export(
    State(service): State<CatalogService>,
    context: RequestContext,
    headers: HeaderMap,
) -> Response {
    let base = service.base(&headers);
    let location = format!("{base}/?doc&inline=*,capabilities,modelsource");
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .header("x-request-id", &context.request_id)
        .body(Body::empty())
        .unwrap_or_else(|_| {
            axum::response::IntoResponse::into_response(StatusCode::INTERNAL_SERVER_ERROR)
        })
}

async fn health(State(service): State<CatalogService>, context: RequestContext) -> Response {
    let body = serde_json::json!({
        "status": HealthStatus::Healthy,
        "specversion": SPECVERSION,
        "registryid": service.engine.descriptor().registry_id,
        "catalogSize": service.engine.catalog().len(),
        "timestamp": chrono::Utc::now(),
    });
    xregistry_response(
        StatusCode::OK,
        &body,
        &HeaderMap::new(),
        &context.request_id,
        vec![],
    )
}

async fn groups(
    State(service): State<CatalogService>,
    Path(group_type): Path<String>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_group_type(&service, &group_type, &uri, &context) {
        return response;
    }
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service.engine.groups(&base, &flags).await {
        Ok(page) => page_response(page, &flags, &service, &uri, &headers, &context),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn group(
    State(service): State<CatalogService>,
    Path((group_type, group_id)): Path<(String, String)>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_group_type(&service, &group_type, &uri, &context) {
        return response;
    }
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service.engine.group(&base, &group_id, &flags).await {
        Ok(body) => xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![]),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn resources(
    State(service): State<CatalogService>,
    Path((group_type, group_id, resource_type)): Path<(String, String, String)>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_group_type(&service, &group_type, &uri, &context) {
        return response;
    }
    if let Err(response) = check_resource_type(&service, &resource_type, &uri, &context) {
        return response;
    }
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service.engine.resources(&base, &group_id, &flags).await {
        Ok(page) => page_response(page, &flags, &service, &uri, &headers, &context),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn resource(
    State(service): State<CatalogService>,
    Path((group_type, group_id, resource_type, resource_id)): Path<(String, String, String, String)>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_group_type(&service, &group_type, &uri, &context) {
        return response;
    }
    if let Err(response) = check_resource_type(&service, &resource_type, &uri, &context) {
        return response;
    }
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service
        .engine
        .resource(&base, &group_id, &resource_id, &flags)
        .await
    {
        Ok(body) => xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![]),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn meta(
    State(service): State<CatalogService>,
    Path((group_type, group_id, resource_type, resource_id)): Path<(String, String, String, String)>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_group_type(&service, &group_type, &uri, &context) {
        return response;
    }
    if let Err(response) = check_resource_type(&service, &resource_type, &uri, &context) {
        return response;
    }
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service
        .engine
        .meta(&base, &group_id, &resource_id, &flags)
        .await
    {
        Ok(body) => xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![]),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn versions(
    State(service): State<CatalogService>,
    Path((group_type, group_id, resource_type, resource_id)): Path<(String, String, String, String)>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_group_type(&service, &group_type, &uri, &context) {
        return response;
    }
    if let Err(response) = check_resource_type(&service, &resource_type, &uri, &context) {
        return response;
    }
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service
        .engine
        .versions(&base, &group_id, &resource_id, &flags)
        .await
    {
        Ok(page) => page_response(page, &flags, &service, &uri, &headers, &context),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn version(
    State(service): State<CatalogService>,
    Path((group_type, group_id, resource_type, resource_id, version_id)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_group_type(&service, &group_type, &uri, &context) {
        return response;
    }
    if let Err(response) = check_resource_type(&service, &resource_type, &uri, &context) {
        return response;
    }
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service
        .engine
        .version(&base, &group_id, &resource_id, &version_id, &flags)
        .await
    {
        Ok(body) => xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![]),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn version_meta(
    State(service): State<CatalogService>,
    Path((group_type, group_id, resource_type, resource_id, version_id)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    context: RequestContext,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = check_group_type(&service, &group_type, &uri, &context) {
        return response;
    }
    if let Err(response) = check_resource_type(&service, &resource_type, &uri, &context) {
        return response;
    }
    let flags = match parse_flags(&uri, &context) {
        Ok(flags) => flags,
        Err(response) => return response,
    };
    let base = service.base(&headers);
    match service
        .engine
        .version_meta(&base, &group_id, &resource_id, &version_id, &flags)
        .await
    {
        Ok(body) => xregistry_response(StatusCode::OK, &body, &headers, &context.request_id, vec![]),
        Err(e) => problem_response(&e, uri.path(), &context.request_id),
    }
}

async fn not_found(context: RequestContext, uri: Uri) -> Response {
    problem_response(
        &RegistryError::api_not_found(uri.path()),
        uri.path(),
        &context.request_id,
    )
}
