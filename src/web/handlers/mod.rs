//! Bridge HTTP handlers
//!
//! Thin handlers over the bridge state: unified root/model/capabilities
//! synthesis, health, and the group-scoped reverse proxy.

pub mod health;
pub mod proxy;
pub mod root;

use axum::http::Uri;
use axum::response::Response;

use crate::errors::RegistryError;
use crate::web::extractors::RequestContext;
use crate::web::responses::problem_response;

/// Fallback for paths outside the registry surface.
pub async fn not_found(context: RequestContext, uri: Uri) -> Response {
    problem_response(
        &RegistryError::api_not_found(uri.path()),
        uri.path(),
        &context.request_id,
    )
}
