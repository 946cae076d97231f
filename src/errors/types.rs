//! Error type definitions
//!
//! [`RegistryError`] variants correspond one-to-one with the problem types
//! the registry can emit. Transport failures from upstreams are classified
//! into the taxonomy by [`RegistryError::from_transport`] so callers never
//! leak raw client errors onto the wire.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Base URI under which problem `type` values are minted.
pub const PROBLEM_TYPE_BASE: &str = "https://xregistry.io/errors";

/// Registry-level error, one variant per problem type.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// Malformed flag or attribute value (400).
    #[error("invalid data: {detail}")]
    InvalidData { detail: String },

    /// Unknown flag, attribute, or unsupported operator (400).
    #[error("capability error: {detail}")]
    CapabilityError { detail: String },

    /// Missing group, resource, or version (404).
    #[error("entity not found: {xid}")]
    EntityNotFound { xid: String },

    /// Path shape the registry does not serve (404).
    #[error("api not found: {path}")]
    ApiNotFound { path: String },

    /// Missing or rejected credentials (401).
    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String },

    /// Authenticated but not permitted (403).
    #[error("forbidden: {detail}")]
    Forbidden { detail: String },

    /// Unexpected internal failure (500).
    #[error("internal error: {detail}")]
    Internal { detail: String },

    /// Downstream or upstream unreachable, or enrichment budget exhausted
    /// with no partial answer (503).
    #[error("service unavailable: {detail}")]
    ServiceUnavailable { detail: String },

    /// Proxy or upstream deadline exceeded (504).
    #[error("gateway timeout: {detail}")]
    GatewayTimeout { detail: String },
}

impl RegistryError {
    pub fn invalid_data(detail: impl Into<String>) -> Self {
        Self::InvalidData {
            detail: detail.into(),
        }
    }

    pub fn capability(detail: impl Into<String>) -> Self {
        Self::CapabilityError {
            detail: detail.into(),
        }
    }

    pub fn entity_not_found(xid: impl Into<String>) -> Self {
        Self::EntityNotFound { xid: xid.into() }
    }

    pub fn api_not_found(path: impl Into<String>) -> Self {
        Self::ApiNotFound { path: path.into() }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized {
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::GatewayTimeout {
            detail: detail.into(),
        }
    }

    /// Short machine-readable code, also the final path segment of `type`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidData { .. } => "invalid_data",
            Self::CapabilityError { .. } => "capability_error",
            Self::EntityNotFound { .. } => "entity_not_found",
            Self::ApiNotFound { .. } => "api_not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::Internal { .. } => "internal_error",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::GatewayTimeout { .. } => "gateway_timeout",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidData { .. } | Self::CapabilityError { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::EntityNotFound { .. } | Self::ApiNotFound { .. } => 404,
            Self::Internal { .. } => 500,
            Self::ServiceUnavailable { .. } => 503,
            Self::GatewayTimeout { .. } => 504,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidData { .. } => "Invalid data",
            Self::CapabilityError { .. } => "Capability error",
            Self::EntityNotFound { .. } => "Entity not found",
            Self::ApiNotFound { .. } => "API not found",
            Self::Unauthorized { .. } => "Unauthorized",
            Self::Forbidden { .. } => "Forbidden",
            Self::Internal { .. } => "Internal error",
            Self::ServiceUnavailable { .. } => "Service unavailable",
            Self::GatewayTimeout { .. } => "Gateway timeout",
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::InvalidData { detail }
            | Self::CapabilityError { detail }
            | Self::Unauthorized { detail }
            | Self::Forbidden { detail }
            | Self::Internal { detail }
            | Self::ServiceUnavailable { detail }
            | Self::GatewayTimeout { detail } => detail.clone(),
            Self::EntityNotFound { xid } => format!("no entity at {xid}"),
            Self::ApiNotFound { path } => format!("no API at {path}"),
        }
    }

    /// Classify a transport-level failure against an upstream or downstream.
    ///
    /// DNS/connect failures become `service_unavailable`, timeouts become
    /// `gateway_timeout`, upstream 4xx map onto the equivalent registry
    /// error, upstream 5xx onto `service_unavailable`.
    pub fn from_transport(target: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::timeout(format!("{target} did not respond in time"));
        }
        if err.is_connect() {
            return Self::unavailable(format!("{target} is unreachable"));
        }
        if let Some(status) = err.status() {
            return Self::from_upstream_status(target, status.as_u16());
        }
        Self::unavailable(format!("request to {target} failed: {err}"))
    }

    /// Map an upstream HTTP status onto the registry taxonomy.
    pub fn from_upstream_status(target: &str, status: u16) -> Self {
        match status {
            404 => Self::entity_not_found(target),
            400 => Self::invalid_data(format!("{target} rejected the request")),
            401 | 403 => Self::unauthorized(format!("{target} rejected the credentials")),
            500..=599 => Self::unavailable(format!("{target} returned {status}")),
            _ => Self::internal(format!("{target} returned unexpected status {status}")),
        }
    }

    /// Render as an RFC 9457 problem document for the given request URI.
    pub fn to_problem(&self, instance: &str) -> ProblemDetails {
        ProblemDetails {
            problem_type: format!("{PROBLEM_TYPE_BASE}/{}", self.code()),
            title: self.title().to_string(),
            status: self.status(),
            instance: instance.to_string(),
            detail: Some(self.detail()),
            extensions: serde_json::Map::new(),
        }
    }
}

/// RFC 9457 problem document, emitted as `application/problem+json`.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub instance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Extension members such as `expectedEpoch` / `actualEpoch`.
    #[serde(flatten)]
    pub extensions: serde_json::Map<String, Value>,
}

impl ProblemDetails {
    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }
}

/// Startup-time configuration failure; terminates the process with exit
/// code 2 rather than mapping onto an HTTP response.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Read(#[from] figment::Error),

    #[error("invalid downstream URL '{url}': {reason}")]
    InvalidDownstreamUrl { url: String, reason: String },

    #[error("downstream '{url}' declares no groups")]
    EmptyGroups { url: String },

    #[error("duplicate group '{group_type}/{group_id}' declared by '{first}' and '{second}'")]
    DuplicateGroup {
        group_type: String,
        group_id: String,
        first: String,
        second: String,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(RegistryError::invalid_data("x").status(), 400);
        assert_eq!(RegistryError::capability("x").status(), 400);
        assert_eq!(RegistryError::unauthorized("x").status(), 401);
        assert_eq!(RegistryError::entity_not_found("/a/b").status(), 404);
        assert_eq!(RegistryError::api_not_found("/nope").status(), 404);
        assert_eq!(RegistryError::unavailable("x").status(), 503);
        assert_eq!(RegistryError::timeout("x").status(), 504);
    }

    #[test]
    fn problem_document_shape() {
        let problem = RegistryError::entity_not_found("/noderegistries/missing")
            .to_problem("/noderegistries/missing");
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["type"], format!("{PROBLEM_TYPE_BASE}/entity_not_found"));
        assert_eq!(json["status"], 404);
        assert_eq!(json["instance"], "/noderegistries/missing");
        assert!(json["detail"].as_str().unwrap().contains("/noderegistries/missing"));
    }

    #[test]
    fn problem_extensions_flatten() {
        let problem = RegistryError::invalid_data("epoch mismatch")
            .to_problem("/")
            .with_extension("expectedEpoch", serde_json::json!(4))
            .with_extension("actualEpoch", serde_json::json!(2));
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["expectedEpoch"], 4);
        assert_eq!(json["actualEpoch"], 2);
    }

    #[test]
    fn upstream_status_mapping() {
        assert_eq!(
            RegistryError::from_upstream_status("npm", 404).status(),
            404
        );
        assert_eq!(
            RegistryError::from_upstream_status("npm", 500).status(),
            503
        );
        assert_eq!(
            RegistryError::from_upstream_status("npm", 403).status(),
            401
        );
    }
}
