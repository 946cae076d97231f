//! Upstream adapter contract
//!
//! One adapter fronts one upstream package registry (npm, PyPI, Maven
//! Central, NuGet, OCI, MCP). Adapters live outside this crate; the engine
//! depends only on this trait. Every method honours task cancellation by
//! being a plain future the caller can drop.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RegistryResult;

/// How package identifiers compare for this upstream.
///
/// NuGet and npm scopes match case-insensitively; PyPI normalised names and
/// Maven coordinates are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameNormalization {
    #[default]
    Preserve,
    Lowercase,
}

impl NameNormalization {
    pub fn apply(&self, name: &str) -> String {
        match self {
            Self::Preserve => name.to_string(),
            Self::Lowercase => name.to_lowercase(),
        }
    }
}

/// Full metadata for one resource (package) as the upstream reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// The upstream's identifier for the resource.
    pub resource_id: String,
    /// Domain attributes (name, description, license, homepage, ...).
    /// Ordered so emitted JSON is deterministic.
    pub attributes: BTreeMap<String, Value>,
    /// Version identifiers, oldest first.
    pub versions: Vec<String>,
    /// The version the upstream calls latest/default, if any.
    pub default_version: Option<String>,
    /// Upstream change fingerprint, when the upstream supplies one.
    pub etag: Option<String>,
}

impl ResourceMetadata {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Per-version metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version_id: String,
    pub attributes: BTreeMap<String, Value>,
}

/// Result of one `list_names` call.
#[derive(Debug, Clone)]
pub struct NameListing {
    /// Complete identifier set (bootstrap) or the post-cursor additions
    /// merged into the complete set by the adapter (incremental).
    pub names: Vec<String>,
    /// Cursor to present on the next call (`commitTimeStamp`, ETag,
    /// `Last-Modified`, ...).
    pub cursor: Option<String>,
    /// False when the upstream signalled the cursor is still current, in
    /// which case `names` may be empty and the caller keeps its snapshot.
    pub changed: bool,
}

/// Contract each upstream client implements.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Identifier comparison rule for this upstream.
    fn normalization(&self) -> NameNormalization {
        NameNormalization::Preserve
    }

    /// Whether a package exists upstream.
    async fn exists(&self, name: &str) -> RegistryResult<bool>;

    /// Full package metadata.
    async fn fetch_resource(&self, name: &str) -> RegistryResult<ResourceMetadata>;

    /// Metadata for one version of a package.
    async fn fetch_version(&self, name: &str, version: &str) -> RegistryResult<VersionMetadata>;

    /// All known package identifiers, optionally relative to a cursor from a
    /// previous call.
    async fn list_names(&self, cursor: Option<&str>) -> RegistryResult<NameListing>;

    /// Narrow the candidate set via the upstream's search service, when it
    /// has one. `Ok(None)` means no search service is available.
    async fn search(&self, _query: &str) -> RegistryResult<Option<Vec<String>>> {
        Ok(None)
    }
}
