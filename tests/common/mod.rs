//! Shared fixtures for the integration suites
//!
//! A scriptable upstream adapter and helpers to assemble catalog engines,
//! per-backend routers, and live downstream servers on ephemeral ports.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use xregistry_bridge::catalog::adapter::{
    NameListing, NameNormalization, ResourceMetadata, UpstreamAdapter, VersionMetadata,
};
use xregistry_bridge::catalog::engine::{BackendDescriptor, CatalogEngine, EngineConfig};
use xregistry_bridge::catalog::name_catalog::NameCatalog;
use xregistry_bridge::catalog::service::{CatalogService, catalog_router};
use xregistry_bridge::entity_state::EntityStateManager;
use xregistry_bridge::errors::{RegistryError, RegistryResult};

/// Scriptable in-memory upstream.
pub struct TestAdapter {
    pub packages: Mutex<BTreeMap<String, ResourceMetadata>>,
    /// Names whose metadata fetches fail with `service_unavailable`.
    pub failing: Mutex<HashSet<String>>,
}

impl TestAdapter {
    pub fn new(names: &[&str]) -> Self {
        let packages = names
            .iter()
            .map(|name| ((*name).to_string(), Self::package(name, "MIT")))
            .collect();
        Self {
            packages: Mutex::new(packages),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn package(name: &str, license: &str) -> ResourceMetadata {
        let mut attributes = BTreeMap::new();
        attributes.insert("description".to_string(), json!(format!("the {name} package")));
        attributes.insert("license".to_string(), json!(license));
        ResourceMetadata {
            resource_id: name.to_string(),
            attributes,
            versions: vec!["1.0.0".to_string(), "1.1.0".to_string()],
            default_version: Some("1.1.0".to_string()),
            etag: None,
        }
    }

    pub fn set_license(&self, name: &str, license: &str) {
        let mut packages = self.packages.lock().unwrap();
        if let Some(metadata) = packages.get_mut(name) {
            metadata
                .attributes
                .insert("license".to_string(), json!(license));
        }
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl UpstreamAdapter for TestAdapter {
    fn normalization(&self) -> NameNormalization {
        NameNormalization::Preserve
    }

    async fn exists(&self, name: &str) -> RegistryResult<bool> {
        Ok(self.packages.lock().unwrap().contains_key(name))
    }

    async fn fetch_resource(&self, name: &str) -> RegistryResult<ResourceMetadata> {
        if self.failing.lock().unwrap().contains(name) {
            return Err(RegistryError::unavailable(format!("{name} upstream down")));
        }
        self.packages
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::entity_not_found(name))
    }

    async fn fetch_version(&self, name: &str, version: &str) -> RegistryResult<VersionMetadata> {
        let packages = self.packages.lock().unwrap();
        let metadata = packages
            .get(name)
            .ok_or_else(|| RegistryError::entity_not_found(name))?;
        if !metadata.versions.iter().any(|v| v == version) {
            return Err(RegistryError::entity_not_found(version));
        }
        let mut attributes = BTreeMap::new();
        attributes.insert("name".to_string(), json!(name));
        Ok(VersionMetadata {
            version_id: version.to_string(),
            attributes,
        })
    }

    async fn list_names(&self, _cursor: Option<&str>) -> RegistryResult<NameListing> {
        Ok(NameListing {
            names: self.packages.lock().unwrap().keys().cloned().collect(),
            cursor: Some("test-cursor".to_string()),
            changed: true,
        })
    }
}

/// npm-flavoured descriptor used across the suites.
pub fn node_descriptor() -> BackendDescriptor {
    node_descriptor_for("npmjs.org")
}

/// Same shape with a custom group id, for partitioned-group fixtures.
pub fn node_descriptor_for(group_id: &str) -> BackendDescriptor {
    BackendDescriptor {
        registry_id: "npm-wrapper".to_string(),
        group_type: "noderegistries".to_string(),
        group_singular: "noderegistry".to_string(),
        group_ids: vec![group_id.to_string()],
        resource_type: "packages".to_string(),
        resource_singular: "package".to_string(),
    }
}

pub fn python_descriptor() -> BackendDescriptor {
    BackendDescriptor {
        registry_id: "pypi-wrapper".to_string(),
        group_type: "pythonregistries".to_string(),
        group_singular: "pythonregistry".to_string(),
        group_ids: vec!["pypi.org".to_string()],
        resource_type: "packages".to_string(),
        resource_singular: "package".to_string(),
    }
}

/// Build an engine over a refreshed catalog in a temp dir.
pub async fn build_engine(
    descriptor: BackendDescriptor,
    adapter: Arc<TestAdapter>,
    cache_dir: &std::path::Path,
    config: EngineConfig,
) -> Arc<CatalogEngine> {
    let catalog = Arc::new(NameCatalog::open(cache_dir, adapter.normalization()).unwrap());
    catalog
        .refresh(adapter.as_ref(), &CancellationToken::new())
        .await
        .unwrap();
    Arc::new(CatalogEngine::new(
        descriptor,
        Arc::new(EntityStateManager::new()),
        catalog,
        adapter,
        config,
        Arc::new(tokio::sync::Semaphore::new(64)),
    ))
}

/// Router for one backend with no configured base URL.
pub fn backend_router(engine: Arc<CatalogEngine>) -> axum::Router {
    catalog_router(CatalogService {
        engine,
        base_url: None,
        base_url_header: "x-base-url".to_string(),
    })
}

/// Serve a backend router on an ephemeral port; returns its base URL and
/// the serving task (abort it to simulate the downstream dying).
pub async fn spawn_backend(router: axum::Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), handle)
}
