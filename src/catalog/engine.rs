//! Response assembly for one backend
//!
//! Builds the xRegistry response set (root, model, capabilities, groups,
//! resources, versions, meta) for a single backend, composing the entity
//! state manager, the name catalog, the upstream adapter, and the filter
//! pipeline. Entities are composed as JSON maps at emit time; `self` values
//! are pure string composition from the effective base URL and the `xid`,
//! so no in-memory cycles exist.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::catalog::adapter::{ResourceMetadata, UpstreamAdapter};
use crate::catalog::filter::{
    Candidate, FilterBudget, FilterEngine, InlineSpec, ListFlags, SelectedPage,
};
use crate::catalog::name_catalog::NameCatalog;
use crate::entity_state::EntityStateManager;
use crate::errors::{RegistryError, RegistryResult};
use crate::models::{Capabilities, RegistryModel, SPECVERSION};
use crate::utils::datetime::to_rfc3339;

/// Attributes the filter grammar accepts for resources.
const FILTERABLE_ATTRS: &[&str] = &[
    "name",
    "description",
    "license",
    "homepage",
    "repository",
    "author",
    "keywords",
    "createdat",
    "modifiedat",
];

/// Identity of one backend: its group type, the group instances it serves,
/// and its resource type.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub registry_id: String,
    pub group_type: String,
    pub group_singular: String,
    pub group_ids: Vec<String>,
    pub resource_type: String,
    pub resource_singular: String,
}

impl BackendDescriptor {
    /// e.g. `packageid` for a `package` resource.
    pub fn resource_id_attr(&self) -> String {
        format!("{}id", self.resource_singular)
    }

    pub fn model(&self) -> RegistryModel {
        RegistryModel::single(
            &self.group_type,
            &self.group_singular,
            &self.resource_type,
            &self.resource_singular,
        )
    }
}

/// Engine tuning, sourced from `[engine]` config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub budget: FilterBudget,
    pub default_page_limit: usize,
    pub max_page_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            budget: FilterBudget::default(),
            default_page_limit: 50,
            max_page_limit: 200,
        }
    }
}

/// One page of a listing plus the facts the HTTP layer needs for the
/// `Link: rel="next"` header.
#[derive(Debug)]
pub struct ListPage {
    pub body: Value,
    pub total: usize,
    pub has_more: bool,
    pub next_offset: usize,
}

/// The per-backend catalog engine.
pub struct CatalogEngine {
    descriptor: BackendDescriptor,
    state: Arc<EntityStateManager>,
    catalog: Arc<NameCatalog>,
    adapter: Arc<dyn UpstreamAdapter>,
    filter: FilterEngine,
    config: EngineConfig,
    capabilities: Capabilities,
    // Last observed upstream fingerprint per resource path; a change bumps
    // the entity's epoch.
    fingerprints: Mutex<HashMap<String, String>>,
}

impl CatalogEngine {
    pub fn new(
        descriptor: BackendDescriptor,
        state: Arc<EntityStateManager>,
        catalog: Arc<NameCatalog>,
        adapter: Arc<dyn UpstreamAdapter>,
        config: EngineConfig,
        global_fetches: Arc<tokio::sync::Semaphore>,
    ) -> Self {
        let filter = FilterEngine::new(config.budget.clone(), global_fetches);
        Self {
            descriptor,
            state,
            catalog,
            adapter,
            filter,
            config,
            capabilities: Capabilities::default(),
            fingerprints: Mutex::new(HashMap::new()),
        }
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn catalog(&self) -> &Arc<NameCatalog> {
        &self.catalog
    }

    pub fn adapter(&self) -> &Arc<dyn UpstreamAdapter> {
        &self.adapter
    }

    /// Clamp a requested page limit into the configured bounds.
    pub fn effective_limit(&self, flags: &ListFlags) -> usize {
        flags
            .limit
            .unwrap_or(self.config.default_page_limit)
            .min(self.config.max_page_limit)
    }

    fn name_attrs(&self) -> Vec<String> {
        vec!["name".to_string(), self.descriptor.resource_id_attr()]
    }

    fn filterable_attrs(&self) -> Vec<String> {
        let mut attrs: Vec<String> = FILTERABLE_ATTRS.iter().map(|s| s.to_string()).collect();
        attrs.push(self.descriptor.resource_id_attr());
        attrs
    }

    /// Insert the common attribute set shared by every entity.
    fn common_attrs(&self, obj: &mut Map<String, Value>, xid: &str, base: &str, flags: &ListFlags) {
        obj.insert("xid".to_string(), json!(xid));
        obj.insert("self".to_string(), json!(format!("{base}{xid}")));
        if !flags.noepoch {
            obj.insert("epoch".to_string(), json!(self.state.get_epoch(xid)));
        }
        obj.insert(
            "createdat".to_string(),
            json!(to_rfc3339(self.state.get_created_at(xid))),
        );
        obj.insert(
            "modifiedat".to_string(),
            json!(to_rfc3339(self.state.get_modified_at(xid))),
        );
    }

    // ------------------------------------------------------------------
    // Root, model, capabilities

    pub async fn root(&self, base: &str, flags: &ListFlags) -> RegistryResult<Value> {
        let gt = &self.descriptor.group_type;
        let mut obj = Map::new();
        obj.insert("specversion".to_string(), json!(SPECVERSION));
        obj.insert("registryid".to_string(), json!(self.descriptor.registry_id));
        self.common_attrs(&mut obj, "/", base, flags);
        obj.insert(format!("{gt}url"), json!(format!("{base}/{gt}")));
        obj.insert(
            format!("{gt}count"),
            json!(self.descriptor.group_ids.len()),
        );
        obj.insert("modelurl".to_string(), json!(format!("{base}/model")));
        obj.insert(
            "capabilitiesurl".to_string(),
            json!(format!("{base}/capabilities")),
        );

        if let Some(inline) = &flags.inline {
            if inline.includes("capabilities") {
                obj.insert("capabilities".to_string(), self.capabilities());
            }
            if inline.includes("model") || inline.includes("modelsource") {
                obj.insert("model".to_string(), self.model());
            }
            if inline.includes(gt) || matches!(inline, InlineSpec::All) {
                let groups = self.groups_map(base, flags).await?;
                obj.insert(gt.clone(), groups);
            }
        }

        Ok(Value::Object(obj))
    }

    pub fn model(&self) -> Value {
        serde_json::to_value(self.descriptor.model()).unwrap_or_else(|_| json!({}))
    }

    pub fn capabilities(&self) -> Value {
        serde_json::to_value(&self.capabilities).unwrap_or_else(|_| json!({}))
    }

    // ------------------------------------------------------------------
    // Groups

    fn require_group(&self, group_id: &str) -> RegistryResult<()> {
        if self.descriptor.group_ids.iter().any(|g| g == group_id) {
            Ok(())
        } else {
            Err(RegistryError::entity_not_found(format!(
                "/{}/{}",
                self.descriptor.group_type, group_id
            )))
        }
    }

    fn group_entity(&self, base: &str, group_id: &str, flags: &ListFlags) -> Value {
        let gt = &self.descriptor.group_type;
        let rt = &self.descriptor.resource_type;
        let xid = format!("/{gt}/{group_id}");
        let mut obj = Map::new();
        obj.insert(
            format!("{}id", self.descriptor.group_singular),
            json!(group_id),
        );
        self.common_attrs(&mut obj, &xid, base, flags);
        obj.insert(format!("{rt}url"), json!(format!("{base}{xid}/{rt}")));
        obj.insert(format!("{rt}count"), json!(self.catalog.len()));
        Value::Object(obj)
    }

    async fn groups_map(&self, base: &str, flags: &ListFlags) -> RegistryResult<Value> {
        let mut map = Map::new();
        let mut ids = self.descriptor.group_ids.clone();
        ids.sort();
        for group_id in ids.iter().take(self.config.max_page_limit) {
            map.insert(group_id.clone(), self.group_entity(base, group_id, flags));
        }
        Ok(Value::Object(map))
    }

    pub async fn groups(&self, base: &str, flags: &ListFlags) -> RegistryResult<ListPage> {
        let limit = self.effective_limit(flags);
        let mut ids = self.descriptor.group_ids.clone();
        ids.sort();
        let total = ids.len();

        let mut map = Map::new();
        for group_id in ids.iter().skip(flags.offset).take(limit) {
            map.insert(group_id.clone(), self.group_entity(base, group_id, flags));
        }
        let next_offset = flags.offset + map.len();
        Ok(ListPage {
            body: Value::Object(map),
            total,
            has_more: next_offset < total,
            next_offset,
        })
    }

    pub async fn group(&self, base: &str, group_id: &str, flags: &ListFlags) -> RegistryResult<Value> {
        self.require_group(group_id)?;
        Ok(self.group_entity(base, group_id, flags))
    }

    // ------------------------------------------------------------------
    // Resources

    pub async fn resources(
        &self,
        base: &str,
        group_id: &str,
        flags: &ListFlags,
    ) -> RegistryResult<ListPage> {
        self.require_group(group_id)?;
        let limit = self.effective_limit(flags);
        let name_attrs = self.name_attrs();
        let name_attr_refs: Vec<&str> = name_attrs.iter().map(String::as_str).collect();
        let filterable = self.filterable_attrs();
        let filterable_refs: Vec<&str> = filterable.iter().map(String::as_str).collect();

        let page: SelectedPage = self
            .filter
            .select(
                &self.catalog,
                self.adapter.as_ref(),
                flags,
                &name_attr_refs,
                &filterable_refs,
                limit,
            )
            .await?;

        let mut map = Map::new();
        for candidate in &page.items {
            let entity = self.resource_entity(base, group_id, candidate, flags).await?;
            map.insert(candidate.name.clone(), entity);
        }

        Ok(ListPage {
            body: Value::Object(map),
            total: page.total,
            has_more: page.has_more,
            next_offset: page.next_offset,
        })
    }

    pub async fn resource(
        &self,
        base: &str,
        group_id: &str,
        resource_id: &str,
        flags: &ListFlags,
    ) -> RegistryResult<Value> {
        self.require_group(group_id)?;
        let (name, metadata) = self.lookup(group_id, resource_id).await?;
        let candidate = Candidate {
            name,
            metadata: Some(metadata),
        };
        self.resource_entity(base, group_id, &candidate, flags).await
    }

    /// Resolve a resource id to its catalog spelling and fetch metadata,
    /// bumping the entity epoch when the upstream fingerprint changed.
    async fn lookup(
        &self,
        group_id: &str,
        resource_id: &str,
    ) -> RegistryResult<(String, Arc<ResourceMetadata>)> {
        let xid = self.resource_xid(group_id, resource_id);
        let name = match self.catalog.canonical(resource_id) {
            Some(name) => name,
            // An empty catalog (not yet bootstrapped) falls through to the
            // upstream; a populated catalog is authoritative.
            None if self.catalog.is_empty() => resource_id.to_string(),
            None => return Err(RegistryError::entity_not_found(xid)),
        };

        let metadata = self
            .adapter
            .fetch_resource(&name)
            .await
            .map_err(|e| match e {
                RegistryError::EntityNotFound { .. } => RegistryError::entity_not_found(xid.clone()),
                other => other,
            })?;

        self.observe_fingerprint(&xid, &metadata);
        Ok((name, Arc::new(metadata)))
    }

    /// Epoch increments only on observed mutation of upstream metadata.
    fn observe_fingerprint(&self, xid: &str, metadata: &ResourceMetadata) {
        let fingerprint = metadata
            .etag
            .clone()
            .unwrap_or_else(|| fingerprint_of(metadata));
        let mut guard = self.fingerprints.lock().expect("fingerprint lock poisoned");
        match guard.get(xid) {
            Some(prev) if *prev == fingerprint => {}
            Some(_) => {
                self.state.increment_epoch(xid);
                guard.insert(xid.to_string(), fingerprint);
            }
            None => {
                guard.insert(xid.to_string(), fingerprint);
            }
        }
    }

    fn resource_xid(&self, group_id: &str, resource_id: &str) -> String {
        format!(
            "/{}/{}/{}/{}",
            self.descriptor.group_type, group_id, self.descriptor.resource_type, resource_id
        )
    }

    async fn resource_entity(
        &self,
        base: &str,
        group_id: &str,
        candidate: &Candidate,
        flags: &ListFlags,
    ) -> RegistryResult<Value> {
        let xid = self.resource_xid(group_id, &candidate.name);
        if let Some(metadata) = &candidate.metadata {
            self.observe_fingerprint(&xid, metadata);
        }

        let mut obj = Map::new();
        obj.insert(self.descriptor.resource_id_attr(), json!(candidate.name));
        self.common_attrs(&mut obj, &xid, base, flags);
        obj.insert("name".to_string(), json!(candidate.name));

        if let Some(metadata) = &candidate.metadata {
            for (key, value) in &metadata.attributes {
                // Domain attributes never override the synthesised core set.
                if !obj.contains_key(key) {
                    obj.insert(key.clone(), value.clone());
                }
            }
            obj.insert("versionscount".to_string(), json!(metadata.versions.len()));
            if !flags.nodefaultversionid {
                if let Some(default_version) = &metadata.default_version {
                    obj.insert("defaultversionid".to_string(), json!(default_version));
                    obj.insert(
                        "defaultversionurl".to_string(),
                        json!(format!("{base}{xid}/versions/{default_version}")),
                    );
                }
            }
        }
        obj.insert("versionsurl".to_string(), json!(format!("{base}{xid}/versions")));
        obj.insert("metaurl".to_string(), json!(format!("{base}{xid}/meta")));

        if let Some(inline) = &flags.inline {
            if inline.includes("meta") {
                let meta = self.meta_projection(base, &xid, candidate.metadata.as_deref(), flags);
                obj.insert("meta".to_string(), meta);
            }
            if inline.includes("versions") {
                if let Some(metadata) = &candidate.metadata {
                    let mut versions = Map::new();
                    for vid in metadata.versions.iter().take(self.config.max_page_limit) {
                        versions.insert(
                            vid.clone(),
                            self.version_stub(base, &xid, vid, metadata, flags),
                        );
                    }
                    obj.insert("versions".to_string(), Value::Object(versions));
                }
            }
        }

        Ok(Value::Object(obj))
    }

    // ------------------------------------------------------------------
    // Meta

    pub async fn meta(
        &self,
        base: &str,
        group_id: &str,
        resource_id: &str,
        flags: &ListFlags,
    ) -> RegistryResult<Value> {
        self.require_group(group_id)?;
        let (name, metadata) = self.lookup(group_id, resource_id).await?;
        let xid = self.resource_xid(group_id, &name);
        Ok(self.meta_projection(base, &xid, Some(metadata.as_ref()), flags))
    }

    fn meta_projection(
        &self,
        base: &str,
        resource_xid: &str,
        metadata: Option<&ResourceMetadata>,
        flags: &ListFlags,
    ) -> Value {
        let xid = format!("{resource_xid}/meta");
        let mut obj = Map::new();
        obj.insert("xid".to_string(), json!(xid));
        obj.insert("self".to_string(), json!(format!("{base}{xid}")));
        if !flags.noepoch {
            obj.insert(
                "epoch".to_string(),
                json!(self.state.get_epoch(resource_xid)),
            );
        }
        obj.insert(
            "createdat".to_string(),
            json!(to_rfc3339(self.state.get_created_at(resource_xid))),
        );
        obj.insert(
            "modifiedat".to_string(),
            json!(to_rfc3339(self.state.get_modified_at(resource_xid))),
        );
        obj.insert("readonly".to_string(), json!(true));
        obj.insert("compatibility".to_string(), json!("none"));
        if let Some(metadata) = metadata {
            if !flags.nodefaultversionid {
                if let Some(default_version) = &metadata.default_version {
                    obj.insert("defaultversionid".to_string(), json!(default_version));
                    obj.insert(
                        "defaultversionurl".to_string(),
                        json!(format!("{base}{resource_xid}/versions/{default_version}")),
                    );
                }
            }
            if !flags.nodefaultversionsticky {
                obj.insert("defaultversionsticky".to_string(), json!(false));
            }
        }
        Value::Object(obj)
    }

    // ------------------------------------------------------------------
    // Versions

    pub async fn versions(
        &self,
        base: &str,
        group_id: &str,
        resource_id: &str,
        flags: &ListFlags,
    ) -> RegistryResult<ListPage> {
        self.require_group(group_id)?;
        let (name, metadata) = self.lookup(group_id, resource_id).await?;
        let resource_xid = self.resource_xid(group_id, &name);
        let limit = self.effective_limit(flags);

        let mut version_ids = metadata.versions.clone();
        version_ids.sort();
        let total = version_ids.len();

        let mut map = Map::new();
        for vid in version_ids.iter().skip(flags.offset).take(limit) {
            map.insert(
                vid.clone(),
                self.version_stub(base, &resource_xid, vid, &metadata, flags),
            );
        }
        let next_offset = flags.offset + map.len();
        Ok(ListPage {
            body: Value::Object(map),
            total,
            has_more: next_offset < total,
            next_offset,
        })
    }

    /// Version entry synthesised from resource-level metadata; the full
    /// per-version read goes through the adapter.
    fn version_stub(
        &self,
        base: &str,
        resource_xid: &str,
        version_id: &str,
        metadata: &ResourceMetadata,
        flags: &ListFlags,
    ) -> Value {
        let xid = format!("{resource_xid}/versions/{version_id}");
        let mut obj = Map::new();
        obj.insert("versionid".to_string(), json!(version_id));
        self.common_attrs(&mut obj, &xid, base, flags);
        if metadata.default_version.as_deref() == Some(version_id) {
            obj.insert("isdefault".to_string(), json!(true));
        }
        Value::Object(obj)
    }

    pub async fn version(
        &self,
        base: &str,
        group_id: &str,
        resource_id: &str,
        version_id: &str,
        flags: &ListFlags,
    ) -> RegistryResult<Value> {
        self.require_group(group_id)?;
        let (name, metadata) = self.lookup(group_id, resource_id).await?;
        let resource_xid = self.resource_xid(group_id, &name);
        let xid = format!("{resource_xid}/versions/{version_id}");

        if !metadata.versions.iter().any(|v| v == version_id) {
            return Err(RegistryError::entity_not_found(xid));
        }

        let version = self
            .adapter
            .fetch_version(&name, version_id)
            .await
            .map_err(|e| match e {
                RegistryError::EntityNotFound { .. } => RegistryError::entity_not_found(xid.clone()),
                other => other,
            })?;

        let mut obj = Map::new();
        obj.insert("versionid".to_string(), json!(version.version_id));
        self.common_attrs(&mut obj, &xid, base, flags);
        for (key, value) in &version.attributes {
            if !obj.contains_key(key) {
                obj.insert(key.clone(), value.clone());
            }
        }
        if metadata.default_version.as_deref() == Some(version_id) {
            obj.insert("isdefault".to_string(), json!(true));
        }
        Ok(Value::Object(obj))
    }

    pub async fn version_meta(
        &self,
        base: &str,
        group_id: &str,
        resource_id: &str,
        version_id: &str,
        flags: &ListFlags,
    ) -> RegistryResult<Value> {
        self.require_group(group_id)?;
        let (name, metadata) = self.lookup(group_id, resource_id).await?;
        let resource_xid = self.resource_xid(group_id, &name);
        if !metadata.versions.iter().any(|v| v == version_id) {
            return Err(RegistryError::entity_not_found(format!(
                "{resource_xid}/versions/{version_id}"
            )));
        }

        let xid = format!("{resource_xid}/versions/{version_id}/meta");
        let mut obj = Map::new();
        obj.insert("xid".to_string(), json!(xid));
        obj.insert("self".to_string(), json!(format!("{base}{xid}")));
        if !flags.noepoch {
            obj.insert(
                "epoch".to_string(),
                json!(self.state.get_epoch(&resource_xid)),
            );
        }
        obj.insert(
            "createdat".to_string(),
            json!(to_rfc3339(self.state.get_created_at(&resource_xid))),
        );
        obj.insert(
            "modifiedat".to_string(),
            json!(to_rfc3339(self.state.get_modified_at(&resource_xid))),
        );
        obj.insert("readonly".to_string(), json!(true));
        obj.insert("compatibility".to_string(), json!("none"));
        Ok(Value::Object(obj))
    }
}

/// Stable content fingerprint for upstreams that supply no ETag.
fn fingerprint_of(metadata: &ResourceMetadata) -> String {
    let mut hasher = Sha256::new();
    if let Ok(raw) = serde_json::to_vec(&metadata.attributes) {
        hasher.update(&raw);
    }
    for version in &metadata.versions {
        hasher.update(version.as_bytes());
    }
    hex::encode(hasher.finalize())
}
