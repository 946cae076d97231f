//! Wire-level registry types
//!
//! Entities (root, groups, resources, versions) are assembled as ordered
//! JSON maps at emit time rather than fixed structs, because their attribute
//! sets vary by backend (`{groupType}url`, domain attributes). The typed
//! documents below cover the parts with a fixed shape: the model, the
//! capabilities document, group claims, and the health document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The xRegistry spec version this service speaks.
pub const SPECVERSION: &str = "1.0-rc2";

/// Registry id emitted by the bridge's unified root.
pub const BRIDGE_REGISTRY_ID: &str = "unified-xregistry";

/// One `(groupType, groupId)` pair a downstream claims ownership of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupClaim {
    #[serde(rename = "groupType", alias = "group_type")]
    pub group_type: String,
    #[serde(rename = "groupId", alias = "group_id")]
    pub group_id: String,
}

impl GroupClaim {
    pub fn new(group_type: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            group_type: group_type.into(),
            group_id: group_id.into(),
        }
    }

    /// Canonical path of the group this claim names.
    pub fn xid(&self) -> String {
        format!("/{}/{}", self.group_type, self.group_id)
    }
}

/// Declared schema fragment for one backend: group types and the resource
/// types nested under them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryModel {
    pub groups: BTreeMap<String, GroupModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupModel {
    pub plural: String,
    pub singular: String,
    pub resources: BTreeMap<String, ResourceModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceModel {
    pub plural: String,
    pub singular: String,
    #[serde(rename = "maxversions", default)]
    pub max_versions: u64,
    #[serde(rename = "hasdocument", default)]
    pub has_document: bool,
}

impl RegistryModel {
    /// Model for a backend with one group type holding one resource type.
    pub fn single(
        group_plural: &str,
        group_singular: &str,
        resource_plural: &str,
        resource_singular: &str,
    ) -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(
            resource_plural.to_string(),
            ResourceModel {
                plural: resource_plural.to_string(),
                singular: resource_singular.to_string(),
                max_versions: 0,
                has_document: false,
            },
        );
        let mut groups = BTreeMap::new();
        groups.insert(
            group_plural.to_string(),
            GroupModel {
                plural: group_plural.to_string(),
                singular: group_singular.to_string(),
                resources,
            },
        );
        Self { groups }
    }

    /// Union of two models; `other` wins on group-type collisions.
    pub fn merge(&mut self, other: &RegistryModel) {
        for (key, value) in &other.groups {
            self.groups.insert(key.clone(), value.clone());
        }
    }
}

/// Capabilities document served at `/capabilities`.
///
/// Deserialization is lenient (missing vectors fall back to the defaults)
/// because the bridge parses this document out of downstream probe
/// responses it does not control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub apis: Vec<String>,
    pub flags: Vec<String>,
    pub mutable: Vec<String>,
    pub pagination: bool,
    pub schemas: Vec<String>,
    pub specversions: Vec<String>,
    pub versionmodes: Vec<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            apis: vec![
                "/".to_string(),
                "/capabilities".to_string(),
                "/export".to_string(),
                "/model".to_string(),
            ],
            flags: vec![
                "doc".to_string(),
                "epoch".to_string(),
                "filter".to_string(),
                "inline".to_string(),
                "limit".to_string(),
                "offset".to_string(),
                "nodefaultversionid".to_string(),
                "nodefaultversionsticky".to_string(),
                "noepoch".to_string(),
                "noreadonly".to_string(),
                "schema".to_string(),
                "sort".to_string(),
                "specversion".to_string(),
                "collections".to_string(),
            ],
            mutable: vec![],
            pagination: true,
            schemas: vec!["xRegistry-json/1.0-rc2".to_string()],
            specversions: vec![SPECVERSION.to_string()],
            versionmodes: vec!["manual".to_string()],
        }
    }
}

impl Capabilities {
    /// Union of two capabilities documents, used for the bridge's merged
    /// `/capabilities`.
    pub fn merge(&mut self, other: &Capabilities) {
        merge_vec(&mut self.apis, &other.apis);
        merge_vec(&mut self.flags, &other.flags);
        merge_vec(&mut self.mutable, &other.mutable);
        self.pagination = self.pagination || other.pagination;
        merge_vec(&mut self.schemas, &other.schemas);
        merge_vec(&mut self.specversions, &other.specversions);
        merge_vec(&mut self.versionmodes, &other.versionmodes);
    }
}

fn merge_vec(dst: &mut Vec<String>, src: &[String]) {
    for item in src {
        if !dst.contains(item) {
            dst.push(item.clone());
        }
    }
}

/// Operational status of one downstream as reported by `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamHealth {
    pub url: String,
    pub healthy: bool,
    pub initialized: bool,
    #[serde(rename = "groupTypes")]
    pub group_types: Vec<String>,
    #[serde(rename = "lastChecked", skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Document served at `GET /health` and `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDocument {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub downstreams: Vec<DownstreamHealth>,
    #[serde(rename = "consolidatedGroups")]
    pub consolidated_groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}
