//! The aggregating bridge
//!
//! Owns all process-wide mutable state: the registry epoch, the downstream
//! table, and the router maps. Handlers receive the state by explicit
//! injection (`Arc<BridgeState>`), never through ambient globals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::bridge::downstream::Downstream;
use crate::config::Config;
use crate::entity_state::EntityStateManager;
use crate::errors::{ConfigError, RegistryError, RegistryResult};
use crate::models::{Capabilities, RegistryModel};
use crate::utils::HttpClientFactory;

pub mod downstream;
pub mod health;
pub mod initializer;
pub mod proxy;

pub type SharedBridge = Arc<BridgeState>;

/// Resolution of a group-scoped request path.
#[derive(Debug)]
pub enum RouteTarget {
    /// Exactly one downstream owns the addressed slice.
    One(Downstream),
    /// The group type is partitioned and no group id was addressed: every
    /// owner contributes a slice of the listing.
    Many(Vec<Downstream>),
}

pub struct BridgeState {
    pub config: Config,
    /// Process-wide registry epoch; bumped on downstream membership or
    /// health change.
    epoch: AtomicU64,
    downstreams: RwLock<Vec<Downstream>>,
    /// `groupType -> owner base URLs`. More than one URL means the type is
    /// partitioned across downstreams and routing needs the group id.
    /// Built once at startup; group ownership is static for the process
    /// lifetime.
    type_router: HashMap<String, Vec<String>>,
    /// `(groupType, groupId) -> owner base URL`, collision-free per the
    /// configuration validation.
    group_router: HashMap<(String, String), String>,
    pub entity_state: Arc<EntityStateManager>,
    pub clients: HttpClientFactory,
    pub proxy_client: reqwest::Client,
    pub probe_client: reqwest::Client,
    pub cancel: CancellationToken,
}

impl BridgeState {
    /// Validate the configuration and build the initial downstream table.
    pub fn new(config: Config) -> Result<SharedBridge, ConfigError> {
        config.validate()?;

        let downstreams: Vec<Downstream> = config
            .downstreams
            .iter()
            .cloned()
            .map(Downstream::new)
            .collect();

        let mut type_router: HashMap<String, Vec<String>> = HashMap::new();
        let mut group_router = HashMap::new();
        for downstream in &downstreams {
            for claim in &downstream.config.groups {
                group_router.insert(
                    (claim.group_type.clone(), claim.group_id.clone()),
                    downstream.base_url.clone(),
                );
                let owners = type_router.entry(claim.group_type.clone()).or_default();
                if !owners.contains(&downstream.base_url) {
                    owners.push(downstream.base_url.clone());
                }
            }
        }

        let clients = HttpClientFactory::new(config.web.user_agent.clone());
        let proxy_client = clients
            .proxy_client(config.init.probe_timeout())
            .map_err(|e| ConfigError::InvalidValue {
                field: "web".to_string(),
                reason: e.to_string(),
            })?;
        let probe_client = clients
            .probe_client(config.init.probe_timeout())
            .map_err(|e| ConfigError::InvalidValue {
                field: "init".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(Self {
            config,
            epoch: AtomicU64::new(1),
            downstreams: RwLock::new(downstreams),
            type_router,
            group_router,
            entity_state: Arc::new(EntityStateManager::new()),
            clients,
            proxy_client,
            probe_client,
            cancel: CancellationToken::new(),
        }))
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Bump the registry epoch and touch the root's `modifiedat`.
    pub fn bump_epoch(&self) -> u64 {
        self.entity_state.touch("/");
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Snapshot of every downstream record.
    pub fn downstreams(&self) -> Vec<Downstream> {
        self.downstreams
            .read()
            .expect("downstream table lock poisoned")
            .clone()
    }

    /// Mutate one downstream record under the table lock. Returns false
    /// when no record matches `base_url`.
    pub fn update_downstream<F>(&self, base_url: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Downstream),
    {
        let mut table = self
            .downstreams
            .write()
            .expect("downstream table lock poisoned");
        match table.iter_mut().find(|d| d.base_url == base_url) {
            Some(record) => {
                mutate(record);
                true
            }
            None => false,
        }
    }

    /// Registered group types, sorted.
    pub fn group_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.type_router.keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of `(groupType, groupId)` pairs per group type, across all
    /// downstreams.
    pub fn group_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for downstream in self.downstreams().iter() {
            for claim in &downstream.config.groups {
                *counts.entry(claim.group_type.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Resolve the owner(s) of a request path.
    ///
    /// Unpartitioned group types route on the type alone. A partitioned
    /// type routes on `(groupType, groupId)` when a group id is addressed;
    /// without one (the bare `/{gt}` listing) every owner is returned so
    /// the caller can merge their slices. Unknown types are
    /// `api_not_found`, unknown group ids under a partitioned type are
    /// `entity_not_found`, and any owner that is uninitialised or
    /// unhealthy makes the addressed slice `service_unavailable`.
    pub fn route(&self, group_type: &str, group_id: Option<&str>) -> RegistryResult<RouteTarget> {
        let owners = self
            .type_router
            .get(group_type)
            .ok_or_else(|| RegistryError::api_not_found(format!("/{group_type}")))?;

        if owners.len() == 1 {
            return Ok(RouteTarget::One(self.routable(&owners[0], group_type)?));
        }

        match group_id {
            Some(group_id) => {
                let owner = self
                    .group_router
                    .get(&(group_type.to_string(), group_id.to_string()))
                    .ok_or_else(|| {
                        RegistryError::entity_not_found(format!("/{group_type}/{group_id}"))
                    })?;
                Ok(RouteTarget::One(self.routable(owner, group_type)?))
            }
            None => {
                let mut records = Vec::with_capacity(owners.len());
                for owner in owners {
                    records.push(self.routable(owner, group_type)?);
                }
                Ok(RouteTarget::Many(records))
            }
        }
    }

    fn routable(&self, base_url: &str, group_type: &str) -> RegistryResult<Downstream> {
        let table = self
            .downstreams
            .read()
            .expect("downstream table lock poisoned");
        let record = table
            .iter()
            .find(|d| d.base_url == base_url)
            .ok_or_else(|| RegistryError::internal("router map references unknown downstream"))?;
        if !record.is_routable() {
            return Err(RegistryError::unavailable(format!(
                "downstream for '{group_type}' is not available"
            )));
        }
        Ok(record.clone())
    }

    /// Merged model across initialized downstreams.
    pub fn merged_model(&self) -> RegistryModel {
        let mut merged = RegistryModel::default();
        for downstream in self.downstreams() {
            if let Some(model) = &downstream.model {
                merged.merge(model);
            }
        }
        merged
    }

    /// Merged capabilities across initialized downstreams.
    pub fn merged_capabilities(&self) -> Capabilities {
        let mut merged = Capabilities::default();
        for downstream in self.downstreams() {
            if let Some(capabilities) = &downstream.capabilities {
                merged.merge(capabilities);
            }
        }
        merged
    }

    /// True when at least one downstream can serve requests.
    pub fn any_routable(&self) -> bool {
        self.downstreams().iter().any(|d| d.is_routable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::downstream::DownstreamStatus;
    use crate::config::DownstreamConfig;
    use crate::models::GroupClaim;

    fn config_with(downstreams: Vec<DownstreamConfig>) -> Config {
        Config {
            downstreams,
            ..Config::default()
        }
    }

    fn mark_routable(bridge: &BridgeState, base_url: &str) {
        bridge.update_downstream(base_url, |d| {
            d.initialized = true;
            d.status = DownstreamStatus::Healthy;
        });
    }

    fn two_backends() -> SharedBridge {
        BridgeState::new(config_with(vec![
            DownstreamConfig {
                url: "http://npm:3100".to_string(),
                groups: vec![GroupClaim::new("noderegistries", "npmjs.org")],
            },
            DownstreamConfig {
                url: "http://pypi:3200".to_string(),
                groups: vec![GroupClaim::new("pythonregistries", "pypi.org")],
            },
        ]))
        .unwrap()
    }

    fn partitioned_backends() -> SharedBridge {
        BridgeState::new(config_with(vec![
            DownstreamConfig {
                url: "http://a:3100".to_string(),
                groups: vec![GroupClaim::new("noderegistries", "npmjs.org")],
            },
            DownstreamConfig {
                url: "http://b:3200".to_string(),
                groups: vec![GroupClaim::new("noderegistries", "mirror.example")],
            },
        ]))
        .unwrap()
    }

    #[test]
    fn router_map_covers_group_types() {
        let bridge = two_backends();
        assert_eq!(
            bridge.group_types(),
            vec!["noderegistries".to_string(), "pythonregistries".to_string()]
        );
    }

    #[test]
    fn epoch_bumps_are_visible() {
        let bridge = two_backends();
        let before = bridge.current_epoch();
        bridge.bump_epoch();
        assert_eq!(bridge.current_epoch(), before + 1);
    }

    #[test]
    fn routing_requires_initialization() {
        let bridge = two_backends();
        let err = bridge.route("noderegistries", None).unwrap_err();
        assert_eq!(err.code(), "service_unavailable");

        mark_routable(&bridge, "http://npm:3100");
        assert!(matches!(
            bridge.route("noderegistries", None).unwrap(),
            RouteTarget::One(_)
        ));

        let err = bridge.route("mavenregistries", None).unwrap_err();
        assert_eq!(err.code(), "api_not_found");
    }

    #[test]
    fn partitioned_group_type_routes_by_group_id() {
        let bridge = partitioned_backends();
        mark_routable(&bridge, "http://a:3100");
        mark_routable(&bridge, "http://b:3200");

        match bridge.route("noderegistries", Some("npmjs.org")).unwrap() {
            RouteTarget::One(d) => assert_eq!(d.base_url, "http://a:3100"),
            other => panic!("expected a sole owner, got {other:?}"),
        }
        match bridge.route("noderegistries", Some("mirror.example")).unwrap() {
            RouteTarget::One(d) => assert_eq!(d.base_url, "http://b:3200"),
            other => panic!("expected a sole owner, got {other:?}"),
        }

        let err = bridge
            .route("noderegistries", Some("ghost.example"))
            .unwrap_err();
        assert_eq!(err.code(), "entity_not_found");
    }

    #[test]
    fn partitioned_listing_needs_every_owner() {
        let bridge = partitioned_backends();
        mark_routable(&bridge, "http://a:3100");

        // One owner still down: the merged listing would be incomplete.
        let err = bridge.route("noderegistries", None).unwrap_err();
        assert_eq!(err.code(), "service_unavailable");

        mark_routable(&bridge, "http://b:3200");
        match bridge.route("noderegistries", None).unwrap() {
            RouteTarget::Many(owners) => assert_eq!(owners.len(), 2),
            other => panic!("expected every owner, got {other:?}"),
        }
    }

    #[test]
    fn group_counts_sum_claims() {
        let bridge = BridgeState::new(config_with(vec![DownstreamConfig {
            url: "http://npm:3100".to_string(),
            groups: vec![
                GroupClaim::new("noderegistries", "npmjs.org"),
                GroupClaim::new("noderegistries", "mirror.npmjs.org"),
            ],
        }]))
        .unwrap();
        assert_eq!(bridge.group_counts()["noderegistries"], 2);
    }
}
