//! Durable package-name catalog
//!
//! One instance per backend. Holds the complete set of package identifiers
//! for prefix/wildcard listing without issuing a full upstream enumeration
//! per request. Readers always see a complete index: refresh builds a new
//! sorted structure offline, persists it, and publishes it with an atomic
//! `Arc` swap.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::adapter::{NameNormalization, UpstreamAdapter};
use crate::errors::{RegistryError, RegistryResult};

const SNAPSHOT_FILE: &str = "names.json";

/// Immutable published index. Names are sorted by their normalised form.
#[derive(Debug, Default)]
pub struct NameIndex {
    names: Vec<String>,
    cursor: Option<String>,
    last_update: Option<DateTime<Utc>>,
}

impl NameIndex {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }
}

/// On-disk projection of the index.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
    #[serde(rename = "lastUpdate", skip_serializing_if = "Option::is_none")]
    last_update: Option<DateTime<Utc>>,
    #[serde(rename = "packageNames")]
    package_names: Vec<String>,
}

/// Sorted, durable name catalog with incremental refresh.
pub struct NameCatalog {
    index: RwLock<Arc<NameIndex>>,
    snapshot_path: PathBuf,
    normalization: NameNormalization,
    // Single refresher at a time; readers are never blocked by it.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl NameCatalog {
    /// Open the catalog, loading the last durable snapshot when present.
    pub fn open(cache_dir: impl Into<PathBuf>, normalization: NameNormalization) -> RegistryResult<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)
            .map_err(|e| RegistryError::internal(format!("cannot create catalog dir: {e}")))?;
        let snapshot_path = cache_dir.join(SNAPSHOT_FILE);

        let index = match std::fs::read(&snapshot_path) {
            Ok(raw) => match serde_json::from_slice::<CatalogSnapshot>(&raw) {
                Ok(snapshot) => {
                    let index = Self::build_index(
                        snapshot.package_names,
                        snapshot.cursor,
                        snapshot.last_update,
                        normalization,
                    );
                    info!(
                        names = index.names.len(),
                        path = %snapshot_path.display(),
                        "loaded name catalog snapshot"
                    );
                    index
                }
                Err(e) => {
                    warn!(error = %e, "ignoring corrupt name catalog snapshot");
                    NameIndex::default()
                }
            },
            Err(_) => NameIndex::default(),
        };

        Ok(Self {
            index: RwLock::new(Arc::new(index)),
            snapshot_path,
            normalization,
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    fn build_index(
        mut names: Vec<String>,
        cursor: Option<String>,
        last_update: Option<DateTime<Utc>>,
        normalization: NameNormalization,
    ) -> NameIndex {
        names.sort_by(|a, b| normalization.apply(a).cmp(&normalization.apply(b)));
        names.dedup_by(|a, b| normalization.apply(a) == normalization.apply(b));
        NameIndex {
            names,
            cursor,
            last_update,
        }
    }

    /// The currently published index.
    pub fn snapshot(&self) -> Arc<NameIndex> {
        self.index.read().expect("catalog index lock poisoned").clone()
    }

    pub fn normalization(&self) -> NameNormalization {
        self.normalization
    }

    pub fn len(&self) -> usize {
        self.snapshot().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a name is in the catalog, under this backend's normalisation.
    pub fn exists(&self, name: &str) -> bool {
        let needle = self.normalization.apply(name);
        let index = self.snapshot();
        index
            .names
            .binary_search_by(|probe| self.normalization.apply(probe).cmp(&needle))
            .is_ok()
    }

    /// Resolve a caller-supplied name to its catalog spelling.
    pub fn canonical(&self, name: &str) -> Option<String> {
        let needle = self.normalization.apply(name);
        let index = self.snapshot();
        index
            .names
            .binary_search_by(|probe| self.normalization.apply(probe).cmp(&needle))
            .ok()
            .map(|i| index.names[i].clone())
    }

    /// Page through the (optionally predicate-filtered) name set.
    ///
    /// Returns the page and the total count after filtering.
    pub fn list(
        &self,
        offset: usize,
        limit: usize,
        predicate: Option<&dyn Fn(&str) -> bool>,
    ) -> (Vec<String>, usize) {
        let index = self.snapshot();
        match predicate {
            None => {
                let total = index.names.len();
                let page = index
                    .names
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect();
                (page, total)
            }
            Some(pred) => {
                let mut total = 0usize;
                let mut page = Vec::new();
                for name in &index.names {
                    if pred(name) {
                        if total >= offset && page.len() < limit {
                            page.push(name.clone());
                        }
                        total += 1;
                    }
                }
                (page, total)
            }
        }
    }

    /// Pull the upstream's name listing and publish a fresh index.
    ///
    /// Idempotent and cancellable. Returns `true` when a new index was
    /// published, `false` when the upstream cursor was unchanged. A disk
    /// write failure is logged and demoted: the in-memory swap still
    /// happens and the previous durable snapshot keeps serving restarts.
    pub async fn refresh(
        &self,
        adapter: &dyn UpstreamAdapter,
        cancel: &CancellationToken,
    ) -> RegistryResult<bool> {
        let _gate = self.refresh_gate.lock().await;

        let cursor = self.snapshot().cursor.clone();
        let listing = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RegistryError::unavailable("catalog refresh cancelled"));
            }
            listing = adapter.list_names(cursor.as_deref()) => listing?,
        };

        if !listing.changed {
            debug!("name catalog cursor unchanged, skipping refresh");
            return Ok(false);
        }

        let index = Self::build_index(
            listing.names,
            listing.cursor,
            Some(Utc::now()),
            self.normalization,
        );

        if let Err(e) = self.persist(&index) {
            warn!(error = %e, "failed to persist name catalog snapshot");
        }

        let count = index.names.len();
        *self.index.write().expect("catalog index lock poisoned") = Arc::new(index);
        info!(names = count, "name catalog refreshed");
        Ok(true)
    }

    fn persist(&self, index: &NameIndex) -> RegistryResult<()> {
        let snapshot = CatalogSnapshot {
            cursor: index.cursor.clone(),
            last_update: index.last_update,
            package_names: index.names.clone(),
        };
        let raw = serde_json::to_vec(&snapshot)
            .map_err(|e| RegistryError::internal(format!("cannot serialize snapshot: {e}")))?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)
            .map_err(|e| RegistryError::internal(format!("cannot write snapshot: {e}")))?;
        std::fs::rename(&tmp, &self.snapshot_path)
            .map_err(|e| RegistryError::internal(format!("cannot publish snapshot: {e}")))?;
        Ok(())
    }

    /// Run `refresh` on an interval until cancelled, stretching each sleep
    /// by up to 10% so multiple catalogs never refresh in lockstep.
    /// Failures are logged and non-fatal; the last snapshot keeps serving.
    pub fn spawn_refresher(
        self: &Arc<Self>,
        adapter: Arc<dyn UpstreamAdapter>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        use std::hash::{BuildHasher, Hasher};

        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let base_ms = interval.as_millis() as u64;
                let stretch = if base_ms == 0 {
                    0
                } else {
                    let seed = std::collections::hash_map::RandomState::new()
                        .build_hasher()
                        .finish();
                    seed % (base_ms / 10 + 1)
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(base_ms + stretch)) => {}
                }
                match catalog.refresh(adapter.as_ref(), &cancel).await {
                    Ok(true) => {}
                    Ok(false) => debug!("scheduled catalog refresh skipped (cursor unchanged)"),
                    Err(e) => warn!(error = %e, "scheduled catalog refresh failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::adapter::NameListing;
    use async_trait::async_trait;

    struct FakeAdapter {
        names: Vec<String>,
        cursor: Option<String>,
        changed: bool,
    }

    #[async_trait]
    impl UpstreamAdapter for FakeAdapter {
        async fn exists(&self, _name: &str) -> RegistryResult<bool> {
            Ok(true)
        }

        async fn fetch_resource(
            &self,
            _name: &str,
        ) -> RegistryResult<crate::catalog::adapter::ResourceMetadata> {
            Err(RegistryError::internal("not used"))
        }

        async fn fetch_version(
            &self,
            _name: &str,
            _version: &str,
        ) -> RegistryResult<crate::catalog::adapter::VersionMetadata> {
            Err(RegistryError::internal("not used"))
        }

        async fn list_names(&self, cursor: Option<&str>) -> RegistryResult<NameListing> {
            if !self.changed && cursor == self.cursor.as_deref() {
                return Ok(NameListing {
                    names: vec![],
                    cursor: self.cursor.clone(),
                    changed: false,
                });
            }
            Ok(NameListing {
                names: self.names.clone(),
                cursor: self.cursor.clone(),
                changed: true,
            })
        }
    }

    #[tokio::test]
    async fn refresh_publishes_sorted_index() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = NameCatalog::open(dir.path(), NameNormalization::Preserve).unwrap();
        let adapter = FakeAdapter {
            names: vec!["zeta".into(), "alpha".into(), "midway".into()],
            cursor: Some("c1".into()),
            changed: true,
        };

        let swapped = catalog
            .refresh(&adapter, &CancellationToken::new())
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(
            catalog.snapshot().names(),
            &["alpha".to_string(), "midway".to_string(), "zeta".to_string()]
        );
        assert!(catalog.exists("midway"));
        assert!(!catalog.exists("nope"));
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = NameCatalog::open(dir.path(), NameNormalization::Preserve).unwrap();
            let adapter = FakeAdapter {
                names: vec!["one".into(), "two".into()],
                cursor: Some("etag-1".into()),
                changed: true,
            };
            catalog
                .refresh(&adapter, &CancellationToken::new())
                .await
                .unwrap();
        }

        let reopened = NameCatalog::open(dir.path(), NameNormalization::Preserve).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.snapshot().cursor(), Some("etag-1"));
    }

    #[tokio::test]
    async fn unchanged_cursor_skips_swap() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = NameCatalog::open(dir.path(), NameNormalization::Preserve).unwrap();
        let adapter = FakeAdapter {
            names: vec!["one".into()],
            cursor: Some("same".into()),
            changed: true,
        };
        assert!(catalog.refresh(&adapter, &CancellationToken::new()).await.unwrap());

        let unchanged = FakeAdapter {
            names: vec![],
            cursor: Some("same".into()),
            changed: false,
        };
        let swapped = catalog
            .refresh(&unchanged, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!swapped);
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn case_insensitive_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = NameCatalog::open(dir.path(), NameNormalization::Lowercase).unwrap();
        let adapter = FakeAdapter {
            names: vec!["Newtonsoft.Json".into()],
            cursor: None,
            changed: true,
        };
        catalog
            .refresh(&adapter, &CancellationToken::new())
            .await
            .unwrap();

        assert!(catalog.exists("newtonsoft.json"));
        assert_eq!(
            catalog.canonical("NEWTONSOFT.JSON"),
            Some("Newtonsoft.Json".to_string())
        );
    }

    #[tokio::test]
    async fn list_pages_with_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = NameCatalog::open(dir.path(), NameNormalization::Preserve).unwrap();
        let adapter = FakeAdapter {
            names: (0..20).map(|i| format!("pkg-{i:02}")).collect(),
            cursor: None,
            changed: true,
        };
        catalog
            .refresh(&adapter, &CancellationToken::new())
            .await
            .unwrap();

        let pred = |name: &str| name.ends_with('0') || name.ends_with('5');
        let (page, total) = catalog.list(1, 2, Some(&pred));
        assert_eq!(total, 4); // pkg-00, pkg-05, pkg-10, pkg-15
        assert_eq!(page, vec!["pkg-05".to_string(), "pkg-10".to_string()]);
    }
}
