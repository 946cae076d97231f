//! Entity state manager
//!
//! Tracks the per-path epoch counter and the `createdat`/`modifiedat`
//! timestamps for every entity path this process has synthesised. State is
//! materialised lazily on first read; `createdat` is immutable once
//! observed, `modifiedat` never goes backwards for a path even if the wall
//! clock does.
//!
//! Contention is per-path and critical sections are O(1), so the maps are
//! striped across a fixed set of mutex shards keyed by path hash.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

const SHARDS: usize = 64;

#[derive(Debug, Clone, Copy)]
struct EntityState {
    epoch: u64,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

/// Shared epoch and timestamp bookkeeping for synthesised entities.
pub struct EntityStateManager {
    shards: Vec<Mutex<HashMap<String, EntityState>>>,
}

impl Default for EntityStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStateManager {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, path: &str) -> &Mutex<HashMap<String, EntityState>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        path.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Wall clock, clamped so `modifiedat` never regresses for this entry.
    fn advance(prev: DateTime<Utc>) -> DateTime<Utc> {
        let now = Utc::now();
        if now > prev { now } else { prev + Duration::milliseconds(1) }
    }

    fn entry<'a>(
        map: &'a mut HashMap<String, EntityState>,
        path: &str,
    ) -> &'a mut EntityState {
        map.entry(path.to_string()).or_insert_with(|| {
            let now = Utc::now();
            EntityState {
                epoch: 1,
                created_at: now,
                modified_at: now,
            }
        })
    }

    /// Current epoch for a path, `1` if the path has never been touched.
    pub fn get_epoch(&self, path: &str) -> u64 {
        let guard = self.shard(path).lock().expect("entity state lock poisoned");
        guard.get(path).map(|s| s.epoch).unwrap_or(1)
    }

    /// Bump the epoch and `modifiedat`; returns the new epoch.
    pub fn increment_epoch(&self, path: &str) -> u64 {
        let mut guard = self.shard(path).lock().expect("entity state lock poisoned");
        let state = Self::entry(&mut guard, path);
        state.epoch += 1;
        state.modified_at = Self::advance(state.modified_at);
        state.epoch
    }

    /// `createdat`, materialising the entry on first read.
    pub fn get_created_at(&self, path: &str) -> DateTime<Utc> {
        let mut guard = self.shard(path).lock().expect("entity state lock poisoned");
        Self::entry(&mut guard, path).created_at
    }

    /// `modifiedat`, materialising the entry on first read.
    pub fn get_modified_at(&self, path: &str) -> DateTime<Utc> {
        let mut guard = self.shard(path).lock().expect("entity state lock poisoned");
        Self::entry(&mut guard, path).modified_at
    }

    /// Refresh `modifiedat` without changing the epoch.
    pub fn touch(&self, path: &str) {
        let mut guard = self.shard(path).lock().expect("entity state lock poisoned");
        let state = Self::entry(&mut guard, path);
        state.modified_at = Self::advance(state.modified_at);
    }

    /// Number of tracked paths, for diagnostics.
    pub fn snapshot_len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("entity state lock poisoned").len())
            .sum()
    }
}
