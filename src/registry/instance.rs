//! Instance manager. Addresses are sharded across
//! [`crate::concurrency::ShardMap`] for query-side concurrency; the
//! "recently removed" tombstone window is in-memory only and intentionally
//! not persisted — the same address removed just before a restart becomes
//! addable again immediately after it. Every add/remove/status-update is
//! also recorded in an [`IncrementalBuffer`] so polling clients can fetch
//! just what changed since their last poll instead of re-listing everything.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicI64;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::concurrency::{IncrementalBuffer, Lookup, ShardMap};
use crate::errors::{MetaError, MetaResult};
use crate::store::{id_key, kind_prefix, name_key, EntityKind, KvStore, CF_META};

const REMOVE_WINDOW: Duration = Duration::from_secs(3600);

/// One recorded mutation, as handed back by [`InstanceManager::changes_since`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InstanceChange {
    Added(Instance),
    Removed { address: String },
    StatusChanged(Instance),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: u64,
    pub address: String,
    pub namespace_id: u64,
    pub zone_id: u64,
    pub servlet_id: u64,
    pub namespace_name: String,
    pub zone_name: String,
    pub servlet_name: String,
    pub env: Option<String>,
    pub color: Option<String>,
    pub status: Option<String>,
    pub weight: Option<i32>,
    pub version: u64,
}

#[derive(Default)]
struct Indexes {
    by_namespace: HashMap<u64, HashSet<String>>,
    by_namespace_zone: HashMap<(u64, u64), HashSet<String>>,
    by_namespace_zone_servlet: HashMap<(u64, u64, u64), HashSet<String>>,
}

impl Indexes {
    fn add(&mut self, inst: &Instance) {
        self.by_namespace
            .entry(inst.namespace_id)
            .or_default()
            .insert(inst.address.clone());
        self.by_namespace_zone
            .entry((inst.namespace_id, inst.zone_id))
            .or_default()
            .insert(inst.address.clone());
        self.by_namespace_zone_servlet
            .entry((inst.namespace_id, inst.zone_id, inst.servlet_id))
            .or_default()
            .insert(inst.address.clone());
    }

    fn remove(&mut self, inst: &Instance) {
        if let Some(set) = self.by_namespace.get_mut(&inst.namespace_id) {
            set.remove(&inst.address);
        }
        if let Some(set) = self.by_namespace_zone.get_mut(&(inst.namespace_id, inst.zone_id)) {
            set.remove(&inst.address);
        }
        if let Some(set) = self
            .by_namespace_zone_servlet
            .get_mut(&(inst.namespace_id, inst.zone_id, inst.servlet_id))
        {
            set.remove(&inst.address);
        }
    }
}

/// How long a recorded change stays reachable by `changes_since` before its
/// generation is retired.
const CHANGE_FEED_GC: Duration = Duration::from_secs(300);

pub struct InstanceManager {
    by_address: ShardMap<String, Instance>,
    by_id: RwLock<HashMap<u64, String>>,
    indexes: RwLock<Indexes>,
    max_id: std::sync::atomic::AtomicU64,
    recently_removed: Mutex<HashMap<String, Instant>>,
    change_index: AtomicI64,
    changes: IncrementalBuffer<InstanceChange>,
}

impl InstanceManager {
    pub fn new() -> Self {
        Self {
            by_address: ShardMap::default(),
            by_id: RwLock::new(HashMap::new()),
            indexes: RwLock::new(Indexes::default()),
            max_id: std::sync::atomic::AtomicU64::new(0),
            recently_removed: Mutex::new(HashMap::new()),
            change_index: AtomicI64::new(0),
            changes: IncrementalBuffer::new(CHANGE_FEED_GC),
        }
    }

    fn record_change(&self, change: InstanceChange) -> i64 {
        let idx = self.change_index.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        self.changes.put(idx, change);
        idx
    }

    /// Changes since `last_seen_index`, plus the index a caller should pass
    /// next. `Lookup::FullResync` means the feed no longer covers the gap
    /// and the caller must re-list instead.
    pub fn changes_since(&self, last_seen_index: i64) -> (i64, Lookup<InstanceChange>) {
        let current = self.change_index.load(std::sync::atomic::Ordering::SeqCst);
        (current, self.changes.check_and_update(last_seen_index, current))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        store: &KvStore,
        address: String,
        namespace_id: u64,
        zone_id: u64,
        servlet_id: u64,
        namespace_name: String,
        zone_name: String,
        servlet_name: String,
        env: Option<String>,
        status: Option<String>,
    ) -> MetaResult<u64> {
        if self.by_address.exists(&address) {
            return Err(MetaError::InputParam(format!("instance {address} already exists")));
        }
        {
            let mut removed = self.recently_removed.lock().unwrap();
            if let Some(at) = removed.get(&address) {
                if at.elapsed() < REMOVE_WINDOW {
                    return Err(MetaError::InputParam("removed in 1 hour".to_string()));
                }
                removed.remove(&address);
            }
        }

        let id = self.max_id.load(std::sync::atomic::Ordering::SeqCst) + 1;
        let inst = Instance {
            id,
            address: address.clone(),
            namespace_id,
            zone_id,
            servlet_id,
            namespace_name,
            zone_name,
            servlet_name,
            env,
            color: None,
            status,
            weight: None,
            version: 1,
        };
        let bytes = bincode::serialize(&inst)?;
        store.write_batch(vec![
                (CF_META.to_string(), id_key(EntityKind::Instance, id), Some(bytes)),
                (
                    CF_META.to_string(),
                    name_key(EntityKind::InstanceName, &address),
                    Some(id.to_be_bytes().to_vec()),
                ),
        ])?;
        self.max_id.store(id, std::sync::atomic::Ordering::SeqCst);
        self.by_id.write().unwrap().insert(id, address.clone());
        self.indexes.write().unwrap().add(&inst);
        self.by_address.set(address, inst.clone());
        self.record_change(InstanceChange::Added(inst));
        Ok(id)
    }

    pub fn remove(&self, store: &KvStore, instance_id: u64) -> MetaResult<()> {
        let address = self
            .by_id
            .write()
            .unwrap()
            .remove(&instance_id)
            .ok_or_else(|| MetaError::InputParam(format!("instance {instance_id} not found")))?;
        let inst = self
            .by_address
            .erase(&address)
            .ok_or_else(|| MetaError::Internal("address index out of sync".to_string()))?;
        self.indexes.write().unwrap().remove(&inst);
        store.write_batch(vec![
                (CF_META.to_string(), id_key(EntityKind::Instance, instance_id), None),
                (CF_META.to_string(), name_key(EntityKind::InstanceName, &address), None),
        ])?;
        self.recently_removed.lock().unwrap().insert(address.clone(), Instant::now());
        self.record_change(InstanceChange::Removed { address });
        Ok(())
    }

    pub fn update_status(&self, store: &KvStore, instance_id: u64, status: String) -> MetaResult<()> {
        let address = self
            .by_id
            .read()
            .unwrap()
            .get(&instance_id)
            .cloned()
            .ok_or_else(|| MetaError::InputParam(format!("instance {instance_id} not found")))?;
        let mut inst = self
            .by_address
            .get(&address)
            .ok_or_else(|| MetaError::Internal("address index out of sync".to_string()))?;
        inst.status = Some(status);
        inst.version += 1;
        let bytes = bincode::serialize(&inst)?;
        store.put(CF_META, &id_key(EntityKind::Instance, instance_id), &bytes)?;
        self.by_address.set(address, inst.clone());
        self.record_change(InstanceChange::StatusChanged(inst));
        Ok(())
    }

    pub fn get_by_address(&self, address: &str) -> Option<Instance> {
        self.by_address.get(&address.to_string())
    }

    pub fn list_by_namespace(&self, namespace_id: u64) -> Vec<Instance> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .by_namespace
            .get(&namespace_id)
            .into_iter()
            .flatten()
            .filter_map(|addr| self.by_address.get(addr))
            .collect()
    }

    pub fn list_by_zone(&self, namespace_id: u64, zone_id: u64) -> Vec<Instance> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .by_namespace_zone
            .get(&(namespace_id, zone_id))
            .into_iter()
            .flatten()
            .filter_map(|addr| self.by_address.get(addr))
            .collect()
    }

    pub fn list_by_servlet(&self, namespace_id: u64, zone_id: u64, servlet_id: u64) -> Vec<Instance> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .by_namespace_zone_servlet
            .get(&(namespace_id, zone_id, servlet_id))
            .into_iter()
            .flatten()
            .filter_map(|addr| self.by_address.get(addr))
            .collect()
    }

    pub fn reload(&self, store: &KvStore) -> Result<(), String> {
        self.by_address.clear();
        self.by_id.write().unwrap().clear();
        *self.indexes.write().unwrap() = Indexes::default();
        self.changes.reset();
        self.change_index.store(0, std::sync::atomic::Ordering::SeqCst);
        let rows = store
            .prefix_iter(CF_META, &kind_prefix(EntityKind::Instance))
            .map_err(|e| e.to_string())?;
        let mut max_id = 0u64;
        for (_key, value) in rows {
            // Name-pointer rows live under `EntityKind::InstanceName` and
            // never appear in this prefix, so every row here is an entity row.
            let inst: Instance = bincode::deserialize(&value).map_err(|e| e.to_string())?;
            max_id = max_id.max(inst.id);
            self.by_id.write().unwrap().insert(inst.id, inst.address.clone());
            self.indexes.write().unwrap().add(&inst);
            self.by_address.set(inst.address.clone(), inst);
        }
        self.max_id.store(max_id, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

impl Default for InstanceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, KvStore) {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn add_query_and_remove() {
        let (_dir, store) = open_store();
        let mgr = InstanceManager::new();
        mgr.add(
            &store,
            "10.0.0.1:8000".into(),
            1,
            1,
            1,
            "ns1".into(),
            "z1".into(),
            "s1".into(),
            Some("prod".into()),
            None,
        )
            .unwrap();

        let found = mgr.list_by_namespace(1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].env.as_deref(), Some("prod"));

        let inst = mgr.get_by_address("10.0.0.1:8000").unwrap();
        mgr.remove(&store, inst.id).unwrap();
        assert!(mgr.get_by_address("10.0.0.1:8000").is_none());
    }

    #[test]
    fn readd_within_window_rejected() {
        let (_dir, store) = open_store();
        let mgr = InstanceManager::new();
        let id = mgr
            .add(&store, "1.2.3.4:5".into(), 1, 1, 1, "ns".into(), "z".into(), "s".into(), None, None)
            .unwrap();
        mgr.remove(&store, id).unwrap();
        let err = mgr
            .add(&store, "1.2.3.4:5".into(), 1, 1, 1, "ns".into(), "z".into(), "s".into(), None, None)
            .unwrap_err();
        assert!(matches!(err, MetaError::InputParam(msg) if msg.contains("removed in 1 hour")));
    }
}
