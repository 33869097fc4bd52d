//! Namespace manager: a quota-bearing named entity with create/modify/drop
//! against the shared `meta` column family, generalized to sit at the top
//! of the namespace/zone/servlet/instance hierarchy rather than stand alone.
//!
//! `list()` is served off a [`TwinBuffer`] snapshot rather than the `inner`
//! lock directly: namespace listings are read far more often (every
//! discovery client's periodic refresh) than namespaces are created,
//! modified, or dropped.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::concurrency::TwinBuffer;
use crate::errors::{MetaError, MetaResult};
use crate::store::{id_key, kind_prefix, max_id_key, EntityKind, KvStore, CF_META};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Namespace {
    pub id: u64,
    pub name: String,
    pub quota: Option<i64>,
    pub resource_tag: Option<String>,
    pub replica_num: Option<i32>,
    pub version: u64,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<u64, Namespace>,
    by_name: HashMap<String, u64>,
    /// namespace_id → set of zone ids, maintained by `ZoneManager` via
    /// `NamespaceManager::note_child_added` / `note_child_removed` so drop
    /// can enforce "forbidden while zones exist" ( invariants).
    children: HashMap<u64, usize>,
}

pub struct NamespaceManager {
    inner: RwLock<Inner>,
    max_id: AtomicU64,
    list_cache: TwinBuffer<Vec<Namespace>>,
}

impl NamespaceManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_id: AtomicU64::new(0),
            list_cache: TwinBuffer::new(Vec::new()),
        }
    }

    /// Refresh the list-cache from `inner.by_id`; called after every
    /// mutation while still holding `inner`'s write lock.
    fn refresh_list_cache(&self, inner: &Inner) {
        let snapshot: Vec<Namespace> = inner.by_id.values().cloned().collect();
        self.list_cache.modify(move |v| *v = snapshot.clone());
    }

    pub fn create(
        &self,
        store: &KvStore,
        name: String,
        quota: Option<i64>,
        resource_tag: Option<String>,
        replica_num: Option<i32>,
    ) -> MetaResult<u64> {
        let mut inner = self.inner.write().unwrap();
        if inner.by_name.contains_key(&name) {
            return Err(MetaError::InputParam(format!("namespace {name} already exists")));
        }
        let id = self.max_id.load(Ordering::SeqCst) + 1;
        let ns = Namespace {
            id,
            name: name.clone(),
            quota,
            resource_tag,
            replica_num,
            version: 1,
        };
        let entity_bytes = bincode::serialize(&ns)?;
        store.write_batch(vec![
                (CF_META.to_string(), id_key(EntityKind::Namespace, id), Some(entity_bytes)),
                (
                    CF_META.to_string(),
                    crate::store::name_key(EntityKind::NamespaceName, &name),
                    Some(id.to_be_bytes().to_vec()),
                ),
                (
                    CF_META.to_string(),
                    max_id_key(EntityKind::MaxNamespaceId),
                    Some(id.to_be_bytes().to_vec()),
                ),
        ])?;
        self.max_id.store(id, Ordering::SeqCst);
        inner.by_id.insert(id, ns);
        inner.by_name.insert(name, id);
        self.refresh_list_cache(&inner);
        Ok(id)
    }

    pub fn modify(
        &self,
        store: &KvStore,
        namespace_id: u64,
        quota: Option<i64>,
        resource_tag: Option<String>,
        replica_num: Option<i32>,
    ) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let mut ns = inner
            .by_id
            .get(&namespace_id)
            .cloned()
            .ok_or_else(|| MetaError::InputParam(format!("namespace {namespace_id} not found")))?;
        if quota.is_some() {
            ns.quota = quota;
        }
        if resource_tag.is_some() {
            ns.resource_tag = resource_tag;
        }
        if replica_num.is_some() {
            ns.replica_num = replica_num;
        }
        ns.version += 1;
        let bytes = bincode::serialize(&ns)?;
        store.put(CF_META, &id_key(EntityKind::Namespace, namespace_id), &bytes)?;
        inner.by_id.insert(namespace_id, ns);
        self.refresh_list_cache(&inner);
        Ok(())
    }

    pub fn drop(&self, store: &KvStore, namespace_id: u64) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.children.get(&namespace_id).copied().unwrap_or(0) > 0 {
            return Err(MetaError::InputParam("namespace has zone".to_string()));
        }
        let ns = inner
            .by_id
            .remove(&namespace_id)
            .ok_or_else(|| MetaError::InputParam(format!("namespace {namespace_id} not found")))?;
        inner.by_name.remove(&ns.name);
        store.write_batch(vec![
                (CF_META.to_string(), id_key(EntityKind::Namespace, namespace_id), None),
                (
                    CF_META.to_string(),
                    crate::store::name_key(EntityKind::NamespaceName, &ns.name),
                    None,
                ),
        ])?;
        self.refresh_list_cache(&inner);
        Ok(())
    }

    pub fn note_child_added(&self, namespace_id: u64) {
        *self.inner.write().unwrap().children.entry(namespace_id).or_insert(0) += 1;
    }

    pub fn note_child_removed(&self, namespace_id: u64) {
        if let Some(count) = self.inner.write().unwrap().children.get_mut(&namespace_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn exists(&self, namespace_id: u64) -> bool {
        self.inner.read().unwrap().by_id.contains_key(&namespace_id)
    }

    pub fn get(&self, namespace_id: u64) -> Option<Namespace> {
        self.inner.read().unwrap().by_id.get(&namespace_id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Namespace> {
        let inner = self.inner.read().unwrap();
        inner.by_name.get(name).and_then(|id| inner.by_id.get(id).cloned())
    }

    pub fn list(&self) -> Vec<Namespace> {
        self.list_cache.read()
    }

    pub fn reload(&self, store: &KvStore) -> Result<(), String> {
        let mut inner = self.inner.write().unwrap();
        inner.by_id.clear();
        inner.by_name.clear();
        let rows = store
            .prefix_iter(CF_META, &kind_prefix(EntityKind::Namespace))
            .map_err(|e| e.to_string())?;
        let mut max_id = 0u64;
        for (_key, value) in rows {
            // Name-pointer rows live under `EntityKind::NamespaceName` and
            // never appear in this prefix, so every row here is an entity row.
            let ns: Namespace = bincode::deserialize(&value).map_err(|e| e.to_string())?;
            max_id = max_id.max(ns.id);
            inner.by_name.insert(ns.name.clone(), ns.id);
            inner.by_id.insert(ns.id, ns);
        }
        if let Some(bytes) = store
            .get(CF_META, &max_id_key(EntityKind::MaxNamespaceId))
            .map_err(|e| e.to_string())?
        {
            let stored = u64::from_be_bytes(bytes.as_slice().try_into().map_err(|_| "bad max id")?);
            max_id = max_id.max(stored);
        }
        self.max_id.store(max_id, Ordering::SeqCst);
        self.refresh_list_cache(&inner);
        Ok(())
    }
}

impl Default for NamespaceManager {
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
    fn create_modify_drop_roundtrip() {
        let (_dir, store) = open_store();
        let mgr = NamespaceManager::new();
        let id = mgr.create(&store, "ns1".into(), Some(10), None, None).unwrap();
        assert_eq!(mgr.get(id).unwrap().quota, Some(10));

        mgr.modify(&store, id, Some(20), None, None).unwrap();
        let ns = mgr.get(id).unwrap();
        assert_eq!(ns.quota, Some(20));
        assert_eq!(ns.version, 2);

        mgr.drop(&store, id).unwrap();
        assert!(mgr.get(id).is_none());
    }

    #[test]
    fn drop_forbidden_while_zones_exist() {
        let (_dir, store) = open_store();
        let mgr = NamespaceManager::new();
        let id = mgr.create(&store, "ns1".into(), None, None, None).unwrap();
        mgr.note_child_added(id);
        let err = mgr.drop(&store, id).unwrap_err();
        assert!(matches!(err, MetaError::InputParam(_)));
    }

    #[test]
    fn duplicate_name_rejected() {
        let (_dir, store) = open_store();
        let mgr = NamespaceManager::new();
        mgr.create(&store, "ns1".into(), None, None, None).unwrap();
        let err = mgr.create(&store, "ns1".into(), None, None, None).unwrap_err();
        assert!(matches!(err, MetaError::InputParam(_)));
    }

    #[test]
    fn reload_rebuilds_state() {
        let (_dir, store) = open_store();
        let mgr = NamespaceManager::new();
        let id = mgr.create(&store, "ns1".into(), Some(5), None, None).unwrap();

        let mgr2 = NamespaceManager::new();
        mgr2.reload(&store).unwrap();
        assert_eq!(mgr2.get(id).unwrap().name, "ns1");
        let next_id = mgr2.create(&store, "ns2".into(), None, None, None).unwrap();
        assert_eq!(next_id, id + 1);
    }
}
