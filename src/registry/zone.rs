//! Zone manager: created under an existing namespace, dropped only once no
//! servlets remain. Same create/modify/drop/reload shape as
//! [`crate::registry::namespace::NamespaceManager`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::errors::{MetaError, MetaResult};
use crate::store::{id_key, kind_prefix, max_id_key, EntityKind, KvStore, CF_META};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub id: u64,
    pub namespace_id: u64,
    pub name: String,
    pub quota: Option<i64>,
    pub version: u64,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<u64, Zone>,
    // (namespace_id, zone_name) -> id
    by_name: HashMap<(u64, String), u64>,
    children: HashMap<u64, usize>,
}

pub struct ZoneManager {
    inner: RwLock<Inner>,
    max_id: AtomicU64,
}

impl ZoneManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_id: AtomicU64::new(0),
        }
    }

    pub fn create(&self, store: &KvStore, namespace_id: u64, name: String, quota: Option<i64>) -> MetaResult<u64> {
        let mut inner = self.inner.write().unwrap();
        let key = (namespace_id, name.clone());
        if inner.by_name.contains_key(&key) {
            return Err(MetaError::InputParam(format!("zone {name} already exists")));
        }
        let id = self.max_id.load(Ordering::SeqCst) + 1;
        let zone = Zone {
            id,
            namespace_id,
            name: name.clone(),
            quota,
            version: 1,
        };
        let bytes = bincode::serialize(&zone)?;
        store.write_batch(vec![
                (CF_META.to_string(), id_key(EntityKind::Zone, id), Some(bytes)),
                (
                    CF_META.to_string(),
                    zone_name_key(namespace_id, &name),
                    Some(id.to_be_bytes().to_vec()),
                ),
                (
                    CF_META.to_string(),
                    max_id_key(EntityKind::MaxZoneId),
                    Some(id.to_be_bytes().to_vec()),
                ),
        ])?;
        self.max_id.store(id, Ordering::SeqCst);
        inner.by_id.insert(id, zone);
        inner.by_name.insert(key, id);
        Ok(id)
    }

    pub fn modify(&self, store: &KvStore, zone_id: u64, quota: Option<i64>) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let mut zone = inner
            .by_id
            .get(&zone_id)
            .cloned()
            .ok_or_else(|| MetaError::InputParam(format!("zone {zone_id} not found")))?;
        if quota.is_some() {
            zone.quota = quota;
        }
        zone.version += 1;
        let bytes = bincode::serialize(&zone)?;
        store.put(CF_META, &id_key(EntityKind::Zone, zone_id), &bytes)?;
        inner.by_id.insert(zone_id, zone);
        Ok(())
    }

    pub fn drop(&self, store: &KvStore, zone_id: u64) -> MetaResult<u64> {
        let mut inner = self.inner.write().unwrap();
        if inner.children.get(&zone_id).copied().unwrap_or(0) > 0 {
            return Err(MetaError::InputParam("zone has servlet".to_string()));
        }
        let zone = inner
            .by_id
            .remove(&zone_id)
            .ok_or_else(|| MetaError::InputParam(format!("zone {zone_id} not found")))?;
        inner.by_name.remove(&(zone.namespace_id, zone.name.clone()));
        store.write_batch(vec![
                (CF_META.to_string(), id_key(EntityKind::Zone, zone_id), None),
                (CF_META.to_string(), zone_name_key(zone.namespace_id, &zone.name), None),
        ])?;
        Ok(zone.namespace_id)
    }

    pub fn note_child_added(&self, zone_id: u64) {
        *self.inner.write().unwrap().children.entry(zone_id).or_insert(0) += 1;
    }

    pub fn note_child_removed(&self, zone_id: u64) {
        if let Some(count) = self.inner.write().unwrap().children.get_mut(&zone_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn exists(&self, zone_id: u64) -> bool {
        self.inner.read().unwrap().by_id.contains_key(&zone_id)
    }

    pub fn get(&self, zone_id: u64) -> Option<Zone> {
        self.inner.read().unwrap().by_id.get(&zone_id).cloned()
    }

    pub fn get_by_name(&self, namespace_id: u64, name: &str) -> Option<Zone> {
        let inner = self.inner.read().unwrap();
        inner
            .by_name
            .get(&(namespace_id, name.to_string()))
            .and_then(|id| inner.by_id.get(id).cloned())
    }

    pub fn list_by_namespace(&self, namespace_id: u64) -> Vec<Zone> {
        self.inner
            .read()
            .unwrap()
            .by_id
            .values()
            .filter(|z| z.namespace_id == namespace_id)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<Zone> {
        self.inner.read().unwrap().by_id.values().cloned().collect()
    }

    pub fn reload(&self, store: &KvStore) -> Result<(), String> {
        let mut inner = self.inner.write().unwrap();
        inner.by_id.clear();
        inner.by_name.clear();
        let rows = store
            .prefix_iter(CF_META, &kind_prefix(EntityKind::Zone))
            .map_err(|e| e.to_string())?;
        let mut max_id = 0u64;
        for (key, value) in rows {
            if key.len() == 10 {
                let zone: Zone = bincode::deserialize(&value).map_err(|e| e.to_string())?;
                max_id = max_id.max(zone.id);
                inner.by_name.insert((zone.namespace_id, zone.name.clone()), zone.id);
                inner.by_id.insert(zone.id, zone);
            }
        }
        if let Some(bytes) = store
            .get(CF_META, &max_id_key(EntityKind::MaxZoneId))
            .map_err(|e| e.to_string())?
        {
            let stored = u64::from_be_bytes(bytes.as_slice().try_into().map_err(|_| "bad max id")?);
            max_id = max_id.max(stored);
        }
        self.max_id.store(max_id, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for ZoneManager {
    fn default() -> Self {
        Self::new()
    }
}

fn zone_name_key(namespace_id: u64, name: &str) -> Vec<u8> {
    let mut key = crate::store::kind_prefix(EntityKind::Zone);
    key.extend_from_slice(&namespace_id.to_be_bytes());
    key.extend_from_slice(name.as_bytes());
    key
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
    fn create_under_namespace_and_drop() {
        let (_dir, store) = open_store();
        let mgr = ZoneManager::new();
        let id = mgr.create(&store, 1, "z1".into(), None).unwrap();
        assert_eq!(mgr.get_by_name(1, "z1").unwrap().id, id);
        let ns_id = mgr.drop(&store, id).unwrap();
        assert_eq!(ns_id, 1);
        assert!(mgr.get(id).is_none());
    }

    #[test]
    fn drop_forbidden_while_servlets_exist() {
        let (_dir, store) = open_store();
        let mgr = ZoneManager::new();
        let id = mgr.create(&store, 1, "z1".into(), None).unwrap();
        mgr.note_child_added(id);
        assert!(mgr.drop(&store, id).is_err());
    }
}
