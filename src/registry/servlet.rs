//! Servlet manager: created under an existing zone; unlike namespace/zone,
//! drop is allowed at any time —
//! instances referencing a dropped servlet simply become unreachable by
//! name lookup (this design doesn't require servlet drop to cascade-clean
//! instances, and the instance manager checks servlet existence only at
//! add time).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::errors::{MetaError, MetaResult};
use crate::store::{id_key, kind_prefix, max_id_key, EntityKind, KvStore, CF_META};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Servlet {
    pub id: u64,
    pub zone_id: u64,
    pub namespace_id: u64,
    pub name: String,
    pub resource_tag: Option<String>,
    pub version: u64,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<u64, Servlet>,
    by_name: HashMap<(u64, String), u64>,
}

pub struct ServletManager {
    inner: RwLock<Inner>,
    max_id: AtomicU64,
}

impl ServletManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_id: AtomicU64::new(0),
        }
    }

    pub fn create(
        &self,
        store: &KvStore,
        zone_id: u64,
        namespace_id: u64,
        name: String,
        resource_tag: Option<String>,
    ) -> MetaResult<u64> {
        let mut inner = self.inner.write().unwrap();
        let key = (zone_id, name.clone());
        if inner.by_name.contains_key(&key) {
            return Err(MetaError::InputParam(format!("servlet {name} already exists")));
        }
        let id = self.max_id.load(Ordering::SeqCst) + 1;
        let servlet = Servlet {
            id,
            zone_id,
            namespace_id,
            name: name.clone(),
            resource_tag,
            version: 1,
        };
        let bytes = bincode::serialize(&servlet)?;
        store.write_batch(vec![
                (CF_META.to_string(), id_key(EntityKind::Servlet, id), Some(bytes)),
                (
                    CF_META.to_string(),
                    servlet_name_key(zone_id, &name),
                    Some(id.to_be_bytes().to_vec()),
                ),
                (
                    CF_META.to_string(),
                    max_id_key(EntityKind::MaxServletId),
                    Some(id.to_be_bytes().to_vec()),
                ),
        ])?;
        self.max_id.store(id, Ordering::SeqCst);
        inner.by_id.insert(id, servlet);
        inner.by_name.insert(key, id);
        Ok(id)
    }

    pub fn modify(&self, store: &KvStore, servlet_id: u64, name: Option<String>) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let mut servlet = inner
            .by_id
            .get(&servlet_id)
            .cloned()
            .ok_or_else(|| MetaError::InputParam(format!("servlet {servlet_id} not found")))?;
        if let Some(new_name) = name {
            inner.by_name.remove(&(servlet.zone_id, servlet.name.clone()));
            inner.by_name.insert((servlet.zone_id, new_name.clone()), servlet_id);
            servlet.name = new_name;
        }
        servlet.version += 1;
        let bytes = bincode::serialize(&servlet)?;
        store.put(CF_META, &id_key(EntityKind::Servlet, servlet_id), &bytes)?;
        inner.by_id.insert(servlet_id, servlet);
        Ok(())
    }

    pub fn drop(&self, store: &KvStore, servlet_id: u64) -> MetaResult<u64> {
        let mut inner = self.inner.write().unwrap();
        let servlet = inner
            .by_id
            .remove(&servlet_id)
            .ok_or_else(|| MetaError::InputParam(format!("servlet {servlet_id} not found")))?;
        inner.by_name.remove(&(servlet.zone_id, servlet.name.clone()));
        store.write_batch(vec![
                (CF_META.to_string(), id_key(EntityKind::Servlet, servlet_id), None),
                (CF_META.to_string(), servlet_name_key(servlet.zone_id, &servlet.name), None),
        ])?;
        Ok(servlet.zone_id)
    }

    pub fn exists(&self, servlet_id: u64) -> bool {
        self.inner.read().unwrap().by_id.contains_key(&servlet_id)
    }

    pub fn get(&self, servlet_id: u64) -> Option<Servlet> {
        self.inner.read().unwrap().by_id.get(&servlet_id).cloned()
    }

    pub fn get_by_name(&self, zone_id: u64, name: &str) -> Option<Servlet> {
        let inner = self.inner.read().unwrap();
        inner
            .by_name
            .get(&(zone_id, name.to_string()))
            .and_then(|id| inner.by_id.get(id).cloned())
    }

    pub fn list_by_zone(&self, zone_id: u64) -> Vec<Servlet> {
        self.inner
            .read()
            .unwrap()
            .by_id
            .values()
            .filter(|s| s.zone_id == zone_id)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<Servlet> {
        self.inner.read().unwrap().by_id.values().cloned().collect()
    }

    pub fn reload(&self, store: &KvStore) -> Result<(), String> {
        let mut inner = self.inner.write().unwrap();
        inner.by_id.clear();
        inner.by_name.clear();
        let rows = store
            .prefix_iter(CF_META, &kind_prefix(EntityKind::Servlet))
            .map_err(|e| e.to_string())?;
        let mut max_id = 0u64;
        for (key, value) in rows {
            if key.len() == 10 {
                let servlet: Servlet = bincode::deserialize(&value).map_err(|e| e.to_string())?;
                max_id = max_id.max(servlet.id);
                inner.by_name.insert((servlet.zone_id, servlet.name.clone()), servlet.id);
                inner.by_id.insert(servlet.id, servlet);
            }
        }
        if let Some(bytes) = store
            .get(CF_META, &max_id_key(EntityKind::MaxServletId))
            .map_err(|e| e.to_string())?
        {
            let stored = u64::from_be_bytes(bytes.as_slice().try_into().map_err(|_| "bad max id")?);
            max_id = max_id.max(stored);
        }
        self.max_id.store(max_id, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for ServletManager {
    fn default() -> Self {
        Self::new()
    }
}

fn servlet_name_key(zone_id: u64, name: &str) -> Vec<u8> {
    let mut key = crate::store::kind_prefix(EntityKind::Servlet);
    key.extend_from_slice(&zone_id.to_be_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_and_drop_any_time() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        let mgr = ServletManager::new();
        let id = mgr.create(&store, 1, 1, "s1".into(), None).unwrap();
        assert!(mgr.exists(id));
        mgr.drop(&store, id).unwrap();
        assert!(!mgr.exists(id));
    }
}
