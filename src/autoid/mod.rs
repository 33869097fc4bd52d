//! Auto-increment id allocator, applied by the auto-id Raft group rather
//! than the discovery group. Per-servlet counter semantics, including the
//! off-by-one tolerance on `update`'s rollback check preserved here even
//! though `>=` would read more natural: a rollback is only rejected if it
//! skips back more than one id, so a client retrying the immediately
//! preceding `update` still succeeds.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::errors::{MetaError, MetaResult};
use crate::store::{KvStore, CF_META, SCHEMA_IDENTIFY};

pub mod handler;

pub const AUTOID_KIND: u8 = crate::store::EntityKind::AutoIncrement as u8;

fn autoid_key(servlet_id: u64) -> Vec<u8> {
    let mut key = vec![SCHEMA_IDENTIFY, AUTOID_KIND];
    key.extend_from_slice(&servlet_id.to_be_bytes());
    key
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
struct Counter {
    next_id: u64,
}

pub struct AutoIdManager {
    inner: RwLock<HashMap<u64, Counter>>,
}

impl AutoIdManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, store: &KvStore, servlet_id: u64, start_id: u64) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.contains_key(&servlet_id) {
            return Err(MetaError::InputParam(format!("auto-id counter for servlet {servlet_id} already exists")));
        }
        let counter = Counter { next_id: start_id };
        self.persist(store, servlet_id, &counter)?;
        inner.insert(servlet_id, counter);
        Ok(())
    }

    pub fn drop(&self, store: &KvStore, servlet_id: u64) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .remove(&servlet_id)
            .ok_or_else(|| MetaError::InputParam(format!("auto-id counter for servlet {servlet_id} not found")))?;
        store.delete(CF_META, &autoid_key(servlet_id))?;
        Ok(())
    }

    /// Allocate `count` consecutive ids starting at the counter's current
    /// value (or `start_id + 1` if the caller supplies a higher lower
    /// bound), returning `[start_id, end_id)`.
    pub fn gen(&self, store: &KvStore, servlet_id: u64, count: u64, start_id: Option<u64>) -> MetaResult<(u64, u64)> {
        let mut inner = self.inner.write().unwrap();
        let counter = inner
            .get_mut(&servlet_id)
            .ok_or_else(|| MetaError::InputParam(format!("auto-id counter for servlet {servlet_id} not found")))?;
        if let Some(lower_bound) = start_id {
            counter.next_id = counter.next_id.max(lower_bound + 1);
        }
        let start_id = counter.next_id;
        let end_id = start_id + count;
        counter.next_id = end_id;
        let snapshot = *counter;
        self.persist(store, servlet_id, &snapshot)?;
        Ok((start_id, end_id))
    }

    /// Set `next = start_id + 1` (rejecting a decrease unless `force` is
    /// set) or `next += increment_id` — exactly one of `start_id` /
    /// `increment_id` must be supplied. The rollback gate
    /// uses the exact `old_next > start_id + 1` comparison from the
    /// original, not `old_next >= start_id + 1`, to tolerate a client
    /// retrying the immediately preceding `update`.
    pub fn update(
        &self,
        store: &KvStore,
        servlet_id: u64,
        start_id: Option<u64>,
        increment_id: Option<u64>,
        force: bool,
    ) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let counter = inner
            .get_mut(&servlet_id)
            .ok_or_else(|| MetaError::InputParam(format!("auto-id counter for servlet {servlet_id} not found")))?;
        let new_next = match (start_id, increment_id) {
            (Some(start_id), None) => {
                if !force && counter.next_id > start_id + 1 {
                    return Err(MetaError::InputParam(
                            "update would roll back the counter by more than one id".to_string(),
                    ));
                }
                start_id + 1
            }
            (None, Some(increment_id)) => counter.next_id + increment_id,
            _ => {
                return Err(MetaError::InputParam(
                        "exactly one of start_id or increment_id must be provided".to_string(),
                ))
            }
        };
        counter.next_id = new_next;
        let snapshot = *counter;
        self.persist(store, servlet_id, &snapshot)?;
        Ok(())
    }

    pub fn get(&self, servlet_id: u64) -> Option<u64> {
        self.inner.read().unwrap().get(&servlet_id).map(|c| c.next_id)
    }

    fn persist(&self, store: &KvStore, servlet_id: u64, counter: &Counter) -> MetaResult<()> {
        let bytes = bincode::serialize(counter)?;
        store.put(CF_META, &autoid_key(servlet_id), &bytes)
    }

    /// Snapshot: a JSON object keyed by servlet id, one file `max_id.json`
    /// rather than the SST dump the discovery group uses —
    /// the counter table is small and human-inspectable.
    pub fn snapshot_json(&self) -> MetaResult<Vec<u8>> {
        let inner = self.inner.read().unwrap();
        let map: HashMap<String, u64> = inner.iter().map(|(id, c)| (id.to_string(), c.next_id)).collect();
        serde_json::to_vec(&map).map_err(|e| MetaError::Internal(e.to_string()))
    }

    pub fn load_snapshot_json(&self, bytes: &[u8]) -> MetaResult<()> {
        let map: HashMap<String, u64> =
        serde_json::from_slice(bytes).map_err(|e| MetaError::Internal(e.to_string()))?;
        let mut inner = self.inner.write().unwrap();
        inner.clear();
        for (id_str, next_id) in map {
            let servlet_id: u64 = id_str
                .parse()
                .map_err(|_| MetaError::Internal(format!("bad servlet id {id_str} in snapshot")))?;
            inner.insert(servlet_id, Counter { next_id });
        }
        Ok(())
    }

    pub fn reload(&self, store: &KvStore) -> Result<(), String> {
        let mut inner = self.inner.write().unwrap();
        inner.clear();
        let rows = store
            .prefix_iter(CF_META, &[SCHEMA_IDENTIFY, AUTOID_KIND])
            .map_err(|e| e.to_string())?;
        for (key, value) in rows {
            if key.len() == 10 {
                let servlet_id = u64::from_be_bytes(key[2..10].try_into().map_err(|_| "bad autoid key")?);
                let counter: Counter = bincode::deserialize(&value).map_err(|e| e.to_string())?;
                inner.insert(servlet_id, counter);
            }
        }
        Ok(())
    }
}

impl Default for AutoIdManager {
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
    fn add_and_gen_batch() {
        let (_dir, store) = open_store();
        let mgr = AutoIdManager::new();
        mgr.add(&store, 1, 100).unwrap();
        let (start, end) = mgr.gen(&store, 1, 10, None).unwrap();
        assert_eq!((start, end), (100, 110));
        assert_eq!(mgr.get(1), Some(110));
    }

    #[test]
    fn gen_respects_caller_supplied_lower_bound() {
        let (_dir, store) = open_store();
        let mgr = AutoIdManager::new();
        mgr.add(&store, 1, 100).unwrap();
        // Lower bound below the current counter is a no-op on the floor.
        let (start, end) = mgr.gen(&store, 1, 5, Some(50)).unwrap();
        assert_eq!((start, end), (100, 105));
        // Lower bound above the current counter jumps `next` forward first.
        let (start, end) = mgr.gen(&store, 1, 5, Some(199)).unwrap();
        assert_eq!((start, end), (200, 205));
    }

    #[test]
    fn update_rejects_rollback_past_one_id() {
        let (_dir, store) = open_store();
        let mgr = AutoIdManager::new();
        mgr.add(&store, 1, 100).unwrap();
        mgr.gen(&store, 1, 5, None).unwrap(); // next_id now 105

        // start_id=104 ("last id I used was 104") is tolerated as a retry:
        // old next (105) is not > start_id+1 (105), so it's accepted and
        // next becomes 105 again — the off-by-one boundary case.
        mgr.update(&store, 1, Some(104), None, false).unwrap();
        assert_eq!(mgr.get(1), Some(105));

        // Rolling back further is rejected without force.
        let err = mgr.update(&store, 1, Some(50), None, false).unwrap_err();
        assert!(matches!(err, MetaError::InputParam(_)));

        mgr.update(&store, 1, Some(50), None, true).unwrap();
        assert_eq!(mgr.get(1), Some(51));
    }

    #[test]
    fn update_by_increment() {
        let (_dir, store) = open_store();
        let mgr = AutoIdManager::new();
        mgr.add(&store, 1, 100).unwrap();
        mgr.update(&store, 1, None, Some(25), false).unwrap();
        assert_eq!(mgr.get(1), Some(125));
    }

    #[test]
    fn update_requires_exactly_one_mode() {
        let (_dir, store) = open_store();
        let mgr = AutoIdManager::new();
        mgr.add(&store, 1, 100).unwrap();
        assert!(mgr.update(&store, 1, None, None, false).is_err());
        assert!(mgr.update(&store, 1, Some(1), Some(1), false).is_err());
    }

    #[test]
    fn snapshot_json_roundtrip() {
        let (_dir, store) = open_store();
        let mgr = AutoIdManager::new();
        mgr.add(&store, 1, 7).unwrap();
        mgr.add(&store, 2, 42).unwrap();
        let bytes = mgr.snapshot_json().unwrap();

        let mgr2 = AutoIdManager::new();
        mgr2.load_snapshot_json(&bytes).unwrap();
        assert_eq!(mgr2.get(1), Some(7));
        assert_eq!(mgr2.get(2), Some(42));
    }
}
