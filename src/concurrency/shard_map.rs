//! 23-shard striped map.
//!
//! Every operation locks exactly one shard except `size` and `clear`,
//! which lock all shards.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

const DEFAULT_SHARDS: usize = 23;

pub struct ShardMap<K, V> {
    shards: Vec<Mutex<HashMap<K, V>>>,
}

impl<K, V> Default for ShardMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl<K, V> ShardMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "shard_count must be > 0");
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Mutex::new(HashMap::new()));
        }
        Self { shards }
    }

    fn shard_idx(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let idx = self.shard_idx(key);
        self.shards[idx].lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        let idx = self.shard_idx(&key);
        self.shards[idx].lock().unwrap().insert(key, value);
    }

    pub fn erase(&self, key: &K) -> Option<V> {
        let idx = self.shard_idx(key);
        self.shards[idx].lock().unwrap().remove(key)
    }

    pub fn exists(&self, key: &K) -> bool {
        let idx = self.shard_idx(key);
        self.shards[idx].lock().unwrap().contains_key(key)
    }

    /// Insert only if absent; returns `true` if inserted.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let idx = self.shard_idx(&key);
        let mut shard = self.shards[idx].lock().unwrap();
        if shard.contains_key(&key) {
            false
        } else {
            shard.insert(key, value);
            true
        }
    }

    /// Run `call` on the value then remove it; `false` if absent.
    pub fn call_and_erase(&self, key: &K, call: impl FnOnce(&V)) -> bool {
        let idx = self.shard_idx(key);
        let mut shard = self.shards[idx].lock().unwrap();
        match shard.remove(key) {
            Some(v) => {
                call(&v);
                true
            }
            None => false,
        }
    }

    /// If absent, initialize from `init` and optionally run `update` on
    /// the fresh value; if present, always run `update`. Returns `true`
    /// if the key already existed (mirrors
    /// `ThreadSafeMap::init_if_not_exist_else_update`).
    pub fn init_if_absent_else_update(
        &self,
        key: K,
        init: impl FnOnce() -> V,
        update: impl FnOnce(&mut V),
    ) -> bool {
        let idx = self.shard_idx(&key);
        let mut shard = self.shards[idx].lock().unwrap();
        match shard.get_mut(&key) {
            Some(v) => {
                update(v);
                true
            }
            None => {
                let mut v = init();
                update(&mut v);
                shard.insert(key, v);
                false
            }
        }
    }

    /// Iterate every entry under its shard's lock. Callbacks must not
    /// call back into this map (documented contract, ).
    pub fn traverse(&self, mut call: impl FnMut(&K, &V)) {
        for shard in &self.shards {
            let guard = shard.lock().unwrap();
            for (k, v) in guard.iter() {
                call(k, v);
            }
        }
    }

    /// Snapshot each shard under lock, then iterate outside the lock.
    pub fn traverse_copy(&self, mut call: impl FnMut(&K, &V)) {
        for shard in &self.shards {
            let snapshot: Vec<(K, V)> = {
                let guard = shard.lock().unwrap();
                guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            };
            for (k, v) in &snapshot {
                call(k, v);
            }
        }
    }

    pub fn size(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().unwrap().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_ops() {
        let map: ShardMap<String, i32> = ShardMap::default();
        assert!(map.insert_if_absent("a".into(), 1));
        assert!(!map.insert_if_absent("a".into(), 2));
        assert_eq!(map.get(&"a".to_string()), Some(1));
        assert_eq!(map.size(), 1);
        map.set("b".into(), 2);
        assert_eq!(map.size(), 2);
        map.erase(&"a".to_string());
        assert_eq!(map.size(), 1);
        map.clear();
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn call_and_erase_runs_callback() {
        let map: ShardMap<String, i32> = ShardMap::default();
        map.set("a".into(), 42);
        let mut seen = None;
        let existed = map.call_and_erase(&"a".to_string(), |v| seen = Some(*v));
        assert!(existed);
        assert_eq!(seen, Some(42));
        assert!(!map.exists(&"a".to_string()));
    }

    #[test]
    fn init_if_absent_else_update_behaves() {
        let map: ShardMap<String, i32> = ShardMap::default();
        let existed = map.init_if_absent_else_update("k".into(), || 0, |v| *v += 1);
        assert!(!existed);
        assert_eq!(map.get(&"k".to_string()), Some(1));
        let existed = map.init_if_absent_else_update("k".into(), || 0, |v| *v += 1);
        assert!(existed);
        assert_eq!(map.get(&"k".to_string()), Some(2));
    }

    #[test]
    fn traverse_copy_sees_all_entries() {
        let map: ShardMap<i32, i32> = ShardMap::default();
        for i in 0..50 {
            map.set(i, i * 2);
        }
        let mut total = 0;
        map.traverse_copy(|_, v| total += v);
        assert_eq!(total, (0..50).map(|i| i * 2).sum::<i32>());
    }
}
