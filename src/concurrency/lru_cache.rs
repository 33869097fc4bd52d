//! LRU cache with a synchronous eviction destructor, backed by the `lru`
//! crate.
//!
//! Used by the plugin download path to cache open
//! `(fd, path)` hard-link handles: on hit the entry moves to the tail;
//! on insert past capacity the head is evicted and its destructor — here,
//! closing the fd and removing the hard link — runs while the cache's
//! lock is still held, so lookup and cleanup are serialized.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

pub struct FdLruCache<K, V> {
    inner: Mutex<LruCache<K, V>>,
    on_evict: Box<dyn Fn(K, V) + Send + Sync>,
}

impl<K: Hash + Eq, V> FdLruCache<K, V> {
    pub fn new(capacity: usize, on_evict: impl Fn(K, V) + Send + Sync + 'static) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            on_evict: Box::new(on_evict),
        }
    }

    /// Look up `key`, promoting it to the tail on hit.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut guard = self.inner.lock().unwrap();
        guard.get(key).cloned()
    }

    /// Insert `value`, running the eviction destructor (under lock) if
    /// this push evicted the head entry.
    pub fn put(&self, key: K, value: V) {
        let mut guard = self.inner.lock().unwrap();
        if let Some((evicted_key, evicted_value)) = guard.push(key, value) {
            (self.on_evict)(evicted_key, evicted_value);
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().unwrap();
        guard.pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn evicts_head_and_runs_destructor() {
        let evicted = Arc::new(AtomicUsize::new(0));
        let evicted2 = Arc::clone(&evicted);
        let cache: FdLruCache<i32, i32> =
        FdLruCache::new(2, move |_k, _v| evicted2.fetch_add(1, Ordering::SeqCst));

        cache.put(1, 100);
        cache.put(2, 200);
        assert_eq!(evicted.load(Ordering::SeqCst), 0);
        cache.put(3, 300); // evicts key 1
        assert_eq!(evicted.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&3), Some(300));
    }

    #[test]
    fn hit_promotes_to_tail() {
        let cache: FdLruCache<i32, i32> = FdLruCache::new(2, |_, _| {});
        cache.put(1, 10);
        cache.put(2, 20);
        cache.get(&1); // promote 1
        cache.put(3, 30); // should evict 2, not 1
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&2), None);
    }
}
