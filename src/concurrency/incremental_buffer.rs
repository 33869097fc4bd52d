//! Incremental-change buffer with time-based GC.
//!
//! Time-ordered by applied-index, split across two generations
//! (`front`, the generation currently visible to readers; `background`,
//! the generation actively being appended to). Consumers pass
//! `(last_seen_index, current_applied)`; this returns either
//! [`Lookup::FullResync`] (the buffer no longer covers `last_seen_index`)
//! or [`Lookup::Delta`] with every change in `(last_seen_index, current_applied]`.
//!
//! ## Swap semantics
//!
//! A naive swap clears the old front before the new background has any
//! content, which can drop changes that were only in the old front and
//! never migrated forward. This implementation always replays the old
//! front's still-live entries into the new background at swap time, so a
//! change is never dropped across a swap cycle.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub enum Lookup<T: Clone> {
    FullResync,
    Delta(Vec<(i64, T)>),
}

struct Inner<T> {
    front: BTreeMap<i64, T>,
    background: BTreeMap<i64, T>,
    earliest_background_time: Option<Instant>,
}

pub struct IncrementalBuffer<T> {
    inner: Mutex<Inner<T>>,
    gc_time: Duration,
}

impl<T: Clone> IncrementalBuffer<T> {
    pub fn new(gc_time: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                    front: BTreeMap::new(),
                    background: BTreeMap::new(),
                    earliest_background_time: None,
            }),
            gc_time,
        }
    }

    /// Record a change at `apply_index`.
    pub fn put(&self, apply_index: i64, info: T) {
        let mut inner = self.inner.lock().unwrap();
        if inner.background.is_empty() {
            inner.earliest_background_time = Some(Instant::now());
        }
        inner.background.insert(apply_index, info);

        let should_swap = inner
            .earliest_background_time
            .map(|t| t.elapsed() > self.gc_time)
            .unwrap_or(false);
        if should_swap {
            // Carry forward anything still only in the old front before
            // it is retired, so no change is silently dropped.
            let carry_forward: Vec<(i64, T)> = inner
                .front
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect();
            std::mem::swap(&mut inner.front, &mut inner.background);
            inner.background.clear();
            for (k, v) in carry_forward {
                inner.background.entry(k).or_insert(v);
            }
            inner.earliest_background_time = None;
        }
    }

    /// Drop every recorded change. Used after a full reload, where the
    /// rebuilt state already reflects every change and stale deltas would
    /// only be replayed a second time.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.front.clear();
        inner.background.clear();
        inner.earliest_background_time = None;
    }

    /// Resolve a consumer's view. `last_seen_index` is the highest index
    /// the consumer has already processed.
    pub fn check_and_update(&self, last_seen_index: i64, applied_index: i64) -> Lookup<T> {
        let inner = self.inner.lock().unwrap();
        if inner.front.is_empty() && inner.background.is_empty() {
            return if last_seen_index < applied_index {
                Lookup::FullResync
            } else {
                Lookup::Delta(Vec::new())
            };
        }

        let floor = inner
            .front
            .keys()
            .next()
            .into_iter()
            .chain(inner.background.keys().next())
            .min()
            .copied()
            .unwrap_or(applied_index);

        if last_seen_index < floor - 1 {
            return Lookup::FullResync;
        }

        let mut delta: Vec<(i64, T)> = inner
            .front
            .range((last_seen_index + 1)..=applied_index)
            .chain(inner.background.range((last_seen_index + 1)..=applied_index))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        delta.sort_by_key(|(k, _)| *k);
        delta.dedup_by_key(|(k, _)| *k);
        Lookup::Delta(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_covers_contiguous_range() {
        let buf: IncrementalBuffer<String> = IncrementalBuffer::new(Duration::from_secs(3600));
        buf.put(1, "a".into());
        buf.put(2, "b".into());
        buf.put(3, "c".into());

        match buf.check_and_update(1, 3) {
            Lookup::Delta(d) => {
                assert_eq!(d, vec![(2, "b".to_string()), (3, "c".to_string())]);
            }
            Lookup::FullResync => panic!("expected delta"),
        }
    }

    #[test]
    fn full_resync_when_ahead_of_applied() {
        let buf: IncrementalBuffer<String> = IncrementalBuffer::new(Duration::from_secs(3600));
        match buf.check_and_update(0, 5) {
            Lookup::FullResync => {}
            Lookup::Delta(_) => panic!("expected full resync: buffer is empty but caller is behind"),
        }
    }

    #[test]
    fn swap_never_drops_a_change() {
        // gc_time = 0 forces a swap on every put after the first.
        let buf: IncrementalBuffer<i32> = IncrementalBuffer::new(Duration::from_millis(0));
        for i in 1..=20 {
            std::thread::sleep(Duration::from_millis(1));
            buf.put(i, i * 10);
        }
        match buf.check_and_update(0, 20) {
            Lookup::Delta(d) => {
                let indices: Vec<i64> = d.iter().map(|(k, _)| *k).collect();
                for i in 1..=20 {
                    assert!(indices.contains(&i), "missing index {i} across swap cycles");
                }
            }
            Lookup::FullResync => panic!("buffer should still cover index 0"),
        }
    }
}
