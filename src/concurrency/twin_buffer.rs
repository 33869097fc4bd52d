//! Twin-buffer for read-mostly structures shared by many readers and a
//! single slow-path writer.
//!
//! Reads return the active instance without synchronization; mutations
//! are queued to a single-writer task that applies them to the inactive
//! instance, flips the active index, then re-applies to the now-inactive
//! instance so both sides stay convergent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct TwinBuffer<T> {
    slots: [Arc<Mutex<T>>; 2],
    active: AtomicUsize,
    // Single-writer lock: only one mutation may be in flight at a time.
    writer_lock: Mutex<()>,
}

impl<T: Clone> TwinBuffer<T> {
    pub fn new(initial: T) -> Self {
        Self {
            slots: [
                Arc::new(Mutex::new(initial.clone())),
                Arc::new(Mutex::new(initial)),
            ],
            active: AtomicUsize::new(0),
            writer_lock: Mutex::new(()),
        }
    }

    /// Read the active instance without blocking the writer.
    pub fn read(&self) -> T {
        let idx = self.active.load(Ordering::Acquire);
        self.slots[idx].lock().unwrap().clone()
    }

    /// Apply `mutate` to the background instance, flip, then re-apply to
    /// keep both sides convergent.
    pub fn modify(&self, mutate: impl Fn(&mut T)) {
        let _guard = self.writer_lock.lock().unwrap();
        let active = self.active.load(Ordering::Acquire);
        let background = 1 - active;

        {
            let mut bg = self.slots[background].lock().unwrap();
            mutate(&mut bg);
        }
        self.active.store(background, Ordering::Release);
        {
            let mut now_background = self.slots[active].lock().unwrap();
            mutate(&mut now_background);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_reflects_modify() {
        let buf = TwinBuffer::new(0i32);
        assert_eq!(buf.read(), 0);
        buf.modify(|v| *v += 1);
        assert_eq!(buf.read(), 1);
        buf.modify(|v| *v += 5);
        assert_eq!(buf.read(), 6);
    }

    #[test]
    fn both_sides_stay_convergent() {
        let buf = TwinBuffer::new(vec![1, 2, 3]);
        buf.modify(|v| v.push(4));
        assert_eq!(buf.read(), vec![1, 2, 3, 4]);
        buf.modify(|v| v.push(5));
        assert_eq!(buf.read(), vec![1, 2, 3, 4, 5]);
    }
}
