//! Bounded worker pool gated by a counting semaphore.
//!
//! `run` blocks until a permit is available, spawns a worker that releases
//! its permit on completion, and `join` waits until every spawned worker
//! has finished. `tokio::sync::Semaphore` gives "bounded concurrency,
//! block until a slot frees up" natively, so it stands in for a hand-rolled
//! counting condvar.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    inflight: Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            inflight: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    /// Block until a slot is free, then spawn `task` on the runtime.
    pub async fn run<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("worker pool semaphore closed");
        let handle = tokio::spawn(async move {
                task.await;
                drop(permit);
        });
        self.inflight.lock().await.push(handle);
    }

    /// Wait until every spawned task has completed.
    pub async fn join(&self) {
        let mut guard = self.inflight.lock().await;
        for handle in guard.drain(..) {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn bounds_concurrency_and_joins() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            let peak = Arc::clone(&peak);
            pool.run(async move {
                    let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
            })
                .await;
        }
        pool.join().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
