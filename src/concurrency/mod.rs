//! Concurrency utilities used across the registry and plugin managers: a
//! shard-striped map (`InstanceManager`'s address table), a read-mostly
//! twin buffer (`NamespaceManager`'s list cache), an incremental-change
//! buffer (`InstanceManager`'s change feed), an LRU cache with a
//! lock-synchronized eviction destructor (`PluginStore`'s download fd
//! cache), and a bounded worker pool for capped concurrent async fan-out
//! (currently unconsumed — kept for whichever group first needs to dial
//! several peers concurrently; see DESIGN.md).
//! Built on the same `tokio`-based idioms used throughout this crate —
//! spawned background tasks, `Arc<RwLock<_>>` state.
//!
//! No separate scoped-lock wrapper lives here: every lock in this crate is
//! already a plain `Mutex`/`RwLock` whose guard's drop point is the block
//! it's taken in, so `MutexGuard`/`RwLockWriteGuard` RAII covers the same
//! ground a `ScopedLock`/`lock_scope!` type would add on top. See DESIGN.md.

pub mod incremental_buffer;
pub mod lru_cache;
pub mod shard_map;
pub mod twin_buffer;
pub mod worker_pool;

pub use incremental_buffer::{IncrementalBuffer, Lookup};
pub use lru_cache::FdLruCache;
pub use shard_map::ShardMap;
pub use twin_buffer::TwinBuffer;
pub use worker_pool::WorkerPool;
