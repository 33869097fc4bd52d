//! `metad` — three co-resident Raft replication groups (discovery,
//! auto-increment, TSO) backing a namespace/zone/servlet/instance/privilege
//! registry, a versioned config store, and a chunked plugin artifact store,
//! fronted by a router/REST bridge and a CLI (`metactl`).
//!
//! Module layout mirrors these subsystems: storage at the bottom,
//! concurrency primitives shared across managers, the Raft plumbing that
//! replicates every mutation, the managers themselves, and the RPC/REST
//! surface that fronts them.

pub mod autoid;
pub mod concurrency;
pub mod config;
pub mod config_store;
pub mod errors;
pub mod plugin;
pub mod raft;
pub mod registry;
pub mod rest;
pub mod router;
pub mod store;
pub mod tso;

pub use errors::{ErrCode, MetaError, MetaResult, RpcStatus};
pub use store::KvStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_cargo_package_version() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }
}
