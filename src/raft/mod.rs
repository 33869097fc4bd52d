//! Embedded multi-raft consensus core.
//!
//! Three independent `openraft` groups run co-resident in one process, each
//! wrapping its own on-disk [`crate::store::KvStore`] region through
//! [`storage::RocksCombinedStorage`]: the discovery group (namespaces,
//! zones, servlets, instances, privileges, config versions and plugin
//! artifacts), the auto-increment group, and the TSO group. The
//! `Adaptor`-wrapped combined `RaftStorage` pattern is generalized from one
//! concrete `TypeConfig` to any `C: RaftTypeConfig` plus a
//! [`storage::GroupHandler`] supplying the per-group apply and snapshot
//! logic, and transported over HTTP/JSON via `axum`/`reqwest` rather than
//! gRPC, since this crate has no protobuf service definition of its own.

pub mod group;
pub mod network;
pub mod storage;
pub mod types;

pub use group::{RaftGroup, RaftGroupConfig};
pub use storage::GroupHandler;
pub use types::{
    AutoIdRequest, AutoIdResponse, AutoIdTypeConfig, DiscoveryRequest, DiscoveryResponse,
    DiscoveryTypeConfig, NodeId, RaftNode, TsoRequest, TsoResponse, TsoTypeConfig,
};
