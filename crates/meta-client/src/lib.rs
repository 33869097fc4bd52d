//! Leader-following RPC client shared by the router, the REST bridge, and
//! the CLI (, §4.6). Deliberately independent of the `metad`
//! server crate — no `rocksdb`/`openraft` in this dependency tree — so any
//! of those three binaries can depend on it without dragging in storage or
//! consensus internals.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ClientConfig, LeaderFollowingClient};
pub use error::{ClientError, ClientResult};
pub use types::{ErrCode, RaftControlRequest, RpcEnvelope, ServiceMethod};
