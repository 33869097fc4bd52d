//! Wire-level request/response types for the three co-resident Raft groups,
//! and the `openraft::declare_raft_types!` instantiation for each — one
//! request/response/type-config triple per group rather than a single
//! shared one.
//!
//! These are the only types that cross the Raft log boundary — they carry
//! just enough to replay deterministically; managers translate them to and
//! from their own entity structs (`crate::registry`, `crate::config_store`,
//! `crate::plugin`, `crate::autoid`, `crate::tso`).

use std::io::Cursor;

use openraft::{declare_raft_types, BasicNode, Entry, TokioRuntime};
use serde::{Deserialize, Serialize};

pub type NodeId = u64;
pub type RaftNode = BasicNode;

// ── Discovery group (namespace/zone/servlet/instance/privilege/config) ────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DiscoveryRequest {
    CreateNamespace {
        name: String,
        quota: Option<i64>,
        resource_tag: Option<String>,
        replica_num: Option<i32>,
    },
    ModifyNamespace {
        namespace_id: u64,
        quota: Option<i64>,
        resource_tag: Option<String>,
        replica_num: Option<i32>,
    },
    DropNamespace {
        namespace_id: u64,
    },
    CreateZone {
        namespace_id: u64,
        name: String,
        quota: Option<i64>,
    },
    ModifyZone {
        zone_id: u64,
        quota: Option<i64>,
    },
    DropZone {
        zone_id: u64,
    },
    CreateServlet {
        zone_id: u64,
        name: String,
    },
    ModifyServlet {
        servlet_id: u64,
        name: Option<String>,
    },
    DropServlet {
        servlet_id: u64,
    },
    AddInstance {
        servlet_id: u64,
        address: String,
        env: Option<String>,
        status: Option<String>,
    },
    RemoveInstance {
        instance_id: u64,
    },
    UpdateInstanceStatus {
        instance_id: u64,
        status: String,
    },
    GrantPrivilege {
        username: String,
        zone_rw: Vec<(u64, u32)>,
        servlet_rw: Vec<(u64, u32)>,
        force: bool,
    },
    RevokePrivilege {
        username: String,
        zone_rw: Vec<(u64, u32)>,
        servlet_rw: Vec<(u64, u32)>,
    },
    DropPrivilege {
        username: String,
    },
    CreateConfig {
        name: String,
        version: String,
        content: Vec<u8>,
        config_type: Option<String>,
    },
    RemoveConfigByVersion {
        name: String,
        version: String,
    },
    RemoveConfigByName {
        name: String,
    },
    CreatePlugin {
        name: String,
        version: String,
        declared_size: u64,
        declared_md5: String,
    },
    UploadPluginChunk {
        name: String,
        version: String,
        offset: u64,
        data: Vec<u8>,
    },
    TombstonePlugin {
        name: String,
        version: String,
        /// Stamped by the leader when proposing, not sampled per-replica at
        /// apply time, so every replica persists the same timestamp.
        #[serde(default)]
        now_secs: i64,
    },
    RestorePlugin {
        name: String,
        version: String,
    },
    PurgePlugin {
        name: String,
        version: String,
    },
    PurgeTombstonedPlugins {
        /// Stamped by the leader when proposing; see `TombstonePlugin::now_secs`.
        #[serde(default)]
        now_secs: i64,
        older_than_secs: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum DiscoveryResponse {
    #[default]
    Ok,
    Created {
        id: u64,
    },
    Error {
        message: String,
    },
}

declare_raft_types!(
    pub DiscoveryTypeConfig:
    D = DiscoveryRequest,
    R = DiscoveryResponse,
    NodeId = NodeId,
    Node = BasicNode,
    Entry = Entry<DiscoveryTypeConfig>,
    SnapshotData = Cursor<Vec<u8>>,
    AsyncRuntime = TokioRuntime,
);

// ── Auto-increment group ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AutoIdRequest {
    AddAutoIncrement { servlet_id: u64, start_id: u64 },
    DropAutoIncrement { servlet_id: u64 },
    GenIdBatch { servlet_id: u64, count: u64, start_id: Option<u64> },
    UpdateAutoIncrement {
        servlet_id: u64,
        start_id: Option<u64>,
        increment_id: Option<u64>,
        force: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum AutoIdResponse {
    #[default]
    Ok,
    Range {
        start_id: u64,
        end_id: u64,
    },
    Error {
        message: String,
    },
}

declare_raft_types!(
    pub AutoIdTypeConfig:
    D = AutoIdRequest,
    R = AutoIdResponse,
    NodeId = NodeId,
    Node = BasicNode,
    Entry = Entry<AutoIdTypeConfig>,
    SnapshotData = Cursor<Vec<u8>>,
    AsyncRuntime = TokioRuntime,
);

// ── TSO group ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TsoRequest {
    GenTso { count: u32 },
    ResetTso { physical_ms: i64 },
    /// Leader-only save-ahead persistence : replicates the
    /// physical clock 3000ms ahead of what has actually been handed out so
    /// a newly elected leader never reissues a timestamp it already gave.
    UpdateTso { physical_ms: i64, logical: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum TsoResponse {
    #[default]
    Ok,
    Timestamp {
        physical_ms: i64,
        logical: u32,
    },
    Range {
        start_physical_ms: i64,
        start_logical: u32,
        end_physical_ms: i64,
        end_logical: u32,
    },
    Error {
        message: String,
    },
}

declare_raft_types!(
    pub TsoTypeConfig:
    D = TsoRequest,
    R = TsoResponse,
    NodeId = NodeId,
    Node = BasicNode,
    Entry = Entry<TsoTypeConfig>,
    SnapshotData = Cursor<Vec<u8>>,
    AsyncRuntime = TokioRuntime,
);
