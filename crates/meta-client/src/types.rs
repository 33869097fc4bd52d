//! Wire types shared by every caller of [`crate::client::LeaderFollowingClient`]:
//! the router, the REST bridge, and the CLI.
//!
//! This crate speaks plain JSON-over-HTTP rather than a length-delimited
//! binary protocol (see `DESIGN.md`), so every envelope here carries the
//! same stable shape on the wire: `errcode`, `errmsg`, and on
//! leader-election errors a `leader` endpoint string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend service method names: the path segment the client posts the
/// request body to, and the one the server's RPC dispatch (or the router
/// standing in front of it) reads to select a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMethod {
    DiscoveryManage,
    DiscoveryQuery,
    ConfigManage,
    ConfigQuery,
    PluginManage,
    PluginQuery,
    TsoService,
    RaftControl,
}

impl ServiceMethod {
    pub fn path(self) -> &'static str {
        match self {
            ServiceMethod::DiscoveryManage => "discovery_manager",
            ServiceMethod::DiscoveryQuery => "discovery_query",
            ServiceMethod::ConfigManage => "config_manage",
            ServiceMethod::ConfigQuery => "config_query",
            ServiceMethod::PluginManage => "plugin_manage",
            ServiceMethod::PluginQuery => "plugin_query",
            ServiceMethod::TsoService => "tso_service",
            ServiceMethod::RaftControl => "raft_control",
        }
    }
}

/// Stable wire-level error codes. Duplicated from `metad::errors::ErrCode` rather than shared
/// via a path dependency, so this crate never needs `rocksdb`/`openraft` to
/// build a CLI or router binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrCode {
    Success = 0,
    NotLeader,
    HaveNotInit,
    InputParamError,
    InternalError,
    ParseFromPbFail,
    ParseToPbFail,
    UnknownReqType,
    PeerNotEqual,
    Unavailable,
}

impl ErrCode {
    pub fn is_success(self) -> bool {
        matches!(self, ErrCode::Success)
    }
}

/// The envelope every RPC response carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub errcode: ErrCode,
    pub errmsg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            errcode: ErrCode::Success,
            errmsg: "SUCCESS".to_string(),
            leader: None,
            data: Some(data),
        }
    }
}

/// Raft-control operations, addressed by `region_id`: `0` = discovery
/// group, `1` = auto-increment group, `2` = TSO group — matching the
/// CLI's `--cluster {discovery|tso|atomic}` selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RaftControlRequest {
    SetPeer {
        region_id: u64,
        add: Vec<(u64, String)>,
        remove: Vec<u64>,
    },
    TransLeader {
        region_id: u64,
        target: u64,
    },
    SnapShot {
        region_id: u64,
    },
    ShutDown {
        region_id: u64,
    },
    GetLeader {
        region_id: u64,
    },
    ListPeer {
        region_id: u64,
    },
    ResetVoteTime {
        region_id: u64,
    },
}

/// `region_id` for the `--cluster` CLI selector.
pub const REGION_DISCOVERY: u64 = 0;
pub const REGION_AUTOID: u64 = 1;
pub const REGION_TSO: u64 = 2;

pub fn region_id_for_cluster(cluster: &str) -> Option<u64> {
    match cluster {
        "discovery" => Some(REGION_DISCOVERY),
        "atomic" => Some(REGION_AUTOID),
        "tso" => Some(REGION_TSO),
        _ => None,
    }
}
