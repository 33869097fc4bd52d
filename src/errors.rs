//! Stable error codes and the crate-wide error type.
//!
//! `ErrCode` is returned on the wire and must stay stable
//! across versions — never renumber or remove a variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-stable error codes.
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
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrCode::Success => "SUCCESS",
            ErrCode::NotLeader => "NOT_LEADER",
            ErrCode::HaveNotInit => "HAVE_NOT_INIT",
            ErrCode::InputParamError => "INPUT_PARAM_ERROR",
            ErrCode::InternalError => "INTERNAL_ERROR",
            ErrCode::ParseFromPbFail => "PARSE_FROM_PB_FAIL",
            ErrCode::ParseToPbFail => "PARSE_TO_PB_FAIL",
            ErrCode::UnknownReqType => "UNKNOWN_REQ_TYPE",
            ErrCode::PeerNotEqual => "PEER_NOT_EQUAL",
            ErrCode::Unavailable => "UNAVAILABLE",
        }
    }
}

/// A response envelope every RPC carries : `errcode`, `errmsg`,
/// and on leader-election errors the current `leader` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStatus {
    pub errcode: ErrCode,
    pub errmsg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

impl RpcStatus {
    pub fn ok() -> Self {
        Self {
            errcode: ErrCode::Success,
            errmsg: "SUCCESS".to_string(),
            leader: None,
        }
    }

    pub fn err(code: ErrCode, msg: impl Into<String>) -> Self {
        Self {
            errcode: code,
            errmsg: msg.into(),
            leader: None,
        }
    }

    pub fn not_leader(leader: Option<String>) -> Self {
        Self {
            errcode: ErrCode::NotLeader,
            errmsg: "not leader".to_string(),
            leader,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errcode == ErrCode::Success
    }
}

/// In-process error type for manager and store operations. Never thrown
/// across the Raft apply boundary — managers translate this
/// into an `RpcStatus` instead.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("input param error: {0}")]
    InputParam(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not leader")]
    NotLeader { leader: Option<String> },

    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type MetaResult<T> = Result<T, MetaError>;

impl MetaError {
    pub fn to_rpc_status(&self) -> RpcStatus {
        match self {
            MetaError::InputParam(m) => RpcStatus::err(ErrCode::InputParamError, m.clone()),
            MetaError::Internal(m) => RpcStatus::err(ErrCode::InternalError, m.clone()),
            MetaError::Storage(e) => RpcStatus::err(ErrCode::InternalError, e.to_string()),
            MetaError::Serialization(e) => RpcStatus::err(ErrCode::ParseToPbFail, e.to_string()),
            MetaError::Io(e) => RpcStatus::err(ErrCode::InternalError, e.to_string()),
            MetaError::NotLeader { leader } => RpcStatus::not_leader(leader.clone()),
            MetaError::Unavailable(m) => RpcStatus::err(ErrCode::Unavailable, m.clone()),
        }
    }
}
