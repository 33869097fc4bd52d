//! The leader's RPC service: the HTTP surface every replica exposes for
//! the router, the CLI, and direct callers. Write requests are submitted
//! through `openraft::Raft::client_write`, which itself enforces "only
//! the leader accepts writes" and reports `ForwardToLeader` otherwise;
//! read ("query") requests bypass Raft entirely and read straight from
//! the relevant manager's in-memory state, splitting mutating ops (go
//! through the state machine) from query ops (served locally).
//!
//! Built on the same `axum` wiring style throughout this crate
//! (`Router::new().route(...).with_state(...)`, `CorsLayer::permissive()`),
//! generalized to the full method family instead of a single endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use openraft::error::{ClientWriteError, RaftError};
use openraft::{BasicNode, Raft, RaftTypeConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::autoid::handler::AutoIdHandler;
use crate::errors::ErrCode;
use crate::raft::{
    AutoIdRequest, AutoIdTypeConfig, DiscoveryRequest, DiscoveryTypeConfig, NodeId, TsoRequest,
    TsoTypeConfig,
};
use crate::registry::handler::DiscoveryHandler;
use crate::tso::handler::TsoHandler;

pub mod query;
pub mod raft_control;

pub use query::DiscoveryQuery;
pub use raft_control::RaftControlRequest;

/// Everything one HTTP listener needs to answer every RPC method named in
///, for all three co-resident Raft groups.
#[derive(Clone)]
pub struct AppState {
    pub discovery_raft: Arc<Raft<DiscoveryTypeConfig>>,
    pub discovery_handler: Arc<DiscoveryHandler>,
    pub autoid_raft: Arc<Raft<AutoIdTypeConfig>>,
    pub autoid_handler: Arc<AutoIdHandler>,
    pub tso_raft: Arc<Raft<TsoTypeConfig>>,
    pub tso_handler: Arc<TsoHandler>,
    pub raft_control: Arc<raft_control::RaftControlState>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/rpc/discovery_manager", post(discovery_manager))
        .route("/rpc/config_manage", post(discovery_manager))
        .route("/rpc/plugin_manage", post(discovery_manager))
        .route("/rpc/discovery_query", post(discovery_query))
        .route("/rpc/config_query", post(discovery_query))
        .route("/rpc/plugin_query", post(discovery_query))
        .route("/rpc/tso_service", post(tso_service))
        .route("/rpc/raft_control", post(raft_control::handle))
        .with_state(state)
}

fn ok_envelope(data: Value) -> Json<Value> {
    Json(json!({ "errcode": ErrCode::Success, "errmsg": "SUCCESS", "data": data }))
}

fn error_envelope(code: ErrCode, msg: impl Into<String>) -> Json<Value> {
    Json(json!({ "errcode": code, "errmsg": msg.into() }))
}

fn not_leader_envelope(leader: Option<String>) -> Json<Value> {
    Json(json!({ "errcode": ErrCode::NotLeader, "errmsg": "not leader", "leader": leader }))
}

/// Submit `request` through `raft.client_write`, translating the leader
/// check openraft already performs into the wire envelope
/// expects (`NOT_LEADER` + the current leader's address).
async fn submit<C>(raft: &Raft<C>, request: C::D) -> Json<Value>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
    C::D: Clone,
    C::R: Serialize,
{
    match raft.client_write(request).await {
        Ok(resp) => ok_envelope(json!(resp.data)),
        Err(RaftError::APIError(ClientWriteError::ForwardToLeader(fwd))) => {
            not_leader_envelope(fwd.leader_node.map(|n| n.addr))
        }
        Err(e) => error_envelope(ErrCode::InternalError, e.to_string()),
    }
}

async fn decode<T: DeserializeOwned>(body: Value) -> Result<T, Json<Value>> {
    serde_json::from_value(body)
        .map_err(|e| error_envelope(ErrCode::ParseFromPbFail, format!("decode request: {e}")))
}

/// names no dedicated method for the auto-increment group, so its
/// mutations ride the same `discovery_manager`/`discovery_query` methods as
/// the registry — every auto-increment counter is scoped to a servlet id
/// already owned by the discovery group, making this the natural home.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ManagementRequest {
    Discovery(DiscoveryRequest),
    AutoId(AutoIdRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ManagementQuery {
    Discovery(DiscoveryQuery),
    GetAutoIncrement { servlet_id: u64 },
}

/// Stamps the leader's wall clock onto requests whose `apply` must stay a
/// pure function of the log entry: the timestamp is fixed once here, before
/// the entry is proposed, so every replica sees the same value at apply time
/// instead of sampling its own clock.
fn stamp_leader_clock(request: DiscoveryRequest) -> DiscoveryRequest {
    let now_secs = chrono::Utc::now().timestamp();
    match request {
        DiscoveryRequest::TombstonePlugin { name, version, .. } => {
            DiscoveryRequest::TombstonePlugin { name, version, now_secs }
        }
        DiscoveryRequest::PurgeTombstonedPlugins { older_than_secs, .. } => {
            DiscoveryRequest::PurgeTombstonedPlugins { now_secs, older_than_secs }
        }
        other => other,
    }
}

async fn discovery_manager(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let request: ManagementRequest = match decode(body).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match request {
        ManagementRequest::Discovery(r) => submit(&state.discovery_raft, stamp_leader_clock(r)).await,
        ManagementRequest::AutoId(r) => submit(&state.autoid_raft, r).await,
    }
}

async fn discovery_query(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let request: ManagementQuery = match decode(body).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match request {
        ManagementQuery::Discovery(q) => ok_envelope(query::answer(&state.discovery_handler, q)),
        ManagementQuery::GetAutoIncrement { servlet_id } => {
            ok_envelope(json!({ "next_id": state.autoid_handler.counters.get(servlet_id) }))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum TsoServiceRequest {
    GenTso { count: u32 },
    Current,
}

async fn tso_service(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let request: TsoServiceRequest = match decode(body).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match request {
        TsoServiceRequest::GenTso { count } => submit(&state.tso_raft, TsoRequest::GenTso { count }).await,
        TsoServiceRequest::Current => {
            let ts = state.tso_handler.clock.current();
            ok_envelope(json!({ "physical_ms": ts.physical_ms, "logical": ts.logical }))
        }
    }
}
