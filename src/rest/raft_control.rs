//! Raft-control operations, addressed by a small integer `region_id`:
//! `SetPeer`, `TransLeader`, `SnapShot`, `ShutDown`, `GetLeader`,
//! `ListPeer`, `ResetVoteTime`. Each is routed to whichever of the three
//! co-resident groups `region_id` names (`0`=discovery, `1`=autoid,
//! `2`=tso — the CLI's `--cluster {discovery|tso|atomic}` selector).
//!
//! `SetPeer`, `SnapShot`, and `ShutDown` run as async Raft operations;
//! that's simply `.await`ing the underlying `openraft::Raft` call rather
//! than a callback, since every handler in this crate is already async
//! end-to-end.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use openraft::{BasicNode, Raft};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ErrCode;
use crate::raft::{AutoIdTypeConfig, DiscoveryTypeConfig, NodeId, TsoTypeConfig};

use super::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RaftControlRequest {
    SetPeer {
        region_id: u64,
        add: Vec<(NodeId, String)>,
        remove: Vec<NodeId>,
    },
    TransLeader {
        region_id: u64,
        target: NodeId,
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

/// Holds the three groups' `Raft` handles so `region_id` can select among
/// them without threading three separate states through every route.
pub struct RaftControlState {
    pub discovery: Arc<Raft<DiscoveryTypeConfig>>,
    pub autoid: Arc<Raft<AutoIdTypeConfig>>,
    pub tso: Arc<Raft<TsoTypeConfig>>,
}

pub async fn handle(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let request: RaftControlRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return Json(json!({ "errcode": ErrCode::ParseFromPbFail, "errmsg": e.to_string() }));
        }
    };

    match request {
        RaftControlRequest::SetPeer { region_id, add, remove } => {
            dispatch_set_peer(&state.raft_control, region_id, add, remove).await
        }
        RaftControlRequest::TransLeader { region_id, target } => {
            dispatch_trans_leader(&state.raft_control, region_id, target).await
        }
        RaftControlRequest::SnapShot { region_id } => dispatch_snapshot(&state.raft_control, region_id).await,
        RaftControlRequest::ShutDown { region_id } => dispatch_shutdown(&state.raft_control, region_id).await,
        RaftControlRequest::GetLeader { region_id } => dispatch_get_leader(&state.raft_control, region_id),
        RaftControlRequest::ListPeer { region_id } => dispatch_list_peer(&state.raft_control, region_id),
        RaftControlRequest::ResetVoteTime { region_id } => {
            dispatch_reset_vote_time(&state.raft_control, region_id).await
        }
    }
}

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "errcode": ErrCode::Success, "errmsg": "SUCCESS", "data": data }))
}

fn bad_region(region_id: u64) -> Json<Value> {
    Json(json!({
                "errcode": ErrCode::InputParamError,
                "errmsg": format!("unknown region_id {region_id}, expected 0 (discovery), 1 (autoid), or 2 (tso)"),
    }))
}

fn err(msg: impl std::fmt::Display) -> Json<Value> {
    Json(json!({ "errcode": ErrCode::InternalError, "errmsg": msg.to_string() }))
}

/// Within this many log entries of the group's own `last_log_index`, a
/// follower counts as caught up for the purpose of a removal health check.
const CAUGHT_UP_LAG: u64 = 100;

/// Reject a removal that would drop a caught-up peer while some other
/// remaining member is lagging or has never replicated. Only evaluated when
/// this node is leader and has replication data; a non-leader skips the
/// check and lets `change_membership` fail naturally via forward-to-leader.
fn unhealthy_removal<C>(raft: &Raft<C>, remove: &[NodeId]) -> Option<String>
where
    C: openraft::RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    let metrics = raft.metrics().borrow();
    let last_log_index = metrics.last_log_index?;
    let replication = metrics.replication.as_ref()?;

    let caught_up = |id: &NodeId| -> bool {
        replication
            .get(id)
            .and_then(|log_id| log_id.as_ref())
            .map(|log_id| last_log_index.saturating_sub(log_id.index) <= CAUGHT_UP_LAG)
            .unwrap_or(false)
    };

    let remaining: Vec<NodeId> = metrics
        .membership_config
        .membership()
        .nodes()
        .map(|(id, _)| *id)
        .filter(|id| !remove.contains(id))
        .collect();

    for id in remove {
        if !caught_up(id) {
            continue;
        }
        if let Some(lagging) = remaining.iter().find(|other| !caught_up(other)) {
            return Some(format!(
                "refusing to remove caught-up peer {id} while member {lagging} is lagging or unreplicated"
            ));
        }
    }
    None
}

async fn set_peer<C>(raft: &Raft<C>, add: Vec<(NodeId, String)>, remove: Vec<NodeId>) -> Json<Value>
where
    C: openraft::RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    let current: BTreeSet<NodeId> = raft
        .metrics()
        .borrow()
        .membership_config
        .membership()
        .nodes()
        .map(|(id, _)| *id)
        .collect();
    if let Some(missing) = remove.iter().find(|id| !current.contains(id)) {
        return Json(json!({
                    "errcode": ErrCode::InputParamError,
                    "errmsg": format!("node {missing} is not a member of this group"),
        }));
    }
    if let Some(reason) = unhealthy_removal(raft, &remove) {
        return Json(json!({ "errcode": ErrCode::InputParamError, "errmsg": reason }));
    }

    let mut members = current;
    for (id, _addr) in &add {
        members.insert(*id);
    }
    for id in &remove {
        members.remove(id);
    }
    match raft.change_membership(members, false).await {
        Ok(_) => ok(json!({ "added": add.iter().map(|(id, _)| *id).collect::<Vec<_>>(), "removed": remove })),
        Err(e) => err(e),
    }
}

async fn dispatch_set_peer(
    state: &RaftControlState,
    region_id: u64,
    add: Vec<(NodeId, String)>,
    remove: Vec<NodeId>,
) -> Json<Value> {
    match region_id {
        0 => set_peer(&state.discovery, add, remove).await,
        1 => set_peer(&state.autoid, add, remove).await,
        2 => set_peer(&state.tso, add, remove).await,
        other => bad_region(other),
    }
}

/// Requests a fresh election to hand leadership to `target`; rejects the
/// request up front if `target` isn't a current member.
async fn trans_leader<C>(raft: &Raft<C>, target: NodeId) -> Json<Value>
where
    C: openraft::RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    if raft.metrics().borrow().membership_config.membership().nodes().all(|(id, _)| *id != target) {
        return Json(json!({
                    "errcode": ErrCode::InputParamError,
                    "errmsg": format!("target {target} is not a member of this group"),
        }));
    }
    match raft.trigger().elect().await {
        Ok(()) => ok(json!({ "requested_leader": target })),
        Err(e) => err(e),
    }
}

async fn dispatch_trans_leader(state: &RaftControlState, region_id: u64, target: NodeId) -> Json<Value> {
    match region_id {
        0 => trans_leader(&state.discovery, target).await,
        1 => trans_leader(&state.autoid, target).await,
        2 => trans_leader(&state.tso, target).await,
        other => bad_region(other),
    }
}

async fn snapshot<C>(raft: &Raft<C>) -> Json<Value>
where
    C: openraft::RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    match raft.trigger().snapshot().await {
        Ok(()) => ok(json!({})),
        Err(e) => err(e),
    }
}

async fn dispatch_snapshot(state: &RaftControlState, region_id: u64) -> Json<Value> {
    match region_id {
        0 => snapshot(&state.discovery).await,
        1 => snapshot(&state.autoid).await,
        2 => snapshot(&state.tso).await,
        other => bad_region(other),
    }
}

async fn dispatch_shutdown(state: &RaftControlState, region_id: u64) -> Json<Value> {
    let result = match region_id {
        0 => state.discovery.shutdown().await,
        1 => state.autoid.shutdown().await,
        2 => state.tso.shutdown().await,
        other => return bad_region(other),
    };
    match result {
        Ok(()) => ok(json!({})),
        Err(e) => err(e),
    }
}

fn get_leader<C>(raft: &Raft<C>) -> Json<Value>
where
    C: openraft::RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    let metrics = raft.metrics().borrow();
    let leader_addr = metrics.current_leader.and_then(|id| {
            metrics
                .membership_config
                .membership()
                .nodes()
                .find(|(n, _)| **n == id)
                .map(|(_, n)| n.addr.clone())
    });
    ok(json!({ "leader_id": metrics.current_leader, "leader_addr": leader_addr }))
}

fn dispatch_get_leader(state: &RaftControlState, region_id: u64) -> Json<Value> {
    match region_id {
        0 => get_leader(&state.discovery),
        1 => get_leader(&state.autoid),
        2 => get_leader(&state.tso),
        other => bad_region(other),
    }
}

fn list_peer<C>(raft: &Raft<C>) -> Json<Value>
where
    C: openraft::RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    let metrics = raft.metrics().borrow();
    let peers: Vec<Value> = metrics
        .membership_config
        .membership()
        .nodes()
        .map(|(id, node)| json!({ "node_id": id, "addr": node.addr }))
        .collect();
    ok(json!(peers))
}

fn dispatch_list_peer(state: &RaftControlState, region_id: u64) -> Json<Value> {
    match region_id {
        0 => list_peer(&state.discovery),
        1 => list_peer(&state.autoid),
        2 => list_peer(&state.tso),
        other => bad_region(other),
    }
}

/// Triggers an immediate heartbeat, restarting followers' election-timeout windows.
async fn reset_vote_time<C>(raft: &Raft<C>) -> Json<Value>
where
    C: openraft::RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    match raft.trigger().heartbeat().await {
        Ok(()) => ok(json!({})),
        Err(e) => err(e),
    }
}

async fn dispatch_reset_vote_time(state: &RaftControlState, region_id: u64) -> Json<Value> {
    match region_id {
        0 => reset_vote_time(&state.discovery).await,
        1 => reset_vote_time(&state.autoid).await,
        2 => reset_vote_time(&state.tso).await,
        other => bad_region(other),
    }
}
