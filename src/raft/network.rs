//! HTTP/JSON transport for inter-node Raft RPCs, one instance per group.
//!
//! A connect-lazy client/factory pair with per-peer connection reuse and
//! fail-fast timeouts so heartbeats don't stall an election, over plain
//! JSON-over-HTTP via `reqwest`/`axum` rather than a protobuf/gRPC service.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use openraft::error::{InstallSnapshotError, RPCError, RaftError as OpenRaftError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::{AnyError, BasicNode, Raft, RaftTypeConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::raft::types::NodeId;

fn unreachable(msg: impl std::fmt::Display) -> Unreachable {
    Unreachable::new(&AnyError::error(msg.to_string()))
}

/// Per-peer HTTP client for one Raft group, identified by `group_path`
/// (e.g. `"discovery"`, `"autoid"`, `"tso"`) so all three groups can share
/// one `axum` listener per node.
pub struct HttpNetwork {
    base_url: String,
    group_path: &'static str,
    client: reqwest::Client,
}

impl HttpNetwork {
    fn url(&self, op: &str) -> String {
        format!("{}/raft/{}/{}", self.base_url, self.group_path, op)
    }

    async fn post_json<Req, Resp>(&self, op: &str, body: &Req) -> Result<Resp, String>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(op))
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        resp.json::<Resp>().await.map_err(|e| e.to_string())
    }
}

impl<C> RaftNetwork<C> for HttpNetwork
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
    C::Entry: Serialize + DeserializeOwned,
    C::R: Serialize + DeserializeOwned,
{
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<C>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, OpenRaftError<NodeId>>>
    {
        self.post_json("append_entries", &rpc)
            .await
            .map_err(|e| RPCError::Unreachable(unreachable(e)))
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, OpenRaftError<NodeId>>> {
        self.post_json("vote", &rpc)
            .await
            .map_err(|e| RPCError::Unreachable(unreachable(e)))
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<C>,
        _option: RPCOption,
    ) -> Result<
    InstallSnapshotResponse<NodeId>,
    RPCError<NodeId, BasicNode, OpenRaftError<NodeId, InstallSnapshotError>>,
    > {
        self.post_json("install_snapshot", &rpc)
            .await
            .map_err(|e| RPCError::Unreachable(unreachable(e)))
    }
}

/// Builds one [`HttpNetwork`] per target node for a fixed group path.
pub struct HttpNetworkFactory {
    group_path: &'static str,
}

impl HttpNetworkFactory {
    pub fn new(group_path: &'static str) -> Self {
        Self { group_path }
    }
}

impl<C> RaftNetworkFactory<C> for HttpNetworkFactory
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
    C::Entry: Serialize + DeserializeOwned,
    C::R: Serialize + DeserializeOwned,
{
    type Network = HttpNetwork;

    async fn new_client(&mut self, _target: NodeId, node: &BasicNode) -> Self::Network {
        let base_url = if node.addr.starts_with("http") {
            node.addr.clone()
        } else {
            format!("http://{}", node.addr)
        };
        HttpNetwork {
            base_url,
            group_path: self.group_path,
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(3))
                .timeout(Duration::from_secs(4))
                .build()
                .unwrap_or_default(),
        }
    }
}

/// Server side of the transport: mounts `/raft/{group_path}/{append_entries,
/// vote, install_snapshot}` for one group's `Raft<C>` handle. `main.rs`
/// merges one of these per group under the shared axum listener.
pub fn raft_routes<C>(group_path: &'static str, raft: Arc<Raft<C>>) -> Router
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode> + 'static,
    C::Entry: Serialize + DeserializeOwned,
    C::R: Serialize + DeserializeOwned,
{
    let prefix = format!("/raft/{group_path}");
    Router::new()
        .route(
        &format!("{prefix}/append_entries"),
        post(append_entries::<C>),
    )
        .route(&format!("{prefix}/vote"), post(vote::<C>))
        .route(
        &format!("{prefix}/install_snapshot"),
        post(install_snapshot::<C>),
    )
        .with_state(raft)
}

async fn append_entries<C>(
    State(raft): State<Arc<Raft<C>>>,
    Json(rpc): Json<AppendEntriesRequest<C>>,
) -> Json<AppendEntriesResponse<NodeId>>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    let resp = raft
        .append_entries(rpc)
        .await
        .unwrap_or_else(|e| panic!("local append_entries call failed: {e}"));
    Json(resp)
}

async fn vote<C>(
    State(raft): State<Arc<Raft<C>>>,
    Json(rpc): Json<VoteRequest<NodeId>>,
) -> Json<VoteResponse<NodeId>>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    let resp = raft
        .vote(rpc)
        .await
        .unwrap_or_else(|e| panic!("local vote call failed: {e}"));
    Json(resp)
}

async fn install_snapshot<C>(
    State(raft): State<Arc<Raft<C>>>,
    Json(rpc): Json<InstallSnapshotRequest<C>>,
) -> Json<InstallSnapshotResponse<NodeId>>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    let resp = raft
        .install_snapshot(rpc)
        .await
        .unwrap_or_else(|e| panic!("local install_snapshot call failed: {e}"));
    Json(resp)
}

/// `Cursor<Vec<u8>>` is every group's `SnapshotData`; re-exported so group
/// wiring doesn't need to name `std::io::Cursor` itself.
pub type SnapshotCursor = Cursor<Vec<u8>>;
