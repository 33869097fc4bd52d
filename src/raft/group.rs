//! Starts and owns one running Raft group: builds the combined storage,
//! wraps it with `Adaptor::new()`, constructs `openraft::Raft::new()`, and
//! initializes membership once from the lowest node id in the peer set on
//! first boot.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use openraft::error::{ClientWriteError, RaftError};
use openraft::storage::Adaptor;
use openraft::{BasicNode, Raft, RaftTypeConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{ErrCode, RpcStatus};
use crate::raft::network::HttpNetworkFactory;
use crate::raft::storage::{GroupHandler, RocksCombinedStorage};
use crate::raft::types::NodeId;
use crate::store::KvStore;

/// Static config for starting one group: this node's id/address and the
/// full peer set (including self), keyed by node id.
#[derive(Debug, Clone)]
pub struct RaftGroupConfig {
    pub node_id: NodeId,
    pub members: BTreeMap<NodeId, BasicNode>,
    pub heartbeat_interval_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
}

impl RaftGroupConfig {
    pub fn new(node_id: NodeId, members: BTreeMap<NodeId, BasicNode>) -> Self {
        Self {
            node_id,
            members,
            heartbeat_interval_ms: 250,
            election_timeout_min_ms: 1_500,
            election_timeout_max_ms: 3_000,
        }
    }
}

/// One running Raft group: its `openraft::Raft` handle plus enough context
/// to answer "am I the leader" / "who is" for the router and REST bridge.
pub struct RaftGroup<C>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    pub raft: Arc<Raft<C>>,
    pub node_id: NodeId,
    pub members: BTreeMap<NodeId, BasicNode>,
}

impl<C> RaftGroup<C>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode, SnapshotData = Cursor<Vec<u8>>>,
    C::Entry: Serialize + DeserializeOwned,
    C::D: Clone + Serialize + DeserializeOwned,
    C::R: Default + Serialize + DeserializeOwned,
{
    pub async fn start<H>(
        group_path: &'static str,
        data_dir: impl AsRef<Path>,
        config: RaftGroupConfig,
        handler: Arc<H>,
    ) -> anyhow::Result<Self>
    where
        H: GroupHandler<C>,
    {
        let store = Arc::new(KvStore::open(data_dir.as_ref().join("db"))?);
        handler
            .reload(&store)
            .map_err(|e| anyhow::anyhow!("reload {group_path} state on startup: {e}"))?;

        let snapshot_dir = data_dir.as_ref().join("snapshot");
        let storage = RocksCombinedStorage::new(Arc::clone(&store), Arc::clone(&handler), snapshot_dir);
        let (log_store, state_machine) = Adaptor::new(storage);

        let raft_config = Arc::new(
            openraft::Config {
                cluster_name: format!("metad-{group_path}"),
                heartbeat_interval: config.heartbeat_interval_ms,
                election_timeout_min: config.election_timeout_min_ms,
                election_timeout_max: config.election_timeout_max_ms,
                ..Default::default()
            }
                .validate()?,
        );

        let raft = Raft::new(
            config.node_id,
            raft_config,
            HttpNetworkFactory::new(group_path),
            log_store,
            state_machine,
        )
            .await?;
        let raft = Arc::new(raft);

        let min_id = config.members.keys().copied().min().unwrap_or(config.node_id);
        if config.node_id == min_id {
            if let Err(e) = raft.initialize(config.members.clone()).await {
                info!(group = group_path, error = %e, "raft group already initialized");
            }
        } else {
            warn!(
                group = group_path,
                node_id = config.node_id,
                "waiting to be added to membership by {min_id}"
            );
        }

        Ok(Self {
                raft,
                node_id: config.node_id,
                members: config.members,
        })
    }

    pub async fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().current_leader == Some(self.node_id)
    }

    /// Current leader's advertised address, for `ErrCode::NotLeader` replies
    ///.
    pub fn current_leader_addr(&self) -> Option<String> {
        let metrics = self.raft.metrics().borrow();
        let leader_id = metrics.current_leader?;
        metrics
            .membership_config
            .membership()
            .nodes()
            .find(|(id, _)| **id == leader_id)
            .map(|(_, node)| node.addr.clone())
    }
}
