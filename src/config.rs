//! Typed, immutable server configuration: built from CLI flags (`clap`)
//! layered over an optional YAML file (`serde_yaml`). YAML rather than
//! TOML since this crate already carries `serde_yaml`; see DESIGN.md.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use openraft::BasicNode;
use serde::{Deserialize, Serialize};

use crate::raft::NodeId;

#[derive(Parser, Debug)]
#[command(name = "metad", about = "Replicated control-plane registry server")]
pub struct Cli {
    /// Path to a YAML config file; CLI flags below override its values.
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    #[arg(long)]
    pub node_id: Option<NodeId>,

    /// `node_id=host:port` for every member, including self; repeatable.
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    #[arg(long)]
    pub listen_addr: Option<String>,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long)]
    pub plugin_cache_capacity: Option<usize>,

    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileConfig {
    node_id: Option<NodeId>,
    peers: Option<Vec<String>>,
    listen_addr: Option<String>,
    data_dir: Option<PathBuf>,
    plugin_cache_capacity: Option<usize>,
}

/// Fully-resolved server configuration: the result of merging a YAML file
/// (if given) with CLI overrides, then validating.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub node_id: NodeId,
    pub members: BTreeMap<NodeId, BasicNode>,
    pub listen_addr: String,
    pub data_dir: PathBuf,
    pub plugin_cache_capacity: usize,
    pub verbose: bool,
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let file: FileConfig = match &cli.config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
                serde_yaml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let node_id = cli
            .node_id
            .or(file.node_id)
            .ok_or_else(|| anyhow::anyhow!("node_id must be set via --node-id or the config file"))?;

        let peers = if !cli.peers.is_empty() { cli.peers } else { file.peers.unwrap_or_default() };
        if peers.is_empty() {
            anyhow::bail!("at least one --peer (or config file `peers` entry) is required");
        }
        let members = parse_members(&peers)?;
        if !members.contains_key(&node_id) {
            anyhow::bail!("node_id {node_id} is not present in the peer set");
        }

        let listen_addr = cli
            .listen_addr
            .or(file.listen_addr)
            .ok_or_else(|| anyhow::anyhow!("listen_addr must be set via --listen-addr or the config file"))?;

        let data_dir = cli
            .data_dir
            .or(file.data_dir)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let plugin_cache_capacity = cli.plugin_cache_capacity.or(file.plugin_cache_capacity).unwrap_or(256);

        Ok(Self {
                node_id,
                members,
                listen_addr,
                data_dir,
                plugin_cache_capacity,
                verbose: cli.verbose,
        })
    }

    pub fn group_dir(&self, group: &str) -> PathBuf {
        self.data_dir.join(group)
    }

    /// Path of the readiness sentinel, removed at startup before this
    /// replica rejoins Raft and recreated once all groups report
    /// `have_data`.
    pub fn init_success_path(&self) -> PathBuf {
        self.data_dir.join("init.success")
    }
}

fn parse_members(peers: &[String]) -> anyhow::Result<BTreeMap<NodeId, BasicNode>> {
    let mut members = BTreeMap::new();
    for peer in peers {
        let (id_str, addr) = peer
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("peer spec `{peer}` must be `node_id=host:port`"))?;
        let id: NodeId = id_str
            .parse()
            .map_err(|_| anyhow::anyhow!("peer spec `{peer}` has a non-numeric node_id"))?;
        members.insert(id, BasicNode { addr: addr.to_string() });
    }
    Ok(members)
}

pub fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .try_init();
}

pub fn data_subdir(base: &Path, name: &str) -> PathBuf {
    base.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_members_builds_basic_nodes() {
        let members = parse_members(&["1=127.0.0.1:9001".to_string(), "2=127.0.0.1:9002".to_string()]).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[&1].addr, "127.0.0.1:9001");
    }

    #[test]
    fn parse_members_rejects_malformed_spec() {
        assert!(parse_members(&["not-a-peer-spec".to_string()]).is_err());
    }
}
