//! `metad` — the replicated control-plane registry server.
//!
//! Starts the three co-resident Raft groups (discovery, auto-increment,
//! TSO), wires their `GroupHandler`s and HTTP transports onto one shared
//! `axum` listener, and serves the external REST bridge (`src/rest`)
//! alongside each group's inter-node Raft RPC routes (`src/raft::network`).

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use metad::autoid::handler::AutoIdHandler;
use metad::config::{init_tracing, Cli, ServerConfig};
use metad::raft::network::raft_routes;
use metad::raft::{AutoIdTypeConfig, DiscoveryTypeConfig, RaftGroup, RaftGroupConfig, TsoTypeConfig};
use metad::registry::handler::DiscoveryHandler;
use metad::rest::raft_control::RaftControlState;
use metad::rest::{self, AppState};
use metad::tso::handler::TsoHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::from_cli(cli)?;
    init_tracing(config.verbose);

    info!(node_id = config.node_id, listen_addr = %config.listen_addr, "starting metad");

    // A fresh replica must not advertise readiness until every group has
    // rejoined Raft and reloaded its on-disk state; clear any stale
    // sentinel from a previous run before wiring anything up.
    let init_success_path = config.init_success_path();
    if init_success_path.exists() {
        std::fs::remove_file(&init_success_path)?;
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let discovery_handler = Arc::new(DiscoveryHandler::new(
        config.group_dir("discovery").join("plugins"),
        config.plugin_cache_capacity,
    ));
    let autoid_handler = Arc::new(AutoIdHandler::new());
    let tso_handler = Arc::new(TsoHandler::new());

    let group_config = RaftGroupConfig::new(config.node_id, config.members.clone());

    let discovery_group = RaftGroup::<DiscoveryTypeConfig>::start(
        "discovery",
        config.group_dir("discovery"),
        group_config.clone(),
        Arc::clone(&discovery_handler),
    )
    .await?;
    let autoid_group = RaftGroup::<AutoIdTypeConfig>::start(
        "autoid",
        config.group_dir("autoid"),
        group_config.clone(),
        Arc::clone(&autoid_handler),
    )
    .await?;
    let tso_group = RaftGroup::<TsoTypeConfig>::start(
        "tso",
        config.group_dir("tso"),
        group_config,
        Arc::clone(&tso_handler),
    )
    .await?;

    let discovery_raft = Arc::clone(&discovery_group.raft);
    let autoid_raft = Arc::clone(&autoid_group.raft);
    let tso_raft = Arc::clone(&tso_group.raft);

    let raft_control = Arc::new(RaftControlState {
        discovery: Arc::clone(&discovery_raft),
        autoid: Arc::clone(&autoid_raft),
        tso: Arc::clone(&tso_raft),
    });

    let app_state = AppState {
        discovery_raft: Arc::clone(&discovery_raft),
        discovery_handler,
        autoid_raft: Arc::clone(&autoid_raft),
        autoid_handler,
        tso_raft: Arc::clone(&tso_raft),
        tso_handler,
        raft_control,
    };

    let app = rest::routes(app_state)
        .merge(raft_routes::<DiscoveryTypeConfig>("discovery", discovery_raft))
        .merge(raft_routes::<AutoIdTypeConfig>("autoid", autoid_raft))
        .merge(raft_routes::<TsoTypeConfig>("tso", tso_raft));

    // Every group has reloaded its persisted state and joined (or
    // initialized) its Raft group by this point: safe to advertise
    // readiness to anything polling for the sentinel.
    std::fs::write(&init_success_path, b"")?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
