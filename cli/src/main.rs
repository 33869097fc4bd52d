//! `metactl` — command-line client for the replicated metadata registry.
//!
//! Thin wrapper over [`meta_client::LeaderFollowingClient`]: every
//! subcommand builds a JSON request body for one of the server's RPC
//! methods and prints the decoded response envelope. The `raft` subcommand
//! group mirrors the Raft-control operations, addressed by the `--cluster`
//! selector.

use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use meta_client::{
    region_id_for_cluster, ClientConfig, LeaderFollowingClient, RaftControlRequest, ServiceMethod,
};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "metactl", version, about = "CLI for the replicated metadata registry")]
struct Cli {
    /// Replica endpoint, e.g. `http://127.0.0.1:9001`; repeatable.
    #[arg(long = "server", required = true)]
    servers: Vec<String>,

    /// Load-balancing strategy for the initial candidate pick. Only `rr`
    /// (random-robin, i.e. a random endpoint) is implemented.
    #[arg(long, default_value = "rr")]
    lb: String,

    /// Per-request timeout, in milliseconds.
    #[arg(long, default_value_t = 4000)]
    timeout: u64,

    /// Connect timeout, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    connect: u64,

    /// Number of attempts before giving up.
    #[arg(long, default_value_t = 5)]
    retry: u32,

    /// Delay between retries, in milliseconds.
    #[arg(long, default_value_t = 500)]
    interval: u64,

    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a discovery_manager/config_manage/plugin_manage request body.
    Manage {
        /// `discovery`, `config`, or `plugin`.
        #[arg(long, default_value = "discovery")]
        kind: String,
        /// Raw JSON request body.
        body: String,
    },
    /// Submit a discovery_query/config_query/plugin_query request body.
    Query {
        #[arg(long, default_value = "discovery")]
        kind: String,
        body: String,
    },
    /// Issue a tso_service request (`gen-tso <count>` or `current`).
    Tso {
        #[command(subcommand)]
        op: TsoOp,
    },
    /// Raft-control operations, addressed by `--cluster`.
    Raft {
        #[arg(long, default_value = "discovery")]
        cluster: String,
        #[command(subcommand)]
        op: RaftOp,
    },
}

#[derive(Subcommand)]
enum TsoOp {
    GenTso { count: u32 },
    Current,
}

#[derive(Subcommand)]
enum RaftOp {
    SetPeer {
        /// `node_id=host:port` pairs to add.
        #[arg(long = "add")]
        add: Vec<String>,
        #[arg(long = "remove")]
        remove: Vec<u64>,
    },
    TransLeader {
        target: u64,
    },
    SnapShot,
    ShutDown,
    GetLeader,
    ListPeer,
    ResetVoteTime,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        eprintln!("servers: {:?}", cli.servers);
    }

    let mut config = ClientConfig::new(cli.servers.clone());
    config.connect_timeout = Duration::from_millis(cli.connect);
    config.request_timeout = Duration::from_millis(cli.timeout);
    config.retry_times = cli.retry;
    config.between_error = Duration::from_millis(cli.interval);

    let client = match LeaderFollowingClient::new(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to build client: {e}");
            std::process::exit(1);
        }
    };

    let result = run(&client, cli.command).await;
    match result {
        Ok(value) => {
            print_value(&value);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(client: &LeaderFollowingClient, command: Commands) -> anyhow::Result<Value> {
    match command {
        Commands::Manage { kind, body } => {
            let method = manage_method(&kind)?;
            let request: Value = serde_json::from_str(&body)?;
            Ok(client.call(method, request).await?)
        }
        Commands::Query { kind, body } => {
            let method = query_method(&kind)?;
            let request: Value = serde_json::from_str(&body)?;
            Ok(client.call(method, request).await?)
        }
        Commands::Tso { op } => {
            let request = match op {
                TsoOp::GenTso { count } => json!({ "op": "gen_tso", "count": count }),
                TsoOp::Current => json!({ "op": "current" }),
            };
            Ok(client.call(ServiceMethod::TsoService, request).await?)
        }
        Commands::Raft { cluster, op } => {
            let region_id = region_id_for_cluster(&cluster)
                .ok_or_else(|| anyhow::anyhow!("unknown --cluster {cluster}, expected discovery|tso|atomic"))?;
            let request = raft_request(region_id, op);
            let body = serde_json::to_value(request)?;
            Ok(client.call(ServiceMethod::RaftControl, body).await?)
        }
    }
}

fn manage_method(kind: &str) -> anyhow::Result<ServiceMethod> {
    match kind {
        "discovery" => Ok(ServiceMethod::DiscoveryManage),
        "config" => Ok(ServiceMethod::ConfigManage),
        "plugin" => Ok(ServiceMethod::PluginManage),
        other => Err(anyhow::anyhow!("unknown --kind {other}, expected discovery|config|plugin")),
    }
}

fn query_method(kind: &str) -> anyhow::Result<ServiceMethod> {
    match kind {
        "discovery" => Ok(ServiceMethod::DiscoveryQuery),
        "config" => Ok(ServiceMethod::ConfigQuery),
        "plugin" => Ok(ServiceMethod::PluginQuery),
        other => Err(anyhow::anyhow!("unknown --kind {other}, expected discovery|config|plugin")),
    }
}

fn raft_request(region_id: u64, op: RaftOp) -> RaftControlRequest {
    match op {
        RaftOp::SetPeer { add, remove } => {
            let add = add
                .iter()
                .filter_map(|spec| {
                    let (id, addr) = spec.split_once('=')?;
                    Some((id.parse().ok()?, addr.to_string()))
                })
                .collect();
            RaftControlRequest::SetPeer { region_id, add, remove }
        }
        RaftOp::TransLeader { target } => RaftControlRequest::TransLeader { region_id, target },
        RaftOp::SnapShot => RaftControlRequest::SnapShot { region_id },
        RaftOp::ShutDown => RaftControlRequest::ShutDown { region_id },
        RaftOp::GetLeader => RaftControlRequest::GetLeader { region_id },
        RaftOp::ListPeer => RaftControlRequest::ListPeer { region_id },
        RaftOp::ResetVoteTime => RaftControlRequest::ResetVoteTime { region_id },
    }
}

fn print_value(value: &Value) {
    match value {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            print_table(items);
        }
        other => println!("{}", serde_json::to_string_pretty(other).unwrap_or_default()),
    }
}

/// Renders a flat array of JSON objects as a table; falls back to pretty
/// JSON for anything with non-scalar fields instead of trying to flatten
/// arbitrarily nested structures into cells.
fn print_table(items: &[Value]) {
    let mut columns: Vec<String> = Vec::new();
    for item in items {
        if let Value::Object(map) = item {
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(&columns);
    for item in items {
        if let Value::Object(map) = item {
            let row: Vec<String> = columns
                .iter()
                .map(|c| match map.get(c) {
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => String::new(),
                })
                .collect();
            table.add_row(row);
        }
    }
    println!("{table}");
}
