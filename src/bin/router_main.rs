//! `metad-router` — the stateless router front-end (`src/router`): forwards
//! every call to whichever endpoint currently holds leadership, retrying
//! through [`meta_client::LeaderFollowingClient`] rather than serving
//! requests itself, so it never needs its own Raft group or data directory.

use clap::Parser;
use metad::config::init_tracing;
use metad::router::{self, RouterState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "metad-router", about = "Stateless router fronting a metad cluster")]
struct Cli {
    /// Replica endpoint, e.g. `http://127.0.0.1:9001`; repeatable.
    #[arg(long = "server", required = true)]
    servers: Vec<String>,

    #[arg(long, default_value = "0.0.0.0:8080")]
    listen_addr: String,

    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let state = RouterState::new(cli.servers)?;
    let app = router::routes(state);

    let listener = tokio::net::TcpListener::bind(&cli.listen_addr).await?;
    info!(addr = %cli.listen_addr, "router listening");
    axum::serve(listener, app).await?;
    Ok(())
}
