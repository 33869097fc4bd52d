//! Stateless router: fronts the cluster and forwards every call to the
//! current leader through [`meta_client::LeaderFollowingClient`] with a
//! fixed retry count of 2, running each forwarding call on its own spawned
//! task so the accepting HTTP worker is never blocked on a slow backend
//! round-trip. Same `axum` router shape used throughout this crate, here
//! fronting [`meta_client`] instead of serving requests in-process.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use meta_client::{ClientConfig, LeaderFollowingClient, ServiceMethod};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

/// Retry budget the router uses for every forwarded call;
/// distinct from (and smaller than) the CLI's own configurable `--retry`,
/// since the router sits in the hot path of every external caller.
const ROUTER_RETRY_TIMES: u32 = 2;

#[derive(Clone)]
pub struct RouterState {
    client: Arc<LeaderFollowingClient>,
}

impl RouterState {
    pub fn new(endpoints: Vec<String>) -> anyhow::Result<Self> {
        let mut config = ClientConfig::new(endpoints);
        config.retry_times = ROUTER_RETRY_TIMES;
        Ok(Self { client: Arc::new(LeaderFollowingClient::new(config)?) })
    }
}

pub fn routes(state: RouterState) -> Router {
    Router::new()
        .route("/router/:method", post(forward))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn method_from_path(name: &str) -> Option<ServiceMethod> {
    match name {
        "discovery_manager" => Some(ServiceMethod::DiscoveryManage),
        "discovery_query" => Some(ServiceMethod::DiscoveryQuery),
        "config_manage" => Some(ServiceMethod::ConfigManage),
        "config_query" => Some(ServiceMethod::ConfigQuery),
        "plugin_manage" => Some(ServiceMethod::PluginManage),
        "plugin_query" => Some(ServiceMethod::PluginQuery),
        "tso_service" => Some(ServiceMethod::TsoService),
        "raft_control" => Some(ServiceMethod::RaftControl),
        _ => None,
    }
}

async fn forward(
    State(state): State<RouterState>,
    Path(method): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let Some(method) = method_from_path(&method) else {
        return Json(json!({ "errcode": "UNKNOWN_REQ_TYPE", "errmsg": format!("unknown method {method}") }));
    };

    // Spawned so a slow or retrying backend call never occupies the
    // accepting task.
    let handle = tokio::spawn(async move { state.client.call(method, body).await });

    match handle.await {
        Ok(Ok(data)) => Json(json!({ "errcode": "SUCCESS", "errmsg": "SUCCESS", "data": data })),
        Ok(Err(e)) => Json(json!({ "errcode": "UNAVAILABLE", "errmsg": e.to_string() })),
        Err(join_err) => Json(json!({ "errcode": "INTERNAL_ERROR", "errmsg": join_err.to_string() })),
    }
}
