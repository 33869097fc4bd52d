//! [`LeaderFollowingClient`]: the cached-leader-with-retry RPC client used by
//! the router, the REST bridge, and the CLI. Caches whichever endpoint last
//! claimed leadership, fails over to a random peer on a transport error or
//! `HAVE_NOT_INIT`, and re-targets on `NOT_LEADER` without burning extra
//! retry budget for the redirect itself.

use std::sync::Mutex;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::types::{ErrCode, RpcEnvelope, ServiceMethod};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Every known endpoint in the cluster ( `--server`), used as
    /// failover candidates once the cached leader is cleared.
    pub endpoints: Vec<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_times: u32,
    pub between_error: Duration,
}

impl ClientConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(4),
            retry_times: 5,
            between_error: Duration::from_millis(500),
        }
    }
}

pub struct LeaderFollowingClient {
    config: ClientConfig,
    http: reqwest::Client,
    cached_leader: Mutex<Option<String>>,
}

impl LeaderFollowingClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
                config,
                http,
                cached_leader: Mutex::new(None),
        })
    }

    fn candidate(&self) -> ClientResult<String> {
        if let Some(leader) = self.cached_leader.lock().unwrap().clone() {
            return Ok(leader);
        }
        self.config
            .endpoints
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| ClientError::Rejected("no endpoints configured".to_string()))
    }

    fn clear_leader(&self) {
        *self.cached_leader.lock().unwrap() = None;
    }

    fn set_leader(&self, leader: String) {
        *self.cached_leader.lock().unwrap() = Some(leader);
    }

    /// Current cached leader, if any — exposed so the CLI's `get-leader`
    /// subcommand and the router's logging can surface it without a second
    /// round-trip.
    pub fn cached_leader(&self) -> Option<String> {
        self.cached_leader.lock().unwrap().clone()
    }

    /// Issue `request` against `method`, following leader redirects and
    /// retrying transport failures, up to `retry_times` attempts total
    ///.
    pub async fn call(&self, method: ServiceMethod, request: Value) -> ClientResult<Value> {
        let mut last_error = String::new();

        for _ in 0..self.config.retry_times {
            let endpoint = match self.candidate() {
                Ok(e) => e,
                Err(e) => return Err(e),
            };
            let url = format!("{}/rpc/{}", endpoint.trim_end_matches('/'), method.path());

            let sent = self.http.post(&url).json(&request).send().await;
            let response = match sent {
                Ok(resp) => resp,
                Err(e) => {
                    self.clear_leader();
                    last_error = e.to_string();
                    tokio::time::sleep(self.config.between_error).await;
                    continue;
                }
            };

            let envelope: RpcEnvelope = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    self.clear_leader();
                    last_error = e.to_string();
                    tokio::time::sleep(self.config.between_error).await;
                    continue;
                }
            };

            match envelope.errcode {
                ErrCode::Success => {
                    if let Some(leader) = envelope.leader {
                        self.set_leader(leader);
                    }
                    return Ok(envelope.data.unwrap_or(Value::Null));
                }
                ErrCode::HaveNotInit => {
                    self.clear_leader();
                    last_error = "cluster not initialized".to_string();
                    tokio::time::sleep(self.config.between_error).await;
                }
                ErrCode::NotLeader => {
                    last_error = "not leader".to_string();
                    match envelope.leader {
                        Some(leader) => self.set_leader(leader),
                        None => self.clear_leader(),
                    }
                }
                other => {
                    return Err(ClientError::Rejected(format!("{:?}: {}", other, envelope.errmsg)));
                }
            }
        }

        Err(ClientError::Unavailable {
                attempts: self.config.retry_times,
                last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_falls_back_to_random_endpoint_without_cached_leader() {
        let client = LeaderFollowingClient::new(ClientConfig::new(vec!["http://a".to_string()])).unwrap();
        assert_eq!(client.candidate().unwrap(), "http://a");
    }

    #[test]
    fn cached_leader_is_preferred_and_clearable() {
        let client = LeaderFollowingClient::new(ClientConfig::new(vec!["http://a".to_string()])).unwrap();
        client.set_leader("http://b".to_string());
        assert_eq!(client.candidate().unwrap(), "http://b");
        client.clear_leader();
        assert_eq!(client.candidate().unwrap(), "http://a");
    }
}
