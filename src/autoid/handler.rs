//! [`AutoIdHandler`]: the [`crate::raft::GroupHandler`] for the
//! auto-increment Raft group. Thin translation layer between
//! [`crate::raft::AutoIdRequest`]/[`crate::raft::AutoIdResponse`] and
//! [`AutoIdManager`], mirroring [`crate::registry::handler::DiscoveryHandler`].

use crate::raft::{AutoIdRequest, AutoIdResponse, AutoIdTypeConfig, GroupHandler};
use crate::store::KvStore;

use super::AutoIdManager;

pub struct AutoIdHandler {
    pub counters: AutoIdManager,
}

impl AutoIdHandler {
    pub fn new() -> Self {
        Self {
            counters: AutoIdManager::new(),
        }
    }

    fn err(e: crate::errors::MetaError) -> AutoIdResponse {
        AutoIdResponse::Error { message: e.to_string() }
    }
}

impl Default for AutoIdHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupHandler<AutoIdTypeConfig> for AutoIdHandler {
    fn apply(&self, store: &KvStore, request: AutoIdRequest) -> AutoIdResponse {
        match request {
            AutoIdRequest::AddAutoIncrement { servlet_id, start_id } => {
                match self.counters.add(store, servlet_id, start_id) {
                    Ok(()) => AutoIdResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            AutoIdRequest::DropAutoIncrement { servlet_id } => match self.counters.drop(store, servlet_id) {
                Ok(()) => AutoIdResponse::Ok,
                Err(e) => Self::err(e),
            },
            AutoIdRequest::GenIdBatch { servlet_id, count, start_id } => {
                match self.counters.gen(store, servlet_id, count, start_id) {
                    Ok((start_id, end_id)) => AutoIdResponse::Range { start_id, end_id },
                    Err(e) => Self::err(e),
                }
            }
            AutoIdRequest::UpdateAutoIncrement { servlet_id, start_id, increment_id, force } => {
                match self.counters.update(store, servlet_id, start_id, increment_id, force) {
                    Ok(()) => AutoIdResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
        }
    }

    fn reload(&self, store: &KvStore) -> Result<(), String> {
        self.counters.reload(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn gen_id_batch_roundtrips_through_handler() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        let handler = AutoIdHandler::new();
        let resp = handler.apply(&store, AutoIdRequest::AddAutoIncrement { servlet_id: 1, start_id: 10 });
        assert!(matches!(resp, AutoIdResponse::Ok));
        let resp = handler.apply(&store, AutoIdRequest::GenIdBatch { servlet_id: 1, count: 3, start_id: None });
        assert!(matches!(resp, AutoIdResponse::Range { start_id: 10, end_id: 13 }));
    }
}
