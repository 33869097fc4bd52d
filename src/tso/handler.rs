//! [`TsoHandler`]: the [`crate::raft::GroupHandler`] for the TSO Raft
//! group. Translates [`crate::raft::TsoRequest`]/[`crate::raft::TsoResponse`]
//! into calls against [`TsoManager`], persisting the save-ahead watermark
//! on every `UpdateTso` apply so a restarted replica can resync to it.

use crate::raft::{TsoRequest, TsoResponse, TsoTypeConfig, GroupHandler};
use crate::store::KvStore;

use super::TsoManager;

pub struct TsoHandler {
    pub clock: TsoManager,
}

impl TsoHandler {
    pub fn new() -> Self {
        Self {
            clock: TsoManager::new(),
        }
    }

    fn err(e: crate::errors::MetaError) -> TsoResponse {
        TsoResponse::Error { message: e.to_string() }
    }
}

impl Default for TsoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupHandler<TsoTypeConfig> for TsoHandler {
    fn apply(&self, store: &KvStore, request: TsoRequest) -> TsoResponse {
        match request {
            TsoRequest::GenTso { count } => match self.clock.gen_tso(count) {
                Ok((start, end)) => TsoResponse::Range {
                    start_physical_ms: start.physical_ms,
                    start_logical: start.logical,
                    end_physical_ms: end.physical_ms,
                    end_logical: end.logical,
                },
                Err(e) => Self::err(e),
            },
            TsoRequest::ResetTso { physical_ms } => match self.clock.reset_tso(physical_ms) {
                Ok(()) => TsoResponse::Ok,
                Err(e) => Self::err(e),
            },
            TsoRequest::UpdateTso { physical_ms, logical: _ } => {
                self.clock.update_tso(physical_ms);
                match self.clock.persist_watermark(store) {
                    Ok(()) => TsoResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
        }
    }

    fn reload(&self, store: &KvStore) -> Result<(), String> {
        self.clock.reload(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn gen_tso_through_handler_respects_save_ahead() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        let handler = TsoHandler::new();
        let target = handler.clock.next_save_ahead_target();
        let resp = handler.apply(&store, TsoRequest::UpdateTso { physical_ms: target, logical: 0 });
        assert!(matches!(resp, TsoResponse::Ok));
        let resp = handler.apply(&store, TsoRequest::GenTso { count: 3 });
        assert!(matches!(resp, TsoResponse::Range { .. }));
    }

    #[test]
    fn reload_resyncs_from_persisted_watermark() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        let handler = TsoHandler::new();
        let target = handler.clock.next_save_ahead_target();
        handler.apply(&store, TsoRequest::UpdateTso { physical_ms: target, logical: 0 });

        let handler2 = TsoHandler::new();
        handler2.reload(&store).unwrap();
        // After reload, the watermark carried forward so gen_tso can proceed
        // immediately without a fresh UpdateTso round-trip.
        assert!(handler2.clock.gen_tso(1).is_ok());
    }
}
