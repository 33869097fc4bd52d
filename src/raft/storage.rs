//! Combined log + state machine storage, generic over any Raft group's
//! `TypeConfig` plus a [`GroupHandler`] that knows how to apply that group's
//! requests and snapshot its own data.
//!
//! Implements the v1 `RaftStorage` trait and is bridged to the v2
//! `(RaftLogStorage, RaftStateMachine)` split via `openraft::storage::Adaptor`
//! at construction time. The log lives in a `rocksdb` column family
//! (`crate::store::KvStore`'s `raft_log` CF, keyed by `BTreeMap`-like
//! ordering over `u64` index) rather than an in-memory map, and snapshotting
//! exports the `meta` CF to a single SST file, range-deleting the CF before
//! ingesting a received SST on install.

use std::io::Cursor;
use std::marker::PhantomData;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openraft::storage::{RaftLogReader, RaftSnapshotBuilder, RaftStorage};
use openraft::{
    BasicNode, EntryPayload, LogId, LogState, RaftLogId, RaftTypeConfig, Snapshot, SnapshotMeta,
    StorageError, StorageIOError, StoredMembership, Vote,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::raft::types::NodeId;
use crate::store::{KvStore, CF_META, CF_RAFT_LOG};

/// Per-group apply + snapshot logic. Implementors own the materialized
/// entity tables (registries, config store, plugin store, autoid counters,
/// TSO clock) and translate `C::D` into writes against the shared `meta` CF.
pub trait GroupHandler<C>: Send + Sync + 'static
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
{
    /// Apply one committed request, returning its response.
    fn apply(&self, store: &KvStore, request: C::D) -> C::R;

    /// Rebuild all in-memory indices from what is now on disk in `meta`.
    /// Called once at startup and again after every snapshot install.
    fn reload(&self, store: &KvStore) -> Result<(), String>;

    /// Extra files a group needs bundled alongside the `meta` CF dump —
    /// the plugin group's blob files (: "additionally
    /// hard-link every live and tombstoned plugin blob file into the
    /// snapshot directory and register each file"). Most groups have none.
    fn snapshot_files(&self, _store: &KvStore) -> Vec<(String, Vec<u8>)> {
        Vec::new()
    }

    /// Materialize files returned by `snapshot_files` on the receiving
    /// side of a snapshot install, called before `reload`.
    fn install_snapshot_files(&self, _files: &[(String, Vec<u8>)]) -> Result<(), String> {
        Ok(())
    }
}

/// Snapshot wire format: the `meta` CF dumped as a single SST plus whatever
/// extra files the group's handler wants carried along (plugin blobs).
#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotPackage {
    sst: Vec<u8>,
    files: Vec<(String, Vec<u8>)>,
}

const LOG_PREFIX: u8 = 0x10;
const KEY_VOTE: &[u8] = b"\x20vote";
const KEY_COMMITTED: &[u8] = b"\x20committed";
const KEY_LAST_PURGED: &[u8] = b"\x20last_purged";
const KEY_LAST_APPLIED: &[u8] = b"\x20last_applied";
const KEY_LAST_MEMBERSHIP: &[u8] = b"\x20last_membership";

fn log_key(index: u64) -> Vec<u8> {
    let mut key = vec![LOG_PREFIX];
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn index_of(key: &[u8]) -> u64 {
    u64::from_be_bytes(key[1..9].try_into().expect("log key is 9 bytes"))
}

fn io_err(e: impl std::fmt::Display) -> StorageError<NodeId> {
    StorageError::IO {
        source: StorageIOError::write(&openraft::AnyError::error(e.to_string())),
    }
}

/// `RaftLogReader` over the `raft_log` CF. Cheap to construct — it only
/// holds the shared store handle, reading straight from rocksdb each call.
pub struct RocksLogReader<C> {
    store: Arc<KvStore>,
    _marker: PhantomData<C>,
}

impl<C> RaftLogReader<C> for RocksLogReader<C>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode>,
    C::Entry: Serialize + DeserializeOwned,
{
    async fn try_get_log_entries<RB>(
        &mut self,
        range: RB,
    ) -> Result<Vec<C::Entry>, StorageError<NodeId>>
    where
        RB: RangeBounds<u64> + Clone + std::fmt::Debug + Send,
    {
        let rows = self
            .store
            .prefix_iter(CF_RAFT_LOG, &[LOG_PREFIX])
            .map_err(io_err)?;
        let mut out = Vec::new();
        for (k, v) in rows {
            let idx = index_of(&k);
            if range.contains(&idx) {
                let entry: C::Entry = bincode::deserialize(&v).map_err(io_err)?;
                out.push(entry);
            }
        }
        out.sort_by_key(|e| e.get_log_id().index);
        Ok(out)
    }
}

/// Builds a snapshot by exporting the `meta` CF to one SST file, then hands
/// `GroupHandler::reload` the materialized state back after install.
pub struct RocksSnapshotBuilder<C, H> {
    store: Arc<KvStore>,
    handler: Arc<H>,
    snapshot_dir: PathBuf,
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, BasicNode>,
    _marker: PhantomData<C>,
}

impl<C, H> RaftSnapshotBuilder<C> for RocksSnapshotBuilder<C, H>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode, SnapshotData = Cursor<Vec<u8>>>,
    H: GroupHandler<C>,
{
    async fn build_snapshot(&mut self) -> Result<Snapshot<C>, StorageError<NodeId>> {
        let snap_id = self
            .last_applied
            .map(|l| format!("{}-{}", l.leader_id, l.index))
            .unwrap_or_else(|| "0-0".to_string());
        let file_name = format!("snap-{snap_id}.sst");
        let sst_path = self
            .store
            .export_cf_to_sst(CF_META, &self.snapshot_dir, &file_name)
            .map_err(io_err)?;
        let sst = std::fs::read(&sst_path).map_err(io_err)?;
        let _ = std::fs::remove_file(&sst_path);

        let files = self.handler.snapshot_files(&self.store);
        let package = SnapshotPackage { sst, files };
        let data = bincode::serialize(&package).map_err(io_err)?;

        Ok(Snapshot {
                meta: SnapshotMeta {
                    last_log_id: self.last_applied,
                    last_membership: self.last_membership.clone(),
                    snapshot_id: snap_id,
                },
                snapshot: Box::new(Cursor::new(data)),
        })
    }
}

/// Combined log + state machine storage for one Raft group, backed by a
/// `KvStore` and a `GroupHandler` that applies the group's own requests.
///
/// Wrapped by `openraft::storage::Adaptor::new(..)` at group startup to
/// produce the `(RaftLogStorage, RaftStateMachine)` split `Raft::new()` needs.
pub struct RocksCombinedStorage<C, H> {
    store: Arc<KvStore>,
    handler: Arc<H>,
    snapshot_dir: PathBuf,
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, BasicNode>,
    current_snapshot: Option<Snapshot<C>>,
}

impl<C, H> RocksCombinedStorage<C, H>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode, SnapshotData = Cursor<Vec<u8>>>,
    H: GroupHandler<C>,
{
    pub fn new(store: Arc<KvStore>, handler: Arc<H>, snapshot_dir: impl AsRef<Path>) -> Self {
        Self {
            store,
            handler,
            snapshot_dir: snapshot_dir.as_ref().to_path_buf(),
            last_applied: None,
            last_membership: StoredMembership::default(),
            current_snapshot: None,
        }
    }

    fn load_bookkeeping(&mut self) -> Result<(), StorageError<NodeId>> {
        if let Some(bytes) = self.store.get(CF_RAFT_LOG, KEY_LAST_APPLIED).map_err(io_err)? {
            self.last_applied = bincode::deserialize(&bytes).map_err(io_err)?;
        }
        if let Some(bytes) = self
            .store
            .get(CF_RAFT_LOG, KEY_LAST_MEMBERSHIP)
            .map_err(io_err)?
        {
            self.last_membership = bincode::deserialize(&bytes).map_err(io_err)?;
        }
        Ok(())
    }
}

impl<C, H> RaftLogReader<C> for RocksCombinedStorage<C, H>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode, SnapshotData = Cursor<Vec<u8>>>,
    C::Entry: Serialize + DeserializeOwned,
    H: GroupHandler<C>,
{
    async fn try_get_log_entries<RB>(
        &mut self,
        range: RB,
    ) -> Result<Vec<C::Entry>, StorageError<NodeId>>
    where
        RB: RangeBounds<u64> + Clone + std::fmt::Debug + Send,
    {
        let mut reader = RocksLogReader::<C> {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        };
        reader.try_get_log_entries(range).await
    }
}

impl<C, H> RaftStorage<C> for RocksCombinedStorage<C, H>
where
    C: RaftTypeConfig<NodeId = NodeId, Node = BasicNode, SnapshotData = Cursor<Vec<u8>>>,
    C::Entry: Serialize + DeserializeOwned,
    C::D: Clone,
    C::R: Default,
    H: GroupHandler<C>,
{
    type LogReader = RocksLogReader<C>;
    type SnapshotBuilder = RocksSnapshotBuilder<C, H>;

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let bytes = bincode::serialize(vote).map_err(io_err)?;
        self.store.put(CF_RAFT_LOG, KEY_VOTE, &bytes).map_err(io_err)?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        match self.store.get(CF_RAFT_LOG, KEY_VOTE).map_err(io_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(io_err)?)),
            None => Ok(None),
        }
    }

    async fn get_log_state(&mut self) -> Result<LogState<C>, StorageError<NodeId>> {
        self.load_bookkeeping()?;
        let last_purged: Option<LogId<NodeId>> =
        match self.store.get(CF_RAFT_LOG, KEY_LAST_PURGED).map_err(io_err)? {
            Some(bytes) => bincode::deserialize(&bytes).map_err(io_err)?,
            None => None,
        };
        let rows = self
            .store
            .prefix_iter(CF_RAFT_LOG, &[LOG_PREFIX])
            .map_err(io_err)?;
        let mut last_log_id = last_purged;
        for (_, v) in rows {
            let entry: C::Entry = bincode::deserialize(&v).map_err(io_err)?;
            let id = *entry.get_log_id();
            if last_log_id.map(|l| id > l).unwrap_or(true) {
                last_log_id = Some(id);
            }
        }
        Ok(LogState {
                last_purged_log_id: last_purged,
                last_log_id,
        })
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        let bytes = bincode::serialize(&committed).map_err(io_err)?;
        self.store
            .put(CF_RAFT_LOG, KEY_COMMITTED, &bytes)
            .map_err(io_err)?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        match self.store.get(CF_RAFT_LOG, KEY_COMMITTED).map_err(io_err)? {
            Some(bytes) => bincode::deserialize(&bytes).map_err(io_err),
            None => Ok(None),
        }
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        RocksLogReader {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = C::Entry> + Send,
    {
        for entry in entries {
            let key = log_key(entry.get_log_id().index);
            let bytes = bincode::serialize(&entry).map_err(io_err)?;
            self.store.put(CF_RAFT_LOG, &key, &bytes).map_err(io_err)?;
        }
        Ok(())
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId<NodeId>,
    ) -> Result<(), StorageError<NodeId>> {
        self.store
            .range_delete(CF_RAFT_LOG, &log_key(log_id.index), &log_key(u64::MAX))
            .map_err(io_err)?;
        Ok(())
    }

    async fn purge_logs_upto(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.store
            .range_delete(CF_RAFT_LOG, &log_key(0), &log_key(log_id.index + 1))
            .map_err(io_err)?;
        let bytes = bincode::serialize(&Some(log_id)).map_err(io_err)?;
        self.store
            .put(CF_RAFT_LOG, KEY_LAST_PURGED, &bytes)
            .map_err(io_err)?;
        Ok(())
    }

    async fn last_applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>>
    {
        self.load_bookkeeping()?;
        Ok((self.last_applied, self.last_membership.clone()))
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[C::Entry],
    ) -> Result<Vec<C::R>, StorageError<NodeId>> {
        let mut responses = Vec::with_capacity(entries.len());
        for entry in entries {
            self.last_applied = Some(*entry.get_log_id());
            match &entry.payload {
                EntryPayload::Blank => responses.push(C::R::default()),
                EntryPayload::Normal(req) => {
                    responses.push(self.handler.apply(&self.store, req.clone()))
                }
                EntryPayload::Membership(m) => {
                    self.last_membership = StoredMembership::new(Some(*entry.get_log_id()), m.clone());
                    responses.push(C::R::default());
                }
            }
        }
        let bytes = bincode::serialize(&self.last_applied).map_err(io_err)?;
        self.store
            .put(CF_RAFT_LOG, KEY_LAST_APPLIED, &bytes)
            .map_err(io_err)?;
        let mbytes = bincode::serialize(&self.last_membership).map_err(io_err)?;
        self.store
            .put(CF_RAFT_LOG, KEY_LAST_MEMBERSHIP, &mbytes)
            .map_err(io_err)?;
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        RocksSnapshotBuilder {
            store: Arc::clone(&self.store),
            handler: Arc::clone(&self.handler),
            snapshot_dir: self.snapshot_dir.clone(),
            last_applied: self.last_applied,
            last_membership: self.last_membership.clone(),
            _marker: PhantomData,
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let package: SnapshotPackage = bincode::deserialize(snapshot.get_ref()).map_err(io_err)?;

        std::fs::create_dir_all(&self.snapshot_dir).map_err(io_err)?;
        let sst_path = self
            .snapshot_dir
            .join(format!("install-{}.sst", meta.snapshot_id));
        std::fs::write(&sst_path, &package.sst).map_err(io_err)?;

        let (from, to) = crate::store::full_meta_range();
        self.store.range_delete(CF_META, &from, &to).map_err(io_err)?;
        self.store.ingest_sst(CF_META, &sst_path).map_err(io_err)?;
        let _ = std::fs::remove_file(&sst_path);

        self.handler
            .install_snapshot_files(&package.files)
            .map_err(io_err)?;
        self.handler.reload(&self.store).map_err(io_err)?;

        self.last_applied = meta.last_log_id;
        self.last_membership = meta.last_membership.clone();
        let abytes = bincode::serialize(&self.last_applied).map_err(io_err)?;
        self.store
            .put(CF_RAFT_LOG, KEY_LAST_APPLIED, &abytes)
            .map_err(io_err)?;
        let mbytes = bincode::serialize(&self.last_membership).map_err(io_err)?;
        self.store
            .put(CF_RAFT_LOG, KEY_LAST_MEMBERSHIP, &mbytes)
            .map_err(io_err)?;
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> Result<Option<Snapshot<C>>, StorageError<NodeId>> {
        Ok(self.current_snapshot.take())
    }
}
