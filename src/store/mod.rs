//! Ordered KV store wrapper over `rocksdb`: column families `meta`
//! (registry/config/plugin rows), `raft_log` (openraft's log, see
//! `crate::raft::storage`), and `data` (reserved, `meta`'s sibling column
//! family, unused by the entities this crate currently defines).
//!
//! The snapshot save/load contract follows the same shape throughout this
//! crate's Raft groups: a consistent snapshot becomes a single SST file
//! registered with the Raft snapshot writer, and installing one
//! range-deletes the target column family before ingesting the SST.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    ColumnFamilyDescriptor, IteratorMode, Options, SstFileWriter, WriteBatch, DB,
};
use tracing::{debug, info};

use crate::errors::{MetaError, MetaResult};

pub const CF_META: &str = "meta";
pub const CF_RAFT_LOG: &str = "raft_log";
pub const CF_DATA: &str = "data";

/// Thin, `Arc`-shared wrapper around a multi-CF rocksdb handle.
///
/// All registry/config/plugin managers and the base state machine share
/// one `KvStore` instance per Raft group's data directory.
pub struct KvStore {
    db: DB,
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> MetaResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_META, Self::meta_cf_options()),
            ColumnFamilyDescriptor::new(CF_RAFT_LOG, Self::log_cf_options()),
            ColumnFamilyDescriptor::new(CF_DATA, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)?;
        info!(path = %path.as_ref().display(), "opened kv store");
        Ok(Self { db })
    }

    fn meta_cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn log_cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf(&self, name: &str) -> MetaResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| MetaError::Internal(format!("unknown column family {name}")))
    }

    pub fn get(&self, cf: &str, key: &[u8]) -> MetaResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(cf)?, key)?)
    }

    pub fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> MetaResult<()> {
        Ok(self.db.put_cf(self.cf(cf)?, key, value)?)
    }

    pub fn delete(&self, cf: &str, key: &[u8]) -> MetaResult<()> {
        Ok(self.db.delete_cf(self.cf(cf)?, key)?)
    }

    /// Atomic multi-key write, as required by step 4 and the
    /// "max_*_id persisted in the same atomic batch" invariant.
    pub fn write_batch(&self, writes: Vec<(String, Vec<u8>, Option<Vec<u8>>)>) -> MetaResult<()> {
        let mut batch = WriteBatch::default();
        for (cf_name, key, value) in writes {
            let cf = self.cf(&cf_name)?;
            match value {
                Some(v) => batch.put_cf(cf, &key, &v),
                None => batch.delete_cf(cf, &key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Iterate all (key, value) pairs whose key starts with `prefix`.
    pub fn prefix_iter(&self, cf: &str, prefix: &[u8]) -> MetaResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self.cf(cf)?;
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator_cf(handle, IteratorMode::From(prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (k, v) = item?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Range-delete `[from, to)` in one CF — used before snapshot ingest
    /// (: range-delete the entire `meta` CF
    /// from the schema identify byte through the max identify byte).
    pub fn range_delete(&self, cf: &str, from: &[u8], to: &[u8]) -> MetaResult<()> {
        let handle = self.cf(cf)?;
        self.db.delete_range_cf(handle, from, to)?;
        Ok(())
    }

    /// Dump the entire `meta` CF into a single SST file under `dir`,
    /// returning its path. Used by snapshot save.
    pub fn export_cf_to_sst(&self, cf: &str, dir: impl AsRef<Path>, file_name: &str) -> MetaResult<std::path::PathBuf> {
        std::fs::create_dir_all(dir.as_ref())?;
        let sst_path = dir.as_ref().join(file_name);
        let opts = Options::default();
        let mut writer = SstFileWriter::create(&opts);
        writer
            .open(&sst_path)
            .map_err(|e| MetaError::Internal(format!("open sst writer: {e}")))?;

        let handle = self.cf(cf)?;
        let snapshot = self.db.snapshot();
        let iter = snapshot.iterator_cf(handle, IteratorMode::Start);
        let mut count = 0u64;
        for item in iter {
            let (k, v) = item?;
            writer
                .put(&k, &v)
                .map_err(|e| MetaError::Internal(format!("sst put: {e}")))?;
            count += 1;
        }
        writer
            .finish()
            .map_err(|e| MetaError::Internal(format!("sst finish: {e}")))?;
        debug!(cf, count, path = %sst_path.display(), "exported column family to sst");
        Ok(sst_path)
    }

    /// Ingest a previously exported SST file into `cf`.
    pub fn ingest_sst(&self, cf: &str, sst_path: impl AsRef<Path>) -> MetaResult<()> {
        let handle = self.cf(cf)?;
        let opts = rocksdb::IngestExternalFileOptions::default();
        self.db
            .ingest_external_file_cf_opts(handle, &opts, vec![sst_path.as_ref().to_path_buf()])?;
        Ok(())
    }

    pub fn flush(&self, cf: &str) -> MetaResult<()> {
        self.db.flush_cf(self.cf(cf)?)?;
        Ok(())
    }
}

pub type SharedKvStore = Arc<KvStore>;

/// Entity-kind byte used as the second byte of every `meta` CF key
/// : schema-identify byte, entity-kind byte,
/// then the id as raw 8 bytes big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityKind {
    Namespace = 1,
    Zone = 2,
    Servlet = 3,
    Instance = 4,
    Privilege = 5,
    Config = 6,
    Plugin = 7,
    AutoIncrement = 8,
    MaxNamespaceId = 9,
    MaxZoneId = 10,
    MaxServletId = 11,
    TsoWatermark = 12,
    /// Name-pointer rows for [`EntityKind::Namespace`]. A distinct kind byte
    /// rather than a shared prefix with `Namespace`'s id rows, so reload can
    /// tell the two apart by prefix instead of by key length (an 8-byte name
    /// or address would otherwise produce a key the same length as an id row).
    NamespaceName = 13,
    InstanceName = 14,
}

/// Schema-identify byte shared by every key in this spec's `meta` CF.
pub const SCHEMA_IDENTIFY: u8 = 0x01;

/// Build an id-keyed row key: `SCHEMA_IDENTIFY || kind || id (big-endian u64)`.
pub fn id_key(kind: EntityKind, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.push(SCHEMA_IDENTIFY);
    key.push(kind as u8);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Build a name-keyed row key for a given entity kind.
pub fn name_key(kind: EntityKind, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + name.len());
    key.push(SCHEMA_IDENTIFY);
    key.push(kind as u8);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Prefix covering every key of a given entity kind.
pub fn kind_prefix(kind: EntityKind) -> Vec<u8> {
    vec![SCHEMA_IDENTIFY, kind as u8]
}

/// The max-id row key for a given max-id kind (:
/// "Max-id keys share a distinct kind byte followed by an ASCII suffix").
pub fn max_id_key(kind: EntityKind) -> Vec<u8> {
    let mut key = vec![SCHEMA_IDENTIFY, kind as u8];
    key.extend_from_slice(b"MAX");
    key
}

/// Lowest and highest possible `meta` CF key — used for the full-CF
/// range-delete on snapshot load.
pub fn full_meta_range() -> (Vec<u8>, Vec<u8>) {
    (vec![SCHEMA_IDENTIFY], vec![SCHEMA_IDENTIFY + 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        store.put(CF_META, b"k1", b"v1").unwrap();
        assert_eq!(store.get(CF_META, b"k1").unwrap(), Some(b"v1".to_vec()));
        store.delete(CF_META, b"k1").unwrap();
        assert_eq!(store.get(CF_META, b"k1").unwrap(), None);
    }

    #[test]
    fn atomic_batch_write() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        store
            .write_batch(vec![
                (CF_META.to_string(), b"a".to_vec(), Some(b"1".to_vec())),
                (CF_META.to_string(), b"b".to_vec(), Some(b"2".to_vec())),
        ])
            .unwrap();
        assert_eq!(store.get(CF_META, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(CF_META, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn prefix_iteration() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        let k1 = id_key(EntityKind::Namespace, 1);
        let k2 = id_key(EntityKind::Namespace, 2);
        let other = id_key(EntityKind::Zone, 1);
        store.put(CF_META, &k1, b"ns1").unwrap();
        store.put(CF_META, &k2, b"ns2").unwrap();
        store.put(CF_META, &other, b"zone").unwrap();

        let found = store
            .prefix_iter(CF_META, &kind_prefix(EntityKind::Namespace))
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn snapshot_export_and_ingest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        store.put(CF_META, b"a", b"1").unwrap();
        store.put(CF_META, b"b", b"2").unwrap();

        let snap_dir = TempDir::new().unwrap();
        let sst = store
            .export_cf_to_sst(CF_META, snap_dir.path(), "meta.sst")
            .unwrap();

        let dir2 = TempDir::new().unwrap();
        let store2 = KvStore::open(dir2.path()).unwrap();
        store2.ingest_sst(CF_META, &sst).unwrap();

        assert_eq!(store2.get(CF_META, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store2.get(CF_META, b"b").unwrap(), Some(b"2".to_vec()));
    }
}
