//! Versioned named config blobs.
//!
//! `name → ordered map<semver, blob>`, with version numbers required to
//! strictly increase for a given name. Shaped like the other registry
//! managers in this crate but keyed by a `BTreeMap<Version, _>` per name
//! instead of a flat id table, since configs have no numeric id — the
//! (name, version) pair is the whole key.

use std::collections::BTreeMap;
use std::sync::RwLock;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::errors::{MetaError, MetaResult};
use crate::store::{KvStore, CF_META, SCHEMA_IDENTIFY};

pub const CONFIG_KIND: u8 = crate::store::EntityKind::Config as u8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigEntry {
    pub name: String,
    pub version: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

fn config_key(name: &str, version: &Version) -> Vec<u8> {
    let mut key = vec![SCHEMA_IDENTIFY, CONFIG_KIND];
    key.extend_from_slice(name.as_bytes());
    key.push(0); // separator: names never contain NUL.
    key.extend_from_slice(version.to_string().as_bytes());
    key
}

fn parse_version(version: &str) -> MetaResult<Version> {
    Version::parse(version).map_err(|e| MetaError::InputParam(format!("bad semver {version}: {e}")))
}

#[derive(Default)]
struct Inner {
    by_name: std::collections::HashMap<String, BTreeMap<Version, ConfigEntry>>,
}

pub struct ConfigStore {
    inner: RwLock<Inner>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn create(
        &self,
        store: &KvStore,
        name: String,
        version: String,
        content: Vec<u8>,
        content_type: Option<String>,
    ) -> MetaResult<()> {
        let parsed = parse_version(&version)?;
        let mut inner = self.inner.write().unwrap();
        let versions = inner.by_name.entry(name.clone()).or_default();
        if versions.contains_key(&parsed) {
            return Err(MetaError::InputParam(format!("config {name}@{version} already exists")));
        }
        if let Some(max) = versions.keys().next_back() {
            if &parsed <= max {
                return Err(MetaError::InputParam(
                        "versions must increase monotonically".to_string(),
                ));
            }
        }
        let entry = ConfigEntry {
            name: name.clone(),
            version: version.clone(),
            content,
            content_type,
        };
        let bytes = bincode::serialize(&entry)?;
        store.put(CF_META, &config_key(&name, &parsed), &bytes)?;
        versions.insert(parsed, entry);
        Ok(())
    }

    pub fn remove_by_version(&self, store: &KvStore, name: &str, version: &str) -> MetaResult<()> {
        let parsed = parse_version(version)?;
        let mut inner = self.inner.write().unwrap();
        let versions = inner
            .by_name
            .get_mut(name)
            .ok_or_else(|| MetaError::InputParam(format!("config {name} not found")))?;
        versions
            .remove(&parsed)
            .ok_or_else(|| MetaError::InputParam(format!("config {name}@{version} not found")))?;
        store.delete(CF_META, &config_key(name, &parsed))?;
        if versions.is_empty() {
            inner.by_name.remove(name);
        }
        Ok(())
    }

    pub fn remove_by_name(&self, store: &KvStore, name: &str) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let versions = inner
            .by_name
            .remove(name)
            .ok_or_else(|| MetaError::InputParam(format!("config {name} not found")))?;
        let writes = versions
            .keys()
            .map(|v| (CF_META.to_string(), config_key(name, v), None))
            .collect();
        store.write_batch(writes)?;
        Ok(())
    }

    /// Returns the exact version if given, else the greatest version present.
    pub fn get(&self, name: &str, version: Option<&str>) -> MetaResult<ConfigEntry> {
        let inner = self.inner.read().unwrap();
        let versions = inner
            .by_name
            .get(name)
            .ok_or_else(|| MetaError::InputParam(format!("config {name} not found")))?;
        match version {
            Some(v) => {
                let parsed = parse_version(v)?;
                versions
                    .get(&parsed)
                    .cloned()
                    .ok_or_else(|| MetaError::InputParam(format!("config {name}@{v} not found")))
            }
            None => versions
                .values()
                .next_back()
                .cloned()
                .ok_or_else(|| MetaError::InputParam(format!("config {name} has no versions"))),
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        self.inner.read().unwrap().by_name.keys().cloned().collect()
    }

    pub fn list_versions(&self, name: &str) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .by_name
            .get(name)
            .map(|versions| versions.keys().map(|v| v.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn reload(&self, store: &KvStore) -> Result<(), String> {
        let mut inner = self.inner.write().unwrap();
        inner.by_name.clear();
        let rows = store
            .prefix_iter(CF_META, &[SCHEMA_IDENTIFY, CONFIG_KIND])
            .map_err(|e| e.to_string())?;
        for (_, value) in rows {
            let entry: ConfigEntry = bincode::deserialize(&value).map_err(|e| e.to_string())?;
            let version = Version::parse(&entry.version).map_err(|e| e.to_string())?;
            inner.by_name.entry(entry.name.clone()).or_default().insert(version, entry);
        }
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
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

    #[test]
    fn create_requires_strictly_increasing_versions() {
        let (_dir, store) = open_store();
        let cfg = ConfigStore::new();
        cfg.create(&store, "svc".into(), "1.0.0".into(), b"a".to_vec(), None).unwrap();
        let err = cfg
            .create(&store, "svc".into(), "1.0.0".into(), b"b".to_vec(), None)
            .unwrap_err();
        assert!(matches!(err, MetaError::InputParam(_)));
        let err = cfg
            .create(&store, "svc".into(), "0.9.0".into(), b"c".to_vec(), None)
            .unwrap_err();
        assert!(matches!(err, MetaError::InputParam(_)));
        cfg.create(&store, "svc".into(), "1.1.0".into(), b"d".to_vec(), None).unwrap();
    }

    #[test]
    fn get_without_version_returns_greatest() {
        let (_dir, store) = open_store();
        let cfg = ConfigStore::new();
        cfg.create(&store, "svc".into(), "1.0.0".into(), b"a".to_vec(), None).unwrap();
        cfg.create(&store, "svc".into(), "2.0.0".into(), b"b".to_vec(), None).unwrap();
        assert_eq!(cfg.get("svc", None).unwrap().content, b"b".to_vec());
        assert_eq!(cfg.get("svc", Some("1.0.0")).unwrap().content, b"a".to_vec());
    }

    #[test]
    fn remove_by_name_clears_all_versions() {
        let (_dir, store) = open_store();
        let cfg = ConfigStore::new();
        cfg.create(&store, "svc".into(), "1.0.0".into(), b"a".to_vec(), None).unwrap();
        cfg.create(&store, "svc".into(), "2.0.0".into(), b"b".to_vec(), None).unwrap();
        cfg.remove_by_name(&store, "svc").unwrap();
        assert!(cfg.get("svc", None).is_err());
    }
}
