//! Privilege manager. Grant/revoke is a field-wise set merge/subtract over
//! `(zone_id, rw)` and `(servlet_id, rw)` pairs rather than a plain
//! replace, so two concurrent grants for different rights on the same
//! zone compose instead of clobbering each other.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::errors::{MetaError, MetaResult};
use crate::store::{kind_prefix, name_key, EntityKind, KvStore, CF_META};

/// Read/write level. `Write` implies `Read`; ordering matters for the
/// "upgrade only if strictly greater" / "downgrade to revoked level" rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rw {
    Read = 1,
    Write = 2,
}

impl TryFrom<u32> for Rw {
    type Error = MetaError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Rw::Read),
            2 => Ok(Rw::Write),
            other => Err(MetaError::InputParam(format!("unknown rw level {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Privilege {
    pub username: String,
    pub zone_rw: HashMap<u64, Rw>,
    pub servlet_rw: HashMap<u64, Rw>,
    pub ip_allow_list: Vec<String>,
    pub password_hash: Option<String>,
    pub version: u64,
}

impl Privilege {
    fn new(username: String, password_hash: Option<String>) -> Self {
        Self {
            username,
            zone_rw: HashMap::new(),
            servlet_rw: HashMap::new(),
            ip_allow_list: Vec::new(),
            password_hash,
            version: 1,
        }
    }
}

/// Upgrade `map[key]` to `rw`: replace only if `force` or `rw` is strictly
/// greater than the current level, else keep the greater. Returns whether
/// the map changed.
fn insert_rw(map: &mut HashMap<u64, Rw>, key: u64, rw: Rw, force: bool) -> bool {
    match map.get(&key).copied() {
        None => {
            map.insert(key, rw);
            true
        }
        Some(existing) if force || rw > existing => {
            map.insert(key, rw);
            true
        }
        _ => false,
    }
}

/// Revoke `rw` from `map[key]`: downgrade to `rw` if the existing level is
/// strictly greater, else remove the entry entirely. Returns whether the
/// map changed.
fn delete_rw(map: &mut HashMap<u64, Rw>, key: u64, rw: Rw) -> bool {
    match map.get(&key).copied() {
        None => false,
        Some(existing) if existing > rw => {
            map.insert(key, rw);
            true
        }
        Some(_) => {
            map.remove(&key);
            true
        }
    }
}

pub struct PrivilegeManager {
    inner: RwLock<HashMap<String, Privilege>>,
}

impl PrivilegeManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, store: &KvStore, username: String, password_hash: Option<String>) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.contains_key(&username) {
            return Err(MetaError::InputParam(format!("user {username} already exists")));
        }
        let priv_ = Privilege::new(username.clone(), password_hash);
        self.persist(store, &priv_)?;
        inner.insert(username, priv_);
        Ok(())
    }

    /// Grant rights: `zone_rw`/`servlet_rw` are the (id, level) pairs being
    /// added or upgraded; `force` replaces regardless of current level.
    pub fn grant(
        &self,
        store: &KvStore,
        username: &str,
        zone_rw: &[(u64, Rw)],
        servlet_rw: &[(u64, Rw)],
        force: bool,
    ) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let priv_ = inner
            .get_mut(username)
            .ok_or_else(|| MetaError::InputParam(format!("user {username} not found")))?;
        let mut changed = false;
        for &(zone_id, rw) in zone_rw {
            changed |= insert_rw(&mut priv_.zone_rw, zone_id, rw, force);
        }
        for &(servlet_id, rw) in servlet_rw {
            changed |= insert_rw(&mut priv_.servlet_rw, servlet_id, rw, force);
        }
        if changed {
            priv_.version += 1;
        }
        let snapshot = priv_.clone();
        self.persist(store, &snapshot)?;
        Ok(())
    }

    /// Revoke rights: downgrades or removes each named (id, level) pair.
    pub fn revoke(
        &self,
        store: &KvStore,
        username: &str,
        zone_rw: &[(u64, Rw)],
        servlet_rw: &[(u64, Rw)],
    ) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let priv_ = inner
            .get_mut(username)
            .ok_or_else(|| MetaError::InputParam(format!("user {username} not found")))?;
        let mut changed = false;
        for &(zone_id, rw) in zone_rw {
            changed |= delete_rw(&mut priv_.zone_rw, zone_id, rw);
        }
        for &(servlet_id, rw) in servlet_rw {
            changed |= delete_rw(&mut priv_.servlet_rw, servlet_id, rw);
        }
        if changed {
            priv_.version += 1;
        }
        let snapshot = priv_.clone();
        self.persist(store, &snapshot)?;
        Ok(())
    }

    pub fn set_ip_allow_list(&self, store: &KvStore, username: &str, ips: Vec<String>) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        let priv_ = inner
            .get_mut(username)
            .ok_or_else(|| MetaError::InputParam(format!("user {username} not found")))?;
        priv_.ip_allow_list = ips;
        priv_.version += 1;
        let snapshot = priv_.clone();
        self.persist(store, &snapshot)?;
        Ok(())
    }

    pub fn drop(&self, store: &KvStore, username: &str) -> MetaResult<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .remove(username)
            .ok_or_else(|| MetaError::InputParam(format!("user {username} not found")))?;
        store.delete(CF_META, &name_key(EntityKind::Privilege, username))?;
        Ok(())
    }

    pub fn get(&self, username: &str) -> Option<Privilege> {
        self.inner.read().unwrap().get(username).cloned()
    }

    pub fn list(&self) -> Vec<Privilege> {
        self.inner.read().unwrap().values().cloned().collect()
    }

    fn persist(&self, store: &KvStore, priv_: &Privilege) -> MetaResult<()> {
        let bytes = bincode::serialize(priv_)?;
        store.put(CF_META, &name_key(EntityKind::Privilege, &priv_.username), &bytes)
    }

    pub fn reload(&self, store: &KvStore) -> Result<(), String> {
        let mut inner = self.inner.write().unwrap();
        inner.clear();
        let rows = store
            .prefix_iter(CF_META, &kind_prefix(EntityKind::Privilege))
            .map_err(|e| e.to_string())?;
        for (_, value) in rows {
            let priv_: Privilege = bincode::deserialize(&value).map_err(|e| e.to_string())?;
            inner.insert(priv_.username.clone(), priv_);
        }
        Ok(())
    }
}

impl Default for PrivilegeManager {
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
    fn grant_upgrades_only_when_greater_or_forced() {
        let (_dir, store) = open_store();
        let mgr = PrivilegeManager::new();
        mgr.create(&store, "alice".into(), None).unwrap();

        mgr.grant(&store, "alice", &[(1, Rw::Read)], &[], false).unwrap();
        assert_eq!(mgr.get("alice").unwrap().zone_rw.get(&1), Some(&Rw::Read));

        // Downgrade attempt without force is a no-op (keep the greater).
        mgr.grant(&store, "alice", &[(1, Rw::Read)], &[], false).unwrap();
        mgr.grant(&store, "alice", &[(1, Rw::Write)], &[], false).unwrap();
        assert_eq!(mgr.get("alice").unwrap().zone_rw.get(&1), Some(&Rw::Write));

        // Force replaces even with an equal/lower level.
        mgr.grant(&store, "alice", &[(1, Rw::Read)], &[], true).unwrap();
        assert_eq!(mgr.get("alice").unwrap().zone_rw.get(&1), Some(&Rw::Read));
    }

    #[test]
    fn revoke_downgrades_then_removes() {
        let (_dir, store) = open_store();
        let mgr = PrivilegeManager::new();
        mgr.create(&store, "bob".into(), None).unwrap();
        mgr.grant(&store, "bob", &[(1, Rw::Write)], &[], false).unwrap();

        mgr.revoke(&store, "bob", &[(1, Rw::Read)], &[]).unwrap();
        assert_eq!(mgr.get("bob").unwrap().zone_rw.get(&1), Some(&Rw::Read));

        mgr.revoke(&store, "bob", &[(1, Rw::Read)], &[]).unwrap();
        assert!(!mgr.get("bob").unwrap().zone_rw.contains_key(&1));
    }

    #[test]
    fn version_bumps_only_on_accepted_change() {
        let (_dir, store) = open_store();
        let mgr = PrivilegeManager::new();
        mgr.create(&store, "carol".into(), None).unwrap();
        let v0 = mgr.get("carol").unwrap().version;

        // No-op downgrade attempt: version unchanged.
        mgr.grant(&store, "carol", &[(1, Rw::Write)], &[], false).unwrap();
        mgr.grant(&store, "carol", &[(1, Rw::Read)], &[], false).unwrap();
        assert_eq!(mgr.get("carol").unwrap().version, v0 + 1);
    }
}
