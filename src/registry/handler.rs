//! [`DiscoveryHandler`]: the [`crate::raft::GroupHandler`] for the
//! discovery Raft group. Fans each applied [`crate::raft::DiscoveryRequest`]
//! out to whichever registry manager, config store, or plugin store owns
//! it, and translates the result into a [`crate::raft::DiscoveryResponse`].
//! A thin state machine that routes applied log entries to per-op handlers
//! rather than encoding the logic itself.

use std::sync::Arc;

use crate::config_store::ConfigStore;
use crate::errors::MetaError;
use crate::plugin::PluginStore;
use crate::raft::{DiscoveryRequest, DiscoveryResponse, DiscoveryTypeConfig, GroupHandler};
use crate::registry::instance::InstanceManager;
use crate::registry::namespace::NamespaceManager;
use crate::registry::privilege::{PrivilegeManager, Rw};
use crate::registry::servlet::ServletManager;
use crate::registry::zone::ZoneManager;
use crate::store::KvStore;

pub struct DiscoveryHandler {
    pub namespaces: Arc<NamespaceManager>,
    pub zones: Arc<ZoneManager>,
    pub servlets: Arc<ServletManager>,
    pub instances: Arc<InstanceManager>,
    pub privileges: Arc<PrivilegeManager>,
    pub configs: Arc<ConfigStore>,
    pub plugins: Arc<PluginStore>,
}

impl DiscoveryHandler {
    pub fn new(plugin_data_dir: impl AsRef<std::path::Path>, plugin_cache_capacity: usize) -> Self {
        Self {
            namespaces: Arc::new(NamespaceManager::new()),
            zones: Arc::new(ZoneManager::new()),
            servlets: Arc::new(ServletManager::new()),
            instances: Arc::new(InstanceManager::new()),
            privileges: Arc::new(PrivilegeManager::new()),
            configs: Arc::new(ConfigStore::new()),
            plugins: Arc::new(PluginStore::new(plugin_data_dir, plugin_cache_capacity)),
        }
    }

    fn rw_pairs(pairs: &[(u64, u32)]) -> Result<Vec<(u64, Rw)>, MetaError> {
        pairs.iter().map(|&(id, level)| Ok((id, Rw::try_from(level)?))).collect()
    }

    fn err(e: MetaError) -> DiscoveryResponse {
        DiscoveryResponse::Error { message: e.to_string() }
    }
}

impl GroupHandler<DiscoveryTypeConfig> for DiscoveryHandler {
    fn apply(&self, store: &KvStore, request: DiscoveryRequest) -> DiscoveryResponse {
        match request {
            DiscoveryRequest::CreateNamespace { name, quota, resource_tag, replica_num } => {
                match self.namespaces.create(store, name, quota, resource_tag, replica_num) {
                    Ok(id) => DiscoveryResponse::Created { id },
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::ModifyNamespace { namespace_id, quota, resource_tag, replica_num } => {
                match self.namespaces.modify(store, namespace_id, quota, resource_tag, replica_num) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::DropNamespace { namespace_id } => {
                match self.namespaces.drop(store, namespace_id) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::CreateZone { namespace_id, name, quota } => {
                if !self.namespaces.exists(namespace_id) {
                    return Self::err(MetaError::InputParam(format!("namespace {namespace_id} not found")));
                }
                match self.zones.create(store, namespace_id, name, quota) {
                    Ok(id) => {
                        self.namespaces.note_child_added(namespace_id);
                        DiscoveryResponse::Created { id }
                    }
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::ModifyZone { zone_id, quota } => {
                match self.zones.modify(store, zone_id, quota) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::DropZone { zone_id } => match self.zones.drop(store, zone_id) {
                Ok(namespace_id) => {
                    self.namespaces.note_child_removed(namespace_id);
                    DiscoveryResponse::Ok
                }
                Err(e) => Self::err(e),
            },
            DiscoveryRequest::CreateServlet { zone_id, name } => {
                let zone = match self.zones.get(zone_id) {
                    Some(z) => z,
                    None => return Self::err(MetaError::InputParam(format!("zone {zone_id} not found"))),
                };
                match self.servlets.create(store, zone_id, zone.namespace_id, name, None) {
                    Ok(id) => {
                        self.zones.note_child_added(zone_id);
                        DiscoveryResponse::Created { id }
                    }
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::ModifyServlet { servlet_id, name } => {
                match self.servlets.modify(store, servlet_id, name) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::DropServlet { servlet_id } => match self.servlets.drop(store, servlet_id) {
                Ok(zone_id) => {
                    self.zones.note_child_removed(zone_id);
                    DiscoveryResponse::Ok
                }
                Err(e) => Self::err(e),
            },
            DiscoveryRequest::AddInstance { servlet_id, address, env, status } => {
                let servlet = match self.servlets.get(servlet_id) {
                    Some(s) => s,
                    None => return Self::err(MetaError::InputParam(format!("servlet {servlet_id} not found"))),
                };
                let zone = match self.zones.get(servlet.zone_id) {
                    Some(z) => z,
                    None => return Self::err(MetaError::Internal("servlet's zone vanished".to_string())),
                };
                let namespace = match self.namespaces.get(zone.namespace_id) {
                    Some(n) => n,
                    None => return Self::err(MetaError::Internal("zone's namespace vanished".to_string())),
                };
                match self.instances.add(
                    store,
                    address,
                    namespace.id,
                    zone.id,
                    servlet.id,
                    namespace.name,
                    zone.name,
                    servlet.name,
                    env,
                    status,
                ) {
                    Ok(id) => DiscoveryResponse::Created { id },
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::RemoveInstance { instance_id } => match self.instances.remove(store, instance_id) {
                Ok(()) => DiscoveryResponse::Ok,
                Err(e) => Self::err(e),
            },
            DiscoveryRequest::UpdateInstanceStatus { instance_id, status } => {
                match self.instances.update_status(store, instance_id, status) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::GrantPrivilege { username, zone_rw, servlet_rw, force } => {
                let zone_rw = match Self::rw_pairs(&zone_rw) {
                    Ok(v) => v,
                    Err(e) => return Self::err(e),
                };
                let servlet_rw = match Self::rw_pairs(&servlet_rw) {
                    Ok(v) => v,
                    Err(e) => return Self::err(e),
                };
                if self.privileges.get(&username).is_none() {
                    if let Err(e) = self.privileges.create(store, username.clone(), None) {
                        return Self::err(e);
                    }
                }
                match self.privileges.grant(store, &username, &zone_rw, &servlet_rw, force) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::RevokePrivilege { username, zone_rw, servlet_rw } => {
                let zone_rw = match Self::rw_pairs(&zone_rw) {
                    Ok(v) => v,
                    Err(e) => return Self::err(e),
                };
                let servlet_rw = match Self::rw_pairs(&servlet_rw) {
                    Ok(v) => v,
                    Err(e) => return Self::err(e),
                };
                match self.privileges.revoke(store, &username, &zone_rw, &servlet_rw) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::DropPrivilege { username } => match self.privileges.drop(store, &username) {
                Ok(()) => DiscoveryResponse::Ok,
                Err(e) => Self::err(e),
            },
            DiscoveryRequest::CreateConfig { name, version, content, config_type } => {
                match self.configs.create(store, name, version, content, config_type) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::RemoveConfigByVersion { name, version } => {
                match self.configs.remove_by_version(store, &name, &version) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::RemoveConfigByName { name } => match self.configs.remove_by_name(store, &name) {
                Ok(()) => DiscoveryResponse::Ok,
                Err(e) => Self::err(e),
            },
            DiscoveryRequest::CreatePlugin { name, version, declared_size, declared_md5 } => {
                match self.plugins.create(store, name, version, declared_size, declared_md5) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::UploadPluginChunk { name, version, offset, data } => {
                match self.plugins.upload_chunk(store, &name, &version, offset, &data) {
                    Ok(_) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::TombstonePlugin { name, version, now_secs } => {
                match self.plugins.tombstone(store, &name, &version, now_secs) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
            DiscoveryRequest::RestorePlugin { name, version } => match self.plugins.restore(store, &name, &version) {
                Ok(()) => DiscoveryResponse::Ok,
                Err(e) => Self::err(e),
            },
            DiscoveryRequest::PurgePlugin { name, version } => match self.plugins.purge(store, &name, &version) {
                Ok(()) => DiscoveryResponse::Ok,
                Err(e) => Self::err(e),
            },
            DiscoveryRequest::PurgeTombstonedPlugins { now_secs, older_than_secs } => {
                match self.plugins.purge_older_than(store, now_secs, older_than_secs) {
                    Ok(()) => DiscoveryResponse::Ok,
                    Err(e) => Self::err(e),
                }
            }
        }
    }

    fn reload(&self, store: &KvStore) -> Result<(), String> {
        self.namespaces.reload(store)?;
        self.zones.reload(store)?;
        self.servlets.reload(store)?;
        self.instances.reload(store)?;
        self.privileges.reload(store)?;
        self.configs.reload(store)?;
        self.plugins.reload(store)?;
        self.rebuild_child_counters();
        Ok(())
    }

    fn snapshot_files(&self, _store: &KvStore) -> Vec<(String, Vec<u8>)> {
        self.plugins.snapshot_blob_files()
    }

    fn install_snapshot_files(&self, files: &[(String, Vec<u8>)]) -> Result<(), String> {
        self.plugins.install_blob_files(files).map_err(|e| e.to_string())
    }
}

impl DiscoveryHandler {
    /// `reload` rebuilds each manager's own maps independently; the
    /// namespace/zone "has children" counters live in the parent manager
    /// and must be recomputed from the children that actually exist.
    fn rebuild_child_counters(&self) {
        for zone in self.zones.list_all() {
            self.namespaces.note_child_added(zone.namespace_id);
        }
        for servlet in self.servlets.list_all() {
            self.zones.note_child_added(servlet.zone_id);
        }
    }
}
