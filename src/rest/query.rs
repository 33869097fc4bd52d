//! Read-only queries served directly from manager state, bypassing Raft.
//! One flat enum across every registry/config/plugin read API, including
//! the flattened namespace/zone/servlet/instance join
//! `QUERY_INSTANCE_FLATTEN`.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::concurrency::Lookup;
use crate::registry::handler::DiscoveryHandler;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiscoveryQuery {
    GetNamespace { namespace_id: u64 },
    GetNamespaceByName { name: String },
    ListNamespaces,
    GetZone { zone_id: u64 },
    ListZonesByNamespace { namespace_id: u64 },
    GetServlet { servlet_id: u64 },
    ListServletsByZone { zone_id: u64 },
    GetInstanceByAddress { address: String },
    /// `QUERY_INSTANCE_FLATTEN` ( S1): every instance under a
    /// namespace, optionally narrowed to one zone and/or servlet.
    ListInstancesFlatten {
        namespace_id: u64,
        zone_id: Option<u64>,
        servlet_id: Option<u64>,
    },
    /// Incremental instance change feed: everything recorded since
    /// `last_seen_index`, or a `full_resync` signal if the feed no longer
    /// covers the gap.
    InstanceChangesSince {
        last_seen_index: i64,
    },
    GetPrivilege { username: String },
    ListPrivileges,
    GetConfig { name: String, version: Option<String> },
    ListConfigNames,
    ListConfigVersions { name: String },
    GetPlugin { name: String, version: String },
    DownloadPlugin { name: String, version: String, offset: u64, count: u64 },
}

pub fn answer(handler: &DiscoveryHandler, query: DiscoveryQuery) -> Value {
    match query {
        DiscoveryQuery::GetNamespace { namespace_id } => json!(handler.namespaces.get(namespace_id)),
        DiscoveryQuery::GetNamespaceByName { name } => json!(handler.namespaces.get_by_name(&name)),
        DiscoveryQuery::ListNamespaces => json!(handler.namespaces.list()),
        DiscoveryQuery::GetZone { zone_id } => json!(handler.zones.get(zone_id)),
        DiscoveryQuery::ListZonesByNamespace { namespace_id } => {
            json!(handler.zones.list_by_namespace(namespace_id))
        }
        DiscoveryQuery::GetServlet { servlet_id } => json!(handler.servlets.get(servlet_id)),
        DiscoveryQuery::ListServletsByZone { zone_id } => json!(handler.servlets.list_by_zone(zone_id)),
        DiscoveryQuery::GetInstanceByAddress { address } => json!(handler.instances.get_by_address(&address)),
        DiscoveryQuery::ListInstancesFlatten { namespace_id, zone_id, servlet_id } => {
            let instances = match (zone_id, servlet_id) {
                (Some(zone_id), Some(servlet_id)) => {
                    handler.instances.list_by_servlet(namespace_id, zone_id, servlet_id)
                }
                (Some(zone_id), None) => handler.instances.list_by_zone(namespace_id, zone_id),
                _ => handler.instances.list_by_namespace(namespace_id),
            };
            json!(instances)
        }
        DiscoveryQuery::InstanceChangesSince { last_seen_index } => {
            let (current_index, lookup) = handler.instances.changes_since(last_seen_index);
            match lookup {
                Lookup::FullResync => json!({ "full_resync": true, "current_index": current_index }),
                Lookup::Delta(changes) => json!({
                            "full_resync": false,
                            "current_index": current_index,
                            "changes": changes.into_iter().map(|(_, c)| c).collect::<Vec<_>>(),
                }),
            }
        }
        DiscoveryQuery::GetPrivilege { username } => json!(handler.privileges.get(&username)),
        DiscoveryQuery::ListPrivileges => json!(handler.privileges.list()),
        DiscoveryQuery::GetConfig { name, version } => {
            json!(handler.configs.get(&name, version.as_deref()).ok())
        }
        DiscoveryQuery::ListConfigNames => json!(handler.configs.list_names()),
        DiscoveryQuery::ListConfigVersions { name } => json!(handler.configs.list_versions(&name)),
        DiscoveryQuery::GetPlugin { name, version } => json!(handler.plugins.get(&name, &version)),
        DiscoveryQuery::DownloadPlugin { name, version, offset, count } => {
            match handler.plugins.download(&name, &version, offset, count) {
                Ok(bytes) => json!({ "bytes_base64": base64::engine::general_purpose::STANDARD.encode(bytes) }),
                Err(e) => json!({ "error": e.to_string() }),
            }
        }
    }
}
