//! End-to-end scenarios against [`metad::registry::handler::DiscoveryHandler`]
//! driven the same way the Raft `apply` loop would: one request in, one
//! response out, against a real on-disk [`metad::store::KvStore`].

use metad::raft::{DiscoveryRequest, DiscoveryResponse, GroupHandler};
use metad::registry::handler::DiscoveryHandler;
use metad::rest::query::{self, DiscoveryQuery};
use metad::store::KvStore;
use tempfile::TempDir;

fn fresh_handler() -> (TempDir, KvStore, DiscoveryHandler) {
    let dir = TempDir::new().unwrap();
    let store = KvStore::open(dir.path()).unwrap();
    let handler = DiscoveryHandler::new(dir.path().join("plugins"), 16);
    (dir, store, handler)
}

fn created_id(resp: DiscoveryResponse) -> u64 {
    match resp {
        DiscoveryResponse::Created { id } => id,
        other => panic!("expected Created, got {other:?}"),
    }
}

/// S1: namespace/zone/servlet/instance hierarchy, flattened instance query,
/// and drop-while-children-exist rejection.
#[test]
fn registry_hierarchy_and_flatten_query() {
    let (_dir, store, handler) = fresh_handler();

    let ns_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateNamespace {
            name: "ns1".to_string(),
            quota: 1,
            resource_tag: None,
            replica_num: 1,
        },
    ));
    let zone_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateZone { namespace_id: ns_id, name: "z1".to_string(), quota: 1 },
    ));
    let servlet_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateServlet { zone_id, name: "s1".to_string() },
    ));
    let _instance_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::AddInstance {
            servlet_id,
            address: "10.0.0.1:8000".to_string(),
            env: Some("prod".to_string()),
            status: None,
        },
    ));

    let flattened = query::answer(
        &handler,
        DiscoveryQuery::ListInstancesFlatten { namespace_id: ns_id, zone_id: None, servlet_id: None },
    );
    let instances = flattened.as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["address"], "10.0.0.1:8000");
    assert_eq!(instances[0]["env"], "prod");

    // Parent's child-count bookkeeping: the zone still holds its servlet,
    // so dropping the namespace must be rejected rather than orphan it.
    let resp = handler.apply(&store, DiscoveryRequest::DropNamespace { namespace_id: ns_id });
    match resp {
        DiscoveryResponse::Error { message } => assert!(message.contains("zone") || message.contains("servlet")),
        other => panic!("expected Error, got {other:?}"),
    }
}

/// S6: an address removed from the instance registry cannot be re-added
/// within the 1-hour tombstone window, but a different address is
/// unaffected.
#[test]
fn instance_readd_window_rejects_immediate_readd() {
    let (_dir, store, handler) = fresh_handler();
    let ns_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateNamespace { name: "ns".to_string(), quota: 10, resource_tag: None, replica_num: 1 },
    ));
    let zone_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateZone { namespace_id: ns_id, name: "z".to_string(), quota: 10 },
    ));
    let servlet_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateServlet { zone_id, name: "s".to_string() },
    ));

    let instance_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::AddInstance {
            servlet_id,
            address: "1.2.3.4:5".to_string(),
            env: None,
            status: None,
        },
    ));
    let resp = handler.apply(&store, DiscoveryRequest::RemoveInstance { instance_id });
    assert!(matches!(resp, DiscoveryResponse::Ok));

    let resp = handler.apply(
        &store,
        DiscoveryRequest::AddInstance { servlet_id, address: "1.2.3.4:5".to_string(), env: None, status: None },
    );
    match resp {
        DiscoveryResponse::Error { message } => assert!(message.contains("removed in 1 hour")),
        other => panic!("expected Error, got {other:?}"),
    }

    // A different address under the same servlet is unaffected by the
    // tombstone window.
    let resp = handler.apply(
        &store,
        DiscoveryRequest::AddInstance { servlet_id, address: "1.2.3.4:6".to_string(), env: None, status: None },
    );
    assert!(matches!(resp, DiscoveryResponse::Created { .. }));
}

/// Property 1: after commit, an entity is readable, its parent's child
/// count reflects it, and ids never collide across creates.
#[test]
fn created_entities_are_readable_and_ids_never_reused() {
    let (_dir, store, handler) = fresh_handler();
    let ns1 = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateNamespace { name: "a".to_string(), quota: 10, resource_tag: None, replica_num: 1 },
    ));
    let ns2 = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateNamespace { name: "b".to_string(), quota: 10, resource_tag: None, replica_num: 1 },
    ));
    assert_ne!(ns1, ns2);

    let found = query::answer(&handler, DiscoveryQuery::GetNamespace { namespace_id: ns1 });
    assert_eq!(found["name"], "a");

    // Dropping "a" (no children) then creating another namespace must not
    // reuse id `ns1`.
    let resp = handler.apply(&store, DiscoveryRequest::DropNamespace { namespace_id: ns1 });
    assert!(matches!(resp, DiscoveryResponse::Ok));
    let ns3 = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateNamespace { name: "c".to_string(), quota: 10, resource_tag: None, replica_num: 1 },
    ));
    assert!(ns3 > ns2);
}

/// `reload()` rebuilds every manager's in-memory index from what's
/// actually on disk — the snapshot-install / restart path.
#[test]
fn reload_rebuilds_indices_from_disk() {
    let (dir, store, handler) = fresh_handler();
    let ns_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateNamespace { name: "ns".to_string(), quota: 5, resource_tag: None, replica_num: 1 },
    ));
    let zone_id = created_id(handler.apply(
        &store,
        DiscoveryRequest::CreateZone { namespace_id: ns_id, name: "z".to_string(), quota: 5 },
    ));

    let fresh = DiscoveryHandler::new(dir.path().join("plugins"), 16);
    fresh.reload(&store).unwrap();

    let found = query::answer(&fresh, DiscoveryQuery::GetZone { zone_id });
    assert_eq!(found["namespace_id"], ns_id);
}
