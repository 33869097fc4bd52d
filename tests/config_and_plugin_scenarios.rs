//! S2 (config version monotonicity) and S3 (plugin chunked upload +
//! tombstone/restore) against [`metad::registry::handler::DiscoveryHandler`].

use md5::{Digest, Md5};
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

fn create_config(handler: &DiscoveryHandler, store: &KvStore, version: &str) -> DiscoveryResponse {
    handler.apply(
        store,
        DiscoveryRequest::CreateConfig {
            name: "cfg".to_string(),
            version: version.to_string(),
            content: b"payload".to_vec(),
            config_type: None,
        },
    )
}

fn err_message(resp: DiscoveryResponse) -> String {
    match resp {
        DiscoveryResponse::Error { message } => message,
        other => panic!("expected Error, got {other:?}"),
    }
}

/// S2: exact-duplicate creates reject distinctly from out-of-order
/// creates, and `GET` with no explicit version returns the latest.
#[test]
fn config_version_monotonicity() {
    let (_dir, store, handler) = fresh_handler();

    assert!(matches!(create_config(&handler, &store, "1.0.0"), DiscoveryResponse::Ok));
    assert!(err_message(create_config(&handler, &store, "1.0.0")).contains("already exist"));
    assert!(err_message(create_config(&handler, &store, "0.9.9")).contains("increase monotonically"));
    assert!(matches!(create_config(&handler, &store, "1.0.1"), DiscoveryResponse::Ok));

    let latest = query::answer(&handler, DiscoveryQuery::GetConfig { name: "cfg".to_string(), version: None });
    assert_eq!(latest["version"], "1.0.1");
}

/// Property 3: removing the only remaining version of a config name drops
/// the name entirely from the listing.
#[test]
fn removing_last_version_drops_the_name() {
    let (_dir, store, handler) = fresh_handler();
    assert!(matches!(create_config(&handler, &store, "1.0.0"), DiscoveryResponse::Ok));

    let names = query::answer(&handler, DiscoveryQuery::ListConfigNames);
    assert_eq!(names.as_array().unwrap().len(), 1);

    let resp = handler.apply(
        &store,
        DiscoveryRequest::RemoveConfigByVersion { name: "cfg".to_string(), version: "1.0.0".to_string() },
    );
    assert!(matches!(resp, DiscoveryResponse::Ok));

    let names = query::answer(&handler, DiscoveryQuery::ListConfigNames);
    assert_eq!(names.as_array().unwrap().len(), 0);
}

/// S3: chunked upload to a declared checksum, download round-trip,
/// tombstone, reject-on-recreate, and restore.
#[test]
fn plugin_chunked_upload_and_tombstone_lifecycle() {
    let (_dir, store, handler) = fresh_handler();

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
    let mut hasher = Md5::new();
    hasher.update(&payload);
    let checksum = format!("{:x}", hasher.finalize());

    let resp = handler.apply(
        &store,
        DiscoveryRequest::CreatePlugin {
            name: "p".to_string(),
            version: "1.0.0".to_string(),
            declared_size: payload.len() as u64,
            declared_md5: checksum,
        },
    );
    assert!(matches!(resp, DiscoveryResponse::Ok));

    let resp = handler.apply(
        &store,
        DiscoveryRequest::UploadPluginChunk {
            name: "p".to_string(),
            version: "1.0.0".to_string(),
            offset: 0,
            data: payload[0..512].to_vec(),
        },
    );
    assert!(matches!(resp, DiscoveryResponse::Ok));
    let resp = handler.apply(
        &store,
        DiscoveryRequest::UploadPluginChunk {
            name: "p".to_string(),
            version: "1.0.0".to_string(),
            offset: 512,
            data: payload[512..1000].to_vec(),
        },
    );
    assert!(matches!(resp, DiscoveryResponse::Ok));

    let entry = query::answer(
        &handler,
        DiscoveryQuery::GetPlugin { name: "p".to_string(), version: "1.0.0".to_string() },
    );
    assert_eq!(entry["state"], "Ready");

    let downloaded = query::answer(
        &handler,
        DiscoveryQuery::DownloadPlugin { name: "p".to_string(), version: "1.0.0".to_string(), offset: 0, count: 1000 },
    );
    let bytes_b64 = downloaded["bytes_base64"].as_str().unwrap();
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD.decode(bytes_b64).unwrap();
    assert_eq!(bytes, payload);

    let resp = handler.apply(
        &store,
        DiscoveryRequest::TombstonePlugin { name: "p".to_string(), version: "1.0.0".to_string(), now_secs: 1000 },
    );
    assert!(matches!(resp, DiscoveryResponse::Ok));

    let resp = handler.apply(
        &store,
        DiscoveryRequest::CreatePlugin {
            name: "p".to_string(),
            version: "1.0.0".to_string(),
            declared_size: 1000,
            declared_md5: "deadbeef".to_string(),
        },
    );
    assert!(err_message(resp).contains("already removed"));

    let resp = handler.apply(
        &store,
        DiscoveryRequest::RestorePlugin { name: "p".to_string(), version: "1.0.0".to_string() },
    );
    assert!(matches!(resp, DiscoveryResponse::Ok));
    let entry = query::answer(
        &handler,
        DiscoveryQuery::GetPlugin { name: "p".to_string(), version: "1.0.0".to_string() },
    );
    assert_eq!(entry["state"], "Ready");
}

/// Property 4: checksum mismatch on finish leaves the upload unfinalized
/// so the client can retry the final chunk.
#[test]
fn plugin_checksum_mismatch_stays_uploading() {
    let (_dir, store, handler) = fresh_handler();
    let resp = handler.apply(
        &store,
        DiscoveryRequest::CreatePlugin {
            name: "bad".to_string(),
            version: "1.0.0".to_string(),
            declared_size: 4,
            declared_md5: "0".repeat(32),
        },
    );
    assert!(matches!(resp, DiscoveryResponse::Ok));

    let resp = handler.apply(
        &store,
        DiscoveryRequest::UploadPluginChunk {
            name: "bad".to_string(),
            version: "1.0.0".to_string(),
            offset: 0,
            data: vec![1, 2, 3, 4],
        },
    );
    assert!(matches!(resp, DiscoveryResponse::Error { .. }));

    let entry = query::answer(
        &handler,
        DiscoveryQuery::GetPlugin { name: "bad".to_string(), version: "1.0.0".to_string() },
    );
    assert_eq!(entry["state"], "Uploading");
}

/// S8 (snapshot round-trip) for the plugin group specifically: a fresh
/// handler with an empty data directory, fed only the bytes
/// `GroupHandler::snapshot_files`/`install_snapshot_files` carry, ends up
/// able to serve the exact same download the original handler could.
#[test]
fn plugin_blob_bytes_survive_snapshot_files_roundtrip() {
    let (_dir, store, handler) = fresh_handler();
    let payload = b"plugin blob bytes travel in the snapshot payload".to_vec();
    let mut hasher = Md5::new();
    hasher.update(&payload);
    let md5 = format!("{:x}", hasher.finalize());

    handler.apply(
        &store,
        DiscoveryRequest::CreatePlugin {
            name: "xfer".to_string(),
            version: "1.0.0".to_string(),
            declared_size: payload.len() as u64,
            declared_md5: md5,
        },
    );
    handler.apply(
        &store,
        DiscoveryRequest::UploadPluginChunk {
            name: "xfer".to_string(),
            version: "1.0.0".to_string(),
            offset: 0,
            data: payload.clone(),
        },
    );

    let files = handler.snapshot_files(&store);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].1, payload);

    // `install_snapshot_files` runs before `reload` on the real install
    // path (the `meta` CF is ingested from the SST separately) — check the
    // blob lands on disk with the exact bytes, independent of metadata.
    let fresh_dir = TempDir::new().unwrap();
    let fresh_handler = DiscoveryHandler::new(fresh_dir.path().join("plugins"), 16);
    fresh_handler.install_snapshot_files(&files).unwrap();

    let blob_path = fresh_dir
        .path()
        .join("plugins")
        .join("blobs")
        .join(metad::plugin::plugin_file_name("xfer", "1.0.0"));
    assert_eq!(std::fs::read(&blob_path).unwrap(), payload);

    // Installing the same files again is a no-op (identical size already
    // on disk), matching spec.md's "skip if an identically sized copy
    // exists" load rule.
    fresh_handler.install_snapshot_files(&files).unwrap();
    assert_eq!(std::fs::read(&blob_path).unwrap(), payload);
}
