mod common;

use std::time::Duration;

use bytes::Bytes;
use tokio_test::{assert_err, assert_ok};
use tracing_test::traced_test;

use dog_image_store::memory::Call;
use dog_image_store::{ObjectHeaders, StoreError, EMPTY_ETAG};

use common::*;

fn puts(calls: &[Call]) -> Vec<(String, Option<u64>)> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::PutObject {
                name,
                content_length,
                ..
            } => Some((name.clone(), *content_length)),
            _ => None,
        })
        .collect()
}

fn deletes(calls: &[Call]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::DeleteObject { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn small_image_is_written_in_one_put() {
    let (store, backend, _) = store(config());
    let data = image(3 * MIB);

    let receipt = assert_ok!(
        store
            .add("img-1", byte_stream(&data, 64 * 1024), data.len() as u64, None, None)
            .await
    );

    assert_eq!(receipt.size_bytes, 3 * MIB);
    assert_eq!(receipt.checksum, md5_hex(&data));
    assert_eq!(receipt.uri, "swift+https://identity.example/v3/glance/img-1");
    assert_eq!(puts(&backend.calls()), vec![("img-1".to_string(), Some(3 * MIB))]);
    assert_eq!(backend.object("glance", "img-1").unwrap(), data);
}

#[tokio::test]
async fn ten_mib_image_becomes_three_segments_and_a_manifest() {
    let (store, backend, _) = store(config());
    let data = image(10 * MIB);

    let receipt = store
        .add("img-1", byte_stream(&data, 64 * 1024), 10 * MIB, None, None)
        .await
        .unwrap();

    assert_eq!(
        puts(&backend.calls()),
        vec![
            ("img-1-00001".to_string(), Some(4 * MIB)),
            ("img-1-00002".to_string(), Some(4 * MIB)),
            ("img-1-00003".to_string(), Some(2 * MIB)),
            ("img-1".to_string(), Some(0)),
        ]
    );
    assert_eq!(backend.object("glance", "img-1-00001").unwrap().len() as u64, 4 * MIB);
    assert_eq!(backend.object("glance", "img-1-00003").unwrap().len() as u64, 2 * MIB);

    let manifest = backend.object_headers("glance", "img-1").unwrap();
    assert_eq!(manifest.object_manifest(), Some("glance/img-1-"));
    assert!(backend.object("glance", "img-1").unwrap().is_empty());

    assert_eq!(receipt.size_bytes, 10 * MIB);
    assert_eq!(receipt.checksum, md5_hex(&data));
    assert_eq!(store.get_size(&receipt.location, None).await.unwrap(), 10 * MIB);
}

#[tokio::test]
async fn image_exactly_at_the_threshold_is_segmented() {
    let (store, backend, _) = store(config());
    let data = image(5 * MIB);

    store
        .add("img-1", byte_stream(&data, 1024 * 1024), 5 * MIB, None, None)
        .await
        .unwrap();

    assert_eq!(
        backend.object_names("glance"),
        vec!["img-1", "img-1-00001", "img-1-00002"]
    );
}

#[tokio::test]
#[traced_test]
async fn unknown_size_stops_at_the_first_empty_segment() {
    let (store, backend, _) = store(config());
    let data = image(8 * MIB);

    let receipt = store
        .add("img-1", byte_stream(&data, 100_000), 0, None, None)
        .await
        .unwrap();

    // No third, zero-length segment.
    assert_eq!(
        puts(&backend.calls()),
        vec![
            ("img-1-00001".to_string(), None),
            ("img-1-00002".to_string(), None),
            ("img-1".to_string(), Some(0)),
        ]
    );
    assert_eq!(receipt.size_bytes, 8 * MIB);
    assert_eq!(receipt.checksum, md5_hex(&data));
    assert!(logs_contain("Not writing zero-length chunk."));
}

#[tokio::test]
async fn verifier_sees_every_byte() {
    let (store, _, _) = store(config());
    let data = image(9 * MIB);
    let mut verifier = md5::Context::new();

    store
        .add("img-1", byte_stream(&data, 64 * 1024), 9 * MIB, None, Some(&mut verifier))
        .await
        .unwrap();

    assert_eq!(format!("{:x}", verifier.compute()), md5_hex(&data));
}

#[tokio::test]
async fn failed_segment_deletes_earlier_segments_and_skips_manifest() {
    let (store, backend, _) = store(config());
    backend.fail_put("img-1-00003", 503);
    let data = image(14 * MIB);

    let err = assert_err!(
        store
            .add("img-1", byte_stream(&data, 64 * 1024), 14 * MIB, None, None)
            .await
    );

    assert!(matches!(err, StoreError::Backend { ref message } if message.contains("Failed to add object to Swift")));
    let calls = backend.calls();
    assert_eq!(deletes(&calls), vec!["img-1-00001", "img-1-00002"]);
    assert!(!puts(&calls).iter().any(|(name, _)| name == "img-1"));
    assert!(backend.object_names("glance").is_empty());
}

#[tokio::test]
#[traced_test]
async fn cleanup_failures_are_logged_and_original_error_kept() {
    let (store, backend, _) = store(config());
    backend.fail_put("img-1-00003", 503);
    backend.fail_delete("img-1-00001");
    let data = image(14 * MIB);

    let err = store
        .add("img-1", byte_stream(&data, 64 * 1024), 14 * MIB, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Backend { .. }));
    assert_eq!(deletes(&backend.calls()), vec!["img-1-00001", "img-1-00002"]);
    assert_eq!(backend.object_names("glance"), vec!["img-1-00001"]);
    assert!(logs_contain("Failed to delete orphaned chunk glance/img-1-00001"));
}

#[tokio::test]
async fn source_failure_mid_upload_cleans_up_and_surfaces_io_error() {
    let (store, backend, _) = store(config());
    let data = image(6 * MIB);

    let err = store
        .add("img-1", failing_stream(&data), 12 * MIB, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Io { .. }));
    assert!(backend.object_names("glance").is_empty());
}

#[tokio::test]
async fn conflict_on_write_is_a_duplicate() {
    let (store, backend, _) = store(config());
    backend.fail_put("img-1", 409);
    let data = image(MIB);

    let err = store
        .add("img-1", byte_stream(&data, 64 * 1024), MIB, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Duplicate { .. }));
}

#[tokio::test]
async fn conflicting_manifest_keeps_segments_and_reports_duplicate() {
    let (store, backend, _) = store(config());
    backend.fail_put("img-1", 409);
    let data = image(6 * MIB);

    let err = store
        .add("img-1", byte_stream(&data, 64 * 1024), 6 * MIB, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Duplicate { .. }));
    assert!(deletes(&backend.calls()).is_empty());
}

#[tokio::test]
async fn missing_container_is_an_error_unless_creation_is_enabled() {
    let backend = dog_image_store::MemoryObjectStore::new();
    let store = dog_image_store::ImageStore::new(config(), backend.clone(), identity()).unwrap();
    let data = image(MIB);

    let err = store
        .add("img-1", byte_stream(&data, 64 * 1024), MIB, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Backend { ref message } if message.contains("create_container_on_put")));
    assert!(!backend.has_container("glance"));

    let store = dog_image_store::ImageStore::new(
        config().create_container_on_put(),
        backend.clone(),
        identity(),
    )
    .unwrap();
    store
        .add("img-1", byte_stream(&data, 64 * 1024), MIB, None, None)
        .await
        .unwrap();
    assert!(backend.calls().contains(&Call::PutContainer("glance".to_string())));
    assert_eq!(backend.object("glance", "img-1").unwrap(), data);
}

#[tokio::test]
async fn manifest_carries_the_empty_etag() {
    let headers = ObjectHeaders::new().with("ETag", EMPTY_ETAG);
    assert_eq!(headers.etag(), Some(md5_hex(b"").as_str()));

    let (store, backend, _) = store(config());
    let data = image(6 * MIB);
    store
        .add("img-1", byte_stream(&data, 64 * 1024), 6 * MIB, None, None)
        .await
        .unwrap();
    // The in-memory store rejects an ETag that does not match the body.
    assert!(backend.object_headers("glance", "img-1").is_some());
}

#[tokio::test]
async fn bad_image_ids_are_rejected_before_any_call() {
    let (store, backend, _) = store(config());
    let err = store
        .add("a/b", byte_stream(&Bytes::from_static(b"x"), 1), 1, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::BadLocation { .. }));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn segmented_receipt_reports_the_declared_size() {
    let (store, _, _) = store(config());
    let data = image(8 * MIB);

    // The source runs dry on a segment boundary, before the declared size.
    let receipt = store
        .add("img-1", byte_stream(&data, 64 * 1024), 12 * MIB, None, None)
        .await
        .unwrap();

    assert_eq!(receipt.size_bytes, 12 * MIB);
    assert_eq!(receipt.checksum, md5_hex(&data));
    assert_eq!(store.get_size(&receipt.location, None).await.unwrap(), 8 * MIB);
}

#[tokio::test]
#[traced_test]
async fn identity_failure_mid_upload_keeps_its_own_error() {
    let (store, backend, identity) = store(config());
    identity.set_token_ttl(Duration::from_secs(30));
    // Initial token and the refresh before segment 1 succeed; the refresh
    // before segment 2 does not.
    identity.refuse_authentications_after(2);
    let data = image(10 * MIB);

    let err = store
        .add("img-1", byte_stream(&data, 64 * 1024), 10 * MIB, None, None)
        .await
        .unwrap_err();

    match err {
        StoreError::Backend { message } => {
            assert_eq!(message, "Identity service error: identity service unavailable")
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let names: Vec<_> = puts(&backend.calls()).into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["img-1-00001"]);
    assert!(logs_contain("Error during chunked upload"));
}
