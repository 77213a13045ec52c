mod common;

use futures::StreamExt;
use tracing_test::traced_test;

use dog_image_store::memory::Call;
use dog_image_store::{ImageStore, MemoryObjectStore, StoreError, StoreLocation};

use common::*;

fn gets(calls: &[Call]) -> Vec<Option<u64>> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::GetObject { offset, .. } => Some(*offset),
            _ => None,
        })
        .collect()
}

fn stored(len: u64) -> (dog_image_store::ImageStore, dog_image_store::MemoryObjectStore, StoreLocation, bytes::Bytes, u32) {
    let retries = 3;
    let (store, backend, _) = store(config().with_retry_get_count(retries));
    let data = image(len);
    backend.insert_object("glance", "img-1", data.clone());
    backend.set_serve_chunk_size(1000);
    let location = StoreLocation::new(AUTH_URL, "glance", "img-1");
    (store, backend, location, data, retries)
}

#[tokio::test]
#[traced_test]
async fn interrupted_download_resumes_at_the_delivered_offset() {
    let (store, backend, location, data, _) = stored(10_000);
    backend.interrupt_gets(vec![Some(3_000), Some(4_000), None]);

    let opened = store.get(&location, None).await.unwrap();
    assert_eq!(opened.size_bytes, 10_000);
    let body = opened.read_to_end().await.unwrap();

    assert_eq!(body, data);
    assert_eq!(gets(&backend.calls()), vec![None, Some(3_000), Some(7_000)]);
    assert!(logs_contain("Retrying Swift connection (1/3) with range=3000-10000"));
    assert!(logs_contain("Retrying Swift connection (2/3) with range=7000-10000"));
}

#[tokio::test]
#[traced_test]
async fn exhausted_retries_end_in_a_short_read() {
    let (store, backend, location, data, retries) = stored(10_000);
    backend.interrupt_gets(vec![Some(1_000); 10]);

    let body = store
        .get(&location, None)
        .await
        .unwrap()
        .read_to_end()
        .await
        .unwrap();

    assert_eq!(body.len(), 4_000);
    assert_eq!(&body[..], &data[..4_000]);
    assert_eq!(gets(&backend.calls()).len() as u32, retries + 1);
    assert!(logs_contain("Stopping Swift retries after 3 attempts"));
}

#[tokio::test]
async fn zero_budget_returns_short_read_without_error() {
    let (store, backend, _) = store(config());
    let data = image(5_000);
    backend.insert_object("glance", "img-1", data.clone());
    backend.set_serve_chunk_size(512);
    backend.interrupt_gets(vec![Some(2_048)]);
    let location = StoreLocation::new(AUTH_URL, "glance", "img-1");

    let opened = store.get(&location, None).await.unwrap();
    assert_eq!(opened.size_bytes, 5_000);
    let body = opened.read_to_end().await.unwrap();

    assert_eq!(&body[..], &data[..2_048]);
    assert_eq!(gets(&backend.calls()), vec![None]);
}

#[tokio::test]
async fn segmented_image_downloads_whole() {
    let (store, backend, _) = store(config().with_retry_get_count(2));
    let data = image(10 * MIB);
    let receipt = store
        .add("img-1", byte_stream(&data, 64 * 1024), 10 * MIB, None, None)
        .await
        .unwrap();
    backend.interrupt_gets(vec![Some(5 * MIB + 17)]);

    let opened = store.get(&receipt.location, None).await.unwrap();
    assert_eq!(opened.size_bytes, 10 * MIB);
    assert_eq!(opened.read_to_end().await.unwrap(), data);
}

#[tokio::test]
async fn download_releases_its_connection_when_done() {
    let (store, backend, location, _, _) = stored(2_000);

    let body = store
        .get(&location, None)
        .await
        .unwrap()
        .read_to_end()
        .await
        .unwrap();

    assert_eq!(body.len(), 2_000);
    assert_eq!(backend.closed_connections(), 1);
}

#[tokio::test]
async fn missing_image_is_not_found() {
    let (store, _, _) = store(config());
    let location = StoreLocation::new(AUTH_URL, "glance", "missing");

    let err = store.get(&location, None).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    let err = store.get_size(&location, None).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn dropped_partial_download_closes_its_connection_and_revokes_its_trust() {
    let identity = identity();
    let backend = MemoryObjectStore::new();
    let config = config()
        .multi_tenant()
        .create_container_on_put()
        .with_retry_get_count(2);
    let store = ImageStore::new(config, backend.clone(), identity.clone()).unwrap();
    let ctx = caller_ctx(&identity);
    let data = image(MIB);
    let receipt = store
        .add("img-1", byte_stream(&data, 64 * 1024), MIB, Some(&ctx), None)
        .await
        .unwrap();
    backend.set_serve_chunk_size(1024);
    let closed_before = backend.closed_connections();

    let mut opened = store.get(&receipt.location, Some(&ctx)).await.unwrap();
    let first = opened.stream.next().await.unwrap().unwrap();
    assert_eq!(&first[..], &data[..1024]);
    assert_eq!(identity.active_trusts().len(), 1);
    drop(opened);

    for _ in 0..100 {
        if identity.active_trusts().is_empty() && backend.closed_connections() > closed_before {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(backend.closed_connections(), closed_before + 1);
    assert!(identity.active_trusts().is_empty());
    assert_eq!(identity.deleted_trusts().len(), 1);
}
