#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use bytes::Bytes;

use dog_identity::{CatalogEndpoint, Interface, MemoryIdentityService, ServiceCatalog};
use dog_image_store::{
    ByteStream, ImageStore, MemoryObjectStore, StoreConfig, StoreCtx, SwiftReference,
};

pub const MIB: u64 = 1024 * 1024;
pub const AUTH_URL: &str = "https://identity.example/v3/";
pub const SERVICE_STORAGE_URL: &str = "https://swift.example/v1/AUTH_services";
pub const CALLER_STORAGE_URL: &str = "https://swift.example/v1/AUTH_demo";

pub fn catalog() -> ServiceCatalog {
    ServiceCatalog::new(vec![
        CatalogEndpoint::new("object-store", Interface::Public, SERVICE_STORAGE_URL),
        CatalogEndpoint::new("object-store", Interface::Internal, "http://swift.internal/v1/AUTH_services"),
    ])
}

pub fn caller_catalog() -> ServiceCatalog {
    ServiceCatalog::new(vec![CatalogEndpoint::new(
        "object-store",
        Interface::Public,
        CALLER_STORAGE_URL,
    )])
}

/// Identity service knowing the `glance` service user and the `alice` caller
pub fn identity() -> Arc<MemoryIdentityService> {
    Arc::new(
        MemoryIdentityService::new(catalog())
            .with_user("glance", "secret", "services", &["admin", "service"])
            .with_user("alice", "wonderland", "demo", &["member", "reader"]),
    )
}

pub fn reference() -> SwiftReference {
    SwiftReference::new(AUTH_URL, "services:glance", "secret")
}

/// Single-tenant config with small segments: 4 MiB segments from 5 MiB up
pub fn config() -> StoreConfig {
    StoreConfig::new()
        .with_reference(reference())
        .with_large_objects(5 * MIB, 4 * MIB)
}

pub fn store(config: StoreConfig) -> (ImageStore, MemoryObjectStore, Arc<MemoryIdentityService>) {
    let backend = MemoryObjectStore::new().with_container("glance");
    let identity = identity();
    let store = ImageStore::new(config, backend.clone(), identity.clone()).unwrap();
    (store, backend, identity)
}

/// Context of `alice`, authenticated the way a front-end would have done it
pub fn caller_ctx(identity: &MemoryIdentityService) -> StoreCtx {
    let token = identity.issue_user_token("alice").unwrap();
    StoreCtx::for_user(token.user_id, "demo".to_string(), token.token).with_catalog(caller_catalog())
}

pub fn image(len: u64) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

/// Stream `data` in chunks of `chunk` bytes
pub fn byte_stream(data: &Bytes, chunk: usize) -> ByteStream {
    let items: Vec<io::Result<Bytes>> = data
        .chunks(chunk)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(futures::stream::iter(items))
}

/// Stream that fails after `data`
pub fn failing_stream(data: &Bytes) -> ByteStream {
    let items: Vec<io::Result<Bytes>> = vec![
        Ok(data.clone()),
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client went away")),
    ];
    Box::pin(futures::stream::iter(items))
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
