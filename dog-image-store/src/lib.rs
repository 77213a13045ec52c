//! # dog-image-store: Segmented image storage for DogRS services
//!
//! `dog-image-store` stores large images in object stores that cap the size
//! of a single object (OpenStack Swift and compatibles). Big or unsized images
//! are split into numbered segments behind a manifest, downloads resume where
//! they broke off, and every operation runs on a connection whose token is
//! refreshed before it expires.
//!
//! ## Key Features
//!
//! - **Segmented uploads**: images at or above `large_object_size` (or of unknown size) are written as `<id>-00001`, `<id>-00002`, ... plus a manifest
//! - **Orphan cleanup**: a failed segment write deletes the segments already written
//! - **Resumable downloads**: interrupted reads continue with a ranged request, up to `retry_get_count` times
//! - **Proactive token refresh**: connections are rebuilt around a fresh token before the old one expires
//! - **Multi-tenant storage**: images live in the caller's account, reached through a trust that is revoked afterwards
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dog_identity::IdentityService;
//! use dog_image_store::prelude::*;
//!
//! # async fn example(identity: Arc<dyn IdentityService>) -> StoreResult<()> {
//! // 1. Configure the store with the service credentials
//! let config = StoreConfig::new()
//!     .with_reference(SwiftReference::new("https://identity.example/v3/", "services:glance", "secret"))
//!     .with_large_objects(5 * 1024 * 1024, 4 * 1024 * 1024)
//!     .create_container_on_put();
//! let store = ImageStore::new(config, HttpTransport::new(), identity)?;
//!
//! // 2. Add an image: 10 MiB becomes three segments and a manifest
//! let data = bytes::Bytes::from(vec![0u8; 10 * 1024 * 1024]);
//! let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(data) });
//! let receipt = store.add("img-1", Box::pin(stream), 10 * 1024 * 1024, None, None).await?;
//!
//! // 3. Read it back
//! let image = store.get(&receipt.location, None).await?.read_to_end().await?;
//! assert_eq!(image.len(), 10 * 1024 * 1024);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │     ImageStore      │  ← add / get / get_size / delete
//! ├─────────────────────┤
//! │  ConnectionManager  │  ← one per operation: tokens, trusts
//! ├─────────────────────┤
//! │  ObjectConnection   │  ← object-store primitives (HTTP, memory)
//! └─────────────────────┘
//! ```

pub mod adapter;
mod config;
pub mod connection;
mod coordinator;
mod download;
mod error;
pub mod http;
mod location;
pub mod memory;
mod receipt;
pub mod store;
mod types;
pub mod upload;

// Re-export main types for clean API
pub use adapter::ImageStore;
pub use config::{StoreConfig, SwiftReference};
pub use connection::{ConnectionManager, ManagerKind};
pub use download::ResumableDownload;
pub use error::{ConnectionError, ConnectionResult, StoreError, StoreResult};
pub use http::HttpTransport;
pub use location::StoreLocation;
pub use memory::MemoryObjectStore;
pub use receipt::{ImageReceipt, OpenedImage};
pub use store::{ObjectConnection, ObjectResponse, ObjectTransport};
pub use types::{
    ByteStream, ObjectHeaders, ObjectListing, StoreCtx, DELETE_MANIFEST_QUERY, EMPTY_ETAG,
    OBJECT_MANIFEST_HEADER, STATIC_LARGE_OBJECT_HEADER,
};
pub use upload::{ChunkReader, ImageSource, ImageVerifier, ObjectReader, UploadChecksum};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ByteStream, HttpTransport, ImageReceipt, ImageStore, OpenedImage, StoreConfig, StoreCtx,
        StoreError, StoreLocation, StoreResult, SwiftReference,
    };
}
