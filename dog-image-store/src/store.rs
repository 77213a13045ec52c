use std::sync::Arc;

use async_trait::async_trait;

use crate::upload::ObjectReader;
use crate::{ByteStream, ConnectionResult, ObjectHeaders, ObjectListing};

/// Opens connections to an object store - implemented by every backend
pub trait ObjectTransport: Send + Sync {
    /// Connection to the account at `storage_url`, authorized by `token`
    fn connect(&self, storage_url: &str, token: &str) -> Arc<dyn ObjectConnection>;
}

/// Object-store primitives used by the image store
#[async_trait]
pub trait ObjectConnection: Send + Sync {
    /// Container metadata; a missing container is an HTTP 404
    async fn head_container(&self, container: &str) -> ConnectionResult<ObjectHeaders>;

    async fn put_container(&self, container: &str) -> ConnectionResult<()>;

    async fn delete_container(&self, container: &str) -> ConnectionResult<()>;

    /// Object metadata without content
    async fn head_object(&self, container: &str, name: &str) -> ConnectionResult<ObjectHeaders>;

    /// Object content, starting at `offset` when given
    async fn get_object(
        &self,
        container: &str,
        name: &str,
        offset: Option<u64>,
    ) -> ConnectionResult<ObjectResponse>;

    /// Write an object from `body` (empty when `None`) and return its ETag.
    ///
    /// `content_length` is sent when known; otherwise the body is streamed
    /// until the reader returns an empty chunk.
    async fn put_object(
        &self,
        container: &str,
        name: &str,
        body: Option<&mut dyn ObjectReader>,
        content_length: Option<u64>,
        headers: &ObjectHeaders,
    ) -> ConnectionResult<String>;

    /// Delete an object, with an optional raw query string
    async fn delete_object(
        &self,
        container: &str,
        name: &str,
        query: Option<&str>,
    ) -> ConnectionResult<()>;

    /// Every object in `container` whose name starts with `prefix`
    async fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> ConnectionResult<Vec<ObjectListing>>;

    /// Release resources held by this connection
    async fn close(&self) {}
}

/// Result of a get operation
pub struct ObjectResponse {
    pub headers: ObjectHeaders,
    pub body: ByteStream,
}

impl std::fmt::Debug for ObjectResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectResponse")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
