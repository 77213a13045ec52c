use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::{ByteStream, StoreLocation, StoreResult};

/// Receipt returned after successfully storing an image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReceipt {
    /// Location URI, free of credentials
    pub uri: String,
    pub location: StoreLocation,
    /// Declared size for segmented images of known size, otherwise the
    /// bytes read from the source
    pub size_bytes: u64,
    /// MD5 hex digest of the image content
    pub checksum: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ImageReceipt {
    pub fn new(location: StoreLocation, size_bytes: u64, checksum: String) -> Self {
        Self {
            uri: location.uri(),
            location,
            size_bytes,
            checksum,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Result of opening an image for reading
pub struct OpenedImage {
    pub stream: ByteStream,
    /// Size announced by the store; 0 when unknown
    pub size_bytes: u64,
}

impl OpenedImage {
    /// Collect the whole image. A download cut short yields fewer bytes than
    /// `size_bytes`.
    pub async fn read_to_end(mut self) -> StoreResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size_bytes.min(64 * 1024 * 1024) as usize);
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for OpenedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedImage")
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}
