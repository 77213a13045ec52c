use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{error, info, warn};

use crate::connection::ConnectionManager;
use crate::store::ObjectResponse;
use crate::{ByteStream, StoreError, StoreLocation, StoreResult};

/// Fetch an object, optionally from `offset` onwards
pub(crate) async fn fetch_object(
    manager: &mut ConnectionManager,
    location: &StoreLocation,
    offset: Option<u64>,
) -> StoreResult<ObjectResponse> {
    let connection = manager.get_connection().await?;
    match connection
        .get_object(&location.container, &location.obj, offset)
        .await
    {
        Ok(response) => Ok(response),
        Err(e) if e.is_not_found() => {
            let message = format!("Swift could not find object {}.", location.obj);
            warn!("{}", message);
            Err(StoreError::not_found(message))
        }
        Err(e) => Err(e.into()),
    }
}

/// Image download that resumes with a ranged request when the stream breaks.
///
/// Runs out silently when the retry budget is spent: the caller sees fewer
/// bytes than announced. The connection manager is released once the
/// download ends.
pub struct ResumableDownload {
    stream: Option<ByteStream>,
    location: StoreLocation,
    manager: Option<ConnectionManager>,
    expected: u64,
    delivered: u64,
    retries: u32,
    max_retries: u32,
}

impl ResumableDownload {
    pub fn new(
        stream: ByteStream,
        expected: u64,
        max_retries: u32,
        manager: ConnectionManager,
    ) -> Self {
        let location = manager.location().clone();
        Self {
            stream: Some(stream),
            location,
            manager: Some(manager),
            expected,
            delivered: 0,
            retries: 0,
            max_retries,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Next chunk of the image, or `None` once the download is over
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            if let Some(stream) = self.stream.as_mut() {
                match stream.next().await {
                    Some(Ok(chunk)) if chunk.is_empty() => continue,
                    Some(Ok(chunk)) => {
                        self.delivered += chunk.len() as u64;
                        return Some(chunk);
                    }
                    Some(Err(e)) => warn!(error = %e, "Swift exception raised"),
                    None => {}
                }
            }
            self.stream = None;

            if !self.resume().await {
                self.finish().await;
                return None;
            }
        }
    }

    /// Open a continuation stream at the delivered offset. Returns false
    /// when the download is over.
    async fn resume(&mut self) -> bool {
        if self.expected == 0 || self.delivered >= self.expected {
            return false;
        }
        if self.retries >= self.max_retries {
            error!("Stopping Swift retries after {} attempts", self.retries);
            return false;
        }
        let Some(manager) = self.manager.as_mut() else {
            return false;
        };

        self.retries += 1;
        info!(
            "Retrying Swift connection ({}/{}) with range={}-{}",
            self.retries, self.max_retries, self.delivered, self.expected
        );
        match fetch_object(manager, &self.location, Some(self.delivered)).await {
            Ok(response) => {
                self.stream = Some(response.body);
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to resume Swift download");
                false
            }
        }
    }

    async fn finish(&mut self) {
        if let Some(mut manager) = self.manager.take() {
            manager.release().await;
        }
    }

    /// Consume into a byte stream
    pub fn into_stream(mut self) -> ByteStream {
        Box::pin(async_stream::stream! {
            while let Some(chunk) = self.next_chunk().await {
                yield Ok::<_, std::io::Error>(chunk);
            }
        })
    }
}

impl std::fmt::Debug for ResumableDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableDownload")
            .field("location", &self.location)
            .field("expected", &self.expected)
            .field("delivered", &self.delivered)
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
