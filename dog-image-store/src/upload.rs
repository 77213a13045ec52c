use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::ByteStream;

/// Pull-based request body
#[async_trait]
pub trait ObjectReader: Send {
    /// Up to `max` bytes; an empty chunk means the body is complete
    async fn read(&mut self, max: usize) -> io::Result<Bytes>;
}

/// Secondary consumer of every byte written for an image
pub trait ImageVerifier: Send {
    fn update(&mut self, data: &[u8]);
}

impl ImageVerifier for md5::Context {
    fn update(&mut self, data: &[u8]) {
        self.consume(data);
    }
}

/// The caller's image stream.
///
/// Bytes pulled from the stream but not yet handed out stay buffered, so a
/// segment boundary falling inside a stream chunk loses nothing.
pub struct ImageSource {
    stream: ByteStream,
    pending: Bytes,
    finished: bool,
}

impl ImageSource {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
            finished: false,
        }
    }

    /// Make sure buffered bytes are available. Returns false at end of stream.
    pub(crate) async fn fill(&mut self) -> io::Result<bool> {
        while self.pending.is_empty() && !self.finished {
            match self.stream.next().await {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Err(e),
                None => self.finished = true,
            }
        }
        Ok(!self.pending.is_empty())
    }

    fn take(&mut self, max: usize) -> Bytes {
        let len = max.min(self.pending.len());
        self.pending.split_to(len)
    }
}

/// Running MD5 of everything read for one image, forwarded to an optional
/// verifier
pub struct UploadChecksum<'v> {
    md5: md5::Context,
    verifier: Option<&'v mut dyn ImageVerifier>,
}

impl<'v> UploadChecksum<'v> {
    pub fn new(verifier: Option<&'v mut dyn ImageVerifier>) -> Self {
        Self {
            md5: md5::Context::new(),
            verifier,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.consume(data);
        if let Some(verifier) = self.verifier.as_mut() {
            verifier.update(data);
        }
    }

    /// Hex digest of the bytes seen so far
    pub fn hexdigest(&self) -> String {
        format!("{:x}", self.md5.clone().compute())
    }
}

/// Reads at most `total` bytes of the image source.
///
/// Construction probes the source so an exhausted source is detected before
/// anything is sent. The probed bytes are replayed by the first `read`.
pub struct ChunkReader<'a, 'v> {
    source: &'a mut ImageSource,
    checksum: &'a mut UploadChecksum<'v>,
    total: u64,
    bytes_read: u64,
    is_empty: bool,
}

impl<'a, 'v> ChunkReader<'a, 'v> {
    pub async fn new(
        source: &'a mut ImageSource,
        checksum: &'a mut UploadChecksum<'v>,
        total: u64,
    ) -> io::Result<ChunkReader<'a, 'v>> {
        let is_empty = total == 0 || !source.fill().await?;
        Ok(Self {
            source,
            checksum,
            total,
            bytes_read: 0,
            is_empty,
        })
    }

    /// True when the source had nothing left at construction
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

#[async_trait]
impl ObjectReader for ChunkReader<'_, '_> {
    async fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let remaining = self.total - self.bytes_read;
        let max = (max as u64).min(remaining) as usize;
        if max == 0 || !self.source.fill().await? {
            return Ok(Bytes::new());
        }

        let chunk = self.source.take(max);
        self.checksum.update(&chunk);
        self.bytes_read += chunk.len() as u64;
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn source(chunks: Vec<&'static [u8]>) -> ImageSource {
        let items: Vec<io::Result<Bytes>> =
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect();
        ImageSource::new(Box::pin(stream::iter(items)))
    }

    #[tokio::test]
    async fn empty_source_is_detected_up_front() {
        let mut src = source(vec![]);
        let mut checksum = UploadChecksum::new(None);
        let reader = ChunkReader::new(&mut src, &mut checksum, 10).await.unwrap();
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn empty_stream_chunks_do_not_count_as_data() {
        let mut src = source(vec![b"", b"", b"x"]);
        let mut checksum = UploadChecksum::new(None);
        let reader = ChunkReader::new(&mut src, &mut checksum, 10).await.unwrap();
        assert!(!reader.is_empty());
    }

    #[tokio::test]
    async fn budget_is_enforced_and_rest_is_kept_for_next_reader() {
        let mut src = source(vec![b"abcdef", b"gh"]);
        let mut checksum = UploadChecksum::new(None);

        let mut first = ChunkReader::new(&mut src, &mut checksum, 4).await.unwrap();
        assert_eq!(first.read(100).await.unwrap(), Bytes::from_static(b"abcd"));
        assert!(first.read(100).await.unwrap().is_empty());
        assert_eq!(first.bytes_read(), 4);

        let mut second = ChunkReader::new(&mut src, &mut checksum, 4).await.unwrap();
        assert_eq!(second.read(1).await.unwrap(), Bytes::from_static(b"e"));
        assert_eq!(second.read(100).await.unwrap(), Bytes::from_static(b"f"));
        assert_eq!(second.read(100).await.unwrap(), Bytes::from_static(b"gh"));
        assert_eq!(second.bytes_read(), 4);

        let third = ChunkReader::new(&mut src, &mut checksum, 4).await.unwrap();
        assert!(third.is_empty());
        assert_eq!(checksum.hexdigest(), format!("{:x}", md5::compute(b"abcdefgh")));
    }

    #[tokio::test]
    async fn verifier_sees_exactly_the_returned_bytes() {
        let mut src = source(vec![b"hello world"]);
        let mut verifier = md5::Context::new();
        {
            let mut checksum = UploadChecksum::new(Some(&mut verifier));
            let mut reader = ChunkReader::new(&mut src, &mut checksum, 5).await.unwrap();
            while !reader.read(2).await.unwrap().is_empty() {}
        }
        assert_eq!(format!("{:x}", verifier.compute()), format!("{:x}", md5::compute(b"hello")));
    }

    #[tokio::test]
    async fn source_errors_propagate_unchanged() {
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "gone")),
        ];
        let mut src = ImageSource::new(Box::pin(stream::iter(items)));
        let mut checksum = UploadChecksum::new(None);
        let mut reader = ChunkReader::new(&mut src, &mut checksum, 10).await.unwrap();
        assert_eq!(reader.read(10).await.unwrap().len(), 2);
        let err = reader.read(10).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
