use tracing::{debug, error};

use crate::connection::ConnectionManager;
use crate::upload::{ChunkReader, ImageSource, UploadChecksum};
use crate::{
    ConnectionError, ObjectHeaders, StoreError, StoreLocation, StoreResult, DELETE_MANIFEST_QUERY,
    EMPTY_ETAG, OBJECT_MANIFEST_HEADER,
};

/// Map a failed write onto the store's error kinds
fn add_error(error: ConnectionError) -> StoreError {
    match error {
        e if e.is_conflict() => StoreError::duplicate("Swift already has an image at this location"),
        ConnectionError::Io(source) => StoreError::Io { source },
        e => StoreError::backend(format!(
            "Failed to add object to Swift.\nGot error from Swift: {}.",
            e
        )),
    }
}

/// Write the whole image as one object of `image_size` bytes.
/// Returns the bytes read from the source.
pub(crate) async fn write_single(
    manager: &mut ConnectionManager,
    location: &StoreLocation,
    source: &mut ImageSource,
    checksum: &mut UploadChecksum<'_>,
    image_size: u64,
) -> StoreResult<u64> {
    let connection = manager.get_connection().await?;
    let mut reader = ChunkReader::new(source, checksum, image_size).await?;
    let etag = connection
        .put_object(
            &location.container,
            &location.obj,
            Some(&mut reader),
            Some(image_size),
            &ObjectHeaders::new(),
        )
        .await
        .map_err(add_error)?;
    debug!(object = %location.obj, etag = %etag, "Wrote image to Swift");
    Ok(reader.bytes_read())
}

/// Write the image as numbered segments followed by a manifest.
///
/// `image_size` of 0 means the size is unknown and the image is read until
/// the source runs dry. Segments already written are deleted when a later
/// one fails, and no manifest is written then. Returns the image size.
pub(crate) async fn write_segments(
    manager: &mut ConnectionManager,
    location: &StoreLocation,
    source: &mut ImageSource,
    checksum: &mut UploadChecksum<'_>,
    image_size: u64,
    chunk_size: u64,
) -> StoreResult<u64> {
    let total_chunks = if image_size > 0 {
        image_size.div_ceil(chunk_size).to_string()
    } else {
        debug!("Cannot determine image size. Adding as a segmented object to Swift.");
        "?".to_string()
    };

    let mut written: Vec<String> = Vec::new();
    let mut combined: u64 = 0;
    let mut chunk_id: u32 = 1;

    loop {
        let (budget, content_length) = if image_size == 0 {
            (chunk_size, None)
        } else {
            let left = image_size - combined;
            if left == 0 {
                break;
            }
            let budget = chunk_size.min(left);
            (budget, Some(budget))
        };

        let chunk_name = location.segment_name(chunk_id);
        let result = write_chunk(
            manager,
            location,
            source,
            checksum,
            &chunk_name,
            budget,
            content_length,
        )
        .await;

        match result {
            Ok(None) => {
                debug!("Not writing zero-length chunk.");
                break;
            }
            Ok(Some((etag, bytes_read))) => {
                written.push(chunk_name.clone());
                debug!(
                    "Wrote chunk {} ({}/{}) of length {} to Swift returning MD5 of content: {}",
                    chunk_name, chunk_id, total_chunks, bytes_read, etag
                );
                chunk_id += 1;
                combined += bytes_read;
            }
            Err(e) => {
                error!(error = %e, "Error during chunked upload to backend, deleting stale chunks");
                delete_stale_chunks(manager, &location.container, &written).await;
                return Err(e);
            }
        }
    }

    let image_size = if image_size == 0 { combined } else { image_size };

    let headers = ObjectHeaders::new()
        .with("ETag", EMPTY_ETAG)
        .with(OBJECT_MANIFEST_HEADER, location.manifest_prefix());
    let manifest = match manager.get_connection().await {
        Ok(connection) => connection
            .put_object(&location.container, &location.obj, None, Some(0), &headers)
            .await
            .map_err(add_error),
        Err(e) => Err(e),
    };
    if let Err(e) = manifest {
        if !matches!(e, StoreError::Duplicate { .. }) {
            error!(error = %e, "Failed to write object manifest, deleting chunks");
            delete_stale_chunks(manager, &location.container, &written).await;
        }
        return Err(e);
    }

    Ok(image_size)
}

/// Write one segment. `None` when the source had nothing left for it.
async fn write_chunk(
    manager: &mut ConnectionManager,
    location: &StoreLocation,
    source: &mut ImageSource,
    checksum: &mut UploadChecksum<'_>,
    chunk_name: &str,
    budget: u64,
    content_length: Option<u64>,
) -> StoreResult<Option<(String, u64)>> {
    let mut reader = ChunkReader::new(source, checksum, budget).await?;
    if reader.is_empty() {
        return Ok(None);
    }
    let connection = manager.get_connection().await?;
    let etag = connection
        .put_object(
            &location.container,
            chunk_name,
            Some(&mut reader),
            content_length,
            &ObjectHeaders::new(),
        )
        .await
        .map_err(add_error)?;
    Ok(Some((etag, reader.bytes_read())))
}

/// Best-effort removal of segments left behind by a failed upload
pub(crate) async fn delete_stale_chunks(
    manager: &mut ConnectionManager,
    container: &str,
    chunks: &[String],
) {
    if chunks.is_empty() {
        return;
    }
    let connection = match manager.get_connection().await {
        Ok(connection) => connection,
        Err(e) => {
            error!(error = %e, "No connection to delete orphaned chunks");
            return;
        }
    };
    for chunk in chunks {
        debug!("Deleting chunk {}", chunk);
        if let Err(e) = connection.delete_object(container, chunk, None).await {
            error!(error = %e, "Failed to delete orphaned chunk {}/{}", container, chunk);
        }
    }
}

/// Delete an image together with any segments its manifest points at
pub(crate) async fn delete_object(
    manager: &mut ConnectionManager,
    location: &StoreLocation,
) -> StoreResult<()> {
    let connection = manager.get_connection().await?;

    let headers = match connection
        .head_object(&location.container, &location.obj)
        .await
    {
        Ok(headers) => Some(headers),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(delete_error(e)),
    };

    if headers.as_ref().map_or(false, |h| h.is_static_large_object()) {
        return connection
            .delete_object(&location.container, &location.obj, Some(DELETE_MANIFEST_QUERY))
            .await
            .map_err(delete_error);
    }

    if let Some(manifest) = headers.as_ref().and_then(|h| h.object_manifest()) {
        let (segment_container, prefix) = manifest.split_once('/').ok_or_else(|| {
            StoreError::backend(format!("Malformed object manifest '{}'", manifest))
        })?;
        let segments = connection
            .list_objects(segment_container, Some(prefix))
            .await
            .map_err(delete_error)?;
        for segment in segments {
            if let Err(e) = connection
                .delete_object(segment_container, &segment.name, None)
                .await
            {
                error!(error = %e, "Unable to delete segment {}", segment.name);
            }
        }
    }

    connection
        .delete_object(&location.container, &location.obj, None)
        .await
        .map_err(delete_error)
}

pub(crate) fn delete_error(error: ConnectionError) -> StoreError {
    if error.is_not_found() {
        StoreError::not_found("Swift could not find image at URI.")
    } else {
        error.into()
    }
}
