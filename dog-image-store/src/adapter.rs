use std::sync::Arc;

use tracing::{debug, info, instrument};

use dog_identity::IdentityService;

use crate::connection::{ConnectionManager, ManagerKind};
use crate::coordinator::{delete_error, delete_object, write_segments, write_single};
use crate::download::{fetch_object, ResumableDownload};
use crate::location::check_image_id;
use crate::store::{ObjectConnection, ObjectTransport};
use crate::upload::{ImageSource, ImageVerifier, UploadChecksum};
use crate::{
    ByteStream, ImageReceipt, OpenedImage, StoreConfig, StoreCtx, StoreError, StoreLocation,
    StoreResult,
};

/// Everything a connection manager needs from its store
pub(crate) struct StoreCore {
    pub(crate) config: StoreConfig,
    pub(crate) transport: Arc<dyn ObjectTransport>,
    pub(crate) identity: Arc<dyn IdentityService>,
}

/// The image store - what image services embed
#[derive(Clone)]
pub struct ImageStore {
    core: Arc<StoreCore>,
    tenancy: ManagerKind,
}

impl ImageStore {
    /// Create a store over `transport`, authenticating through `identity`.
    /// The configuration is validated first.
    pub fn new<T: ObjectTransport + 'static>(
        config: StoreConfig,
        transport: T,
        identity: Arc<dyn IdentityService>,
    ) -> StoreResult<Self> {
        config.validate()?;
        let tenancy = if config.multi_tenant {
            ManagerKind::MultiTenant
        } else {
            ManagerKind::SingleTenant
        };
        Ok(Self {
            core: Arc::new(StoreCore {
                config,
                transport: Arc::new(transport),
                identity,
            }),
            tenancy,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.core.config
    }

    pub fn tenancy(&self) -> ManagerKind {
        self.tenancy
    }

    /// Connection manager for one operation on `location`.
    ///
    /// Multi-tenant stores only re-authenticate through trusts, so
    /// `allow_reauth` is dropped when trusts are disabled.
    pub fn manager(
        &self,
        location: StoreLocation,
        ctx: Option<StoreCtx>,
        allow_reauth: bool,
    ) -> ConnectionManager {
        let allow_reauth = match self.tenancy {
            ManagerKind::MultiTenant if !self.core.config.use_trusts => false,
            _ => allow_reauth,
        };
        ConnectionManager::new(self.tenancy, self.core.clone(), location, ctx, allow_reauth)
    }

    /// Where a new image named `image_id` will be stored
    pub fn create_location(&self, image_id: &str, ctx: Option<&StoreCtx>) -> StoreResult<StoreLocation> {
        check_image_id(image_id)?;
        let config = &self.core.config;
        match self.tenancy {
            ManagerKind::SingleTenant => {
                let reference = config.reference.as_ref().ok_or_else(|| {
                    StoreError::bad_configuration("A value for the store credential reference is required.")
                })?;
                Ok(StoreLocation::new(
                    reference.auth_address.as_str(),
                    config.container.as_str(),
                    image_id,
                ))
            }
            ManagerKind::MultiTenant => {
                let ctx = ctx.ok_or_else(|| {
                    StoreError::bad_configuration("Multi-tenant Swift storage requires a context.")
                })?;
                let storage_url = match &config.endpoint {
                    Some(endpoint) => endpoint.clone(),
                    None => ctx
                        .service_catalog
                        .url_for(&config.service_type, config.interface()?, config.region.as_deref())
                        .map_err(|e| StoreError::bad_configuration(e.to_string()))?
                        .to_string(),
                };
                let container = format!("{}_{}", config.container, image_id);
                Ok(StoreLocation::new(storage_url, container, image_id.to_string()))
            }
        }
    }

    /// Store an image read from `stream`.
    ///
    /// `image_size` of 0 means unknown. Images of unknown size or of at least
    /// `large_object_size` bytes are written as segments plus a manifest.
    #[instrument(skip(self, stream, ctx, verifier))]
    pub async fn add(
        &self,
        image_id: &str,
        stream: ByteStream,
        image_size: u64,
        ctx: Option<&StoreCtx>,
        verifier: Option<&mut dyn ImageVerifier>,
    ) -> StoreResult<ImageReceipt> {
        let location = self.create_location(image_id, ctx)?;
        let need_chunks = image_size == 0 || image_size >= self.core.config.large_object_size;
        let mut manager = self.manager(location.clone(), ctx.cloned(), need_chunks);

        let result = self
            .write_image(&mut manager, &location, stream, image_size, need_chunks, verifier)
            .await;
        manager.release().await;
        result
    }

    async fn write_image(
        &self,
        manager: &mut ConnectionManager,
        location: &StoreLocation,
        stream: ByteStream,
        image_size: u64,
        need_chunks: bool,
        verifier: Option<&mut dyn ImageVerifier>,
    ) -> StoreResult<ImageReceipt> {
        let connection = manager.get_connection().await?;
        self.create_container_if_missing(&location.container, connection.as_ref())
            .await?;

        debug!("Adding image object '{}' to Swift", location.obj);
        let mut source = ImageSource::new(stream);
        let mut checksum = UploadChecksum::new(verifier);
        let size = if need_chunks {
            write_segments(
                manager,
                location,
                &mut source,
                &mut checksum,
                image_size,
                self.core.config.large_object_chunk_size,
            )
            .await?
        } else {
            write_single(manager, location, &mut source, &mut checksum, image_size).await?
        };

        Ok(ImageReceipt::new(location.clone(), size, checksum.hexdigest()))
    }

    async fn create_container_if_missing(
        &self,
        container: &str,
        connection: &dyn ObjectConnection,
    ) -> StoreResult<()> {
        match connection.head_container(container).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                if !self.core.config.create_container_on_put {
                    return Err(StoreError::backend(format!(
                        "The container {} does not exist in Swift. Please set the \
                         create_container_on_put option to add container to Swift automatically.",
                        container
                    )));
                }
                info!("Creating swift container {}", container);
                connection.put_container(container).await.map_err(|e| {
                    StoreError::backend(format!(
                        "Failed to add container to Swift.\nGot error from Swift: {}.",
                        e
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open an image for reading.
    ///
    /// With `retry_get_count > 0` an interrupted download resumes from the
    /// bytes already delivered.
    #[instrument(skip(self, location, ctx), fields(location = %location))]
    pub async fn get(&self, location: &StoreLocation, ctx: Option<&StoreCtx>) -> StoreResult<OpenedImage> {
        let retries = self.core.config.retry_get_count;
        let mut manager = self.manager(location.clone(), ctx.cloned(), retries > 0);

        let response = match fetch_object(&mut manager, location, None).await {
            Ok(response) => response,
            Err(e) => {
                manager.release().await;
                return Err(e);
            }
        };
        let size_bytes = response.headers.content_length().unwrap_or(0);
        let download = ResumableDownload::new(response.body, size_bytes, retries, manager);

        Ok(OpenedImage {
            stream: download.into_stream(),
            size_bytes,
        })
    }

    /// Size of the stored image in bytes
    #[instrument(skip(self, location, ctx), fields(location = %location))]
    pub async fn get_size(&self, location: &StoreLocation, ctx: Option<&StoreCtx>) -> StoreResult<u64> {
        let mut manager = self.manager(location.clone(), ctx.cloned(), false);
        let result = async {
            let connection = manager.get_connection().await?;
            let headers = connection
                .head_object(&location.container, &location.obj)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        StoreError::not_found(format!("Swift could not find object {}.", location.obj))
                    } else {
                        e.into()
                    }
                })?;
            Ok::<_, StoreError>(headers.content_length().unwrap_or(0))
        }
        .await;
        manager.release().await;
        result
    }

    /// Delete an image and all of its segments. Multi-tenant stores also
    /// remove the image's container.
    #[instrument(skip(self, location, ctx), fields(location = %location))]
    pub async fn delete(&self, location: &StoreLocation, ctx: Option<&StoreCtx>) -> StoreResult<()> {
        let mut manager = self.manager(location.clone(), ctx.cloned(), false);
        let mut result = delete_object(&mut manager, location).await;

        if result.is_ok() && self.tenancy == ManagerKind::MultiTenant {
            result = match manager.get_connection().await {
                Ok(connection) => connection
                    .delete_container(&location.container)
                    .await
                    .map_err(delete_error),
                Err(e) => Err(e),
            };
        }
        manager.release().await;
        result
    }
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore")
            .field("tenancy", &self.tenancy)
            .field("container", &self.core.config.container)
            .finish()
    }
}
