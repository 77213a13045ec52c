use std::time::Duration;

use serde::{Deserialize, Serialize};

use dog_identity::{Interface, PasswordCredentials};

use crate::{StoreError, StoreResult};

const MIB: u64 = 1024 * 1024;

/// Configuration for an image store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Container holding images (single tenant), or the prefix of the
    /// per-image containers (multi tenant)
    pub container: String,

    /// Images of at least this many bytes (or of unknown size) are segmented
    pub large_object_size: u64,

    /// Size of each segment in bytes
    pub large_object_chunk_size: u64,

    /// Create the container on add when it does not exist
    pub create_container_on_put: bool,

    /// Store images in the caller's own account
    pub multi_tenant: bool,

    /// How many times an interrupted download is resumed
    pub retry_get_count: u32,

    /// Tokens with less validity than this are replaced before use
    #[serde(with = "humantime_serde")]
    pub expire_soon_interval: Duration,

    /// Multi tenant only: act on the caller's behalf through a trust
    pub use_trusts: bool,

    /// Storage URL override; otherwise taken from the service catalog
    pub endpoint: Option<String>,

    pub region: Option<String>,

    pub service_type: String,

    pub endpoint_type: String,

    /// Service credentials
    pub reference: Option<SwiftReference>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            container: "glance".to_string(),
            large_object_size: 5 * 1024 * MIB, // 5GB
            large_object_chunk_size: 200 * MIB,
            create_container_on_put: false,
            multi_tenant: false,
            retry_get_count: 0,
            expire_soon_interval: Duration::from_secs(60),
            use_trusts: true,
            endpoint: None,
            region: None,
            service_type: "object-store".to_string(),
            endpoint_type: "publicURL".to_string(),
            reference: None,
        }
    }
}

/// Credentials the store authenticates with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwiftReference {
    /// Identity service endpoint
    pub auth_address: String,
    /// `project:user`
    pub user: String,
    pub key: String,
    #[serde(default)]
    pub user_domain_id: Option<String>,
    #[serde(default)]
    pub user_domain_name: Option<String>,
    #[serde(default)]
    pub project_domain_id: Option<String>,
    #[serde(default)]
    pub project_domain_name: Option<String>,
}

impl SwiftReference {
    pub fn new<S: Into<String>>(auth_address: S, user: S, key: S) -> Self {
        Self {
            auth_address: auth_address.into(),
            user: user.into(),
            key: key.into(),
            user_domain_id: None,
            user_domain_name: None,
            project_domain_id: None,
            project_domain_name: None,
        }
    }

    /// Password credentials scoped to the reference's project
    pub fn credentials(&self) -> StoreResult<PasswordCredentials> {
        let credentials =
            PasswordCredentials::from_reference(self.auth_address.clone(), &self.user, self.key.clone())
                .map_err(|e| StoreError::bad_configuration(e.to_string()))?
                .with_user_domain_id(self.user_domain_id.clone())
                .with_user_domain_name(self.user_domain_name.clone())
                .with_project_domain_id(self.project_domain_id.clone())
                .with_project_domain_name(self.project_domain_name.clone());
        credentials
            .validate()
            .map_err(StoreError::bad_configuration)?;
        Ok(credentials)
    }
}

impl StoreConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container<S: Into<String>>(mut self, container: S) -> Self {
        self.container = container.into();
        self
    }

    /// Set segmentation threshold and segment size, both in bytes
    pub fn with_large_objects(mut self, threshold: u64, chunk_size: u64) -> Self {
        self.large_object_size = threshold;
        self.large_object_chunk_size = chunk_size;
        self
    }

    pub fn create_container_on_put(mut self) -> Self {
        self.create_container_on_put = true;
        self
    }

    pub fn multi_tenant(mut self) -> Self {
        self.multi_tenant = true;
        self
    }

    pub fn with_retry_get_count(mut self, count: u32) -> Self {
        self.retry_get_count = count;
        self
    }

    pub fn with_expire_soon_interval(mut self, interval: Duration) -> Self {
        self.expire_soon_interval = interval;
        self
    }

    pub fn without_trusts(mut self) -> Self {
        self.use_trusts = false;
        self
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_reference(mut self, reference: SwiftReference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Catalog interface selected by `endpoint_type`
    pub fn interface(&self) -> StoreResult<Interface> {
        Interface::parse(&self.endpoint_type).ok_or_else(|| {
            StoreError::bad_configuration(format!(
                "Unknown endpoint type '{}'",
                self.endpoint_type
            ))
        })
    }

    /// Service credentials, required
    pub fn service_credentials(&self) -> StoreResult<PasswordCredentials> {
        self.reference
            .as_ref()
            .ok_or_else(|| {
                StoreError::bad_configuration("A value for the store credential reference is required.")
            })?
            .credentials()
    }

    /// Check the settings a store needs before it serves requests
    pub fn validate(&self) -> StoreResult<()> {
        if self.container.is_empty() {
            return Err(StoreError::bad_configuration("Container name cannot be empty"));
        }
        if self.large_object_size == 0 {
            return Err(StoreError::bad_configuration(
                "Large object size must be greater than 0",
            ));
        }
        if self.large_object_chunk_size == 0 {
            return Err(StoreError::bad_configuration(
                "Large object chunk size must be greater than 0",
            ));
        }
        if self.service_type.is_empty() {
            return Err(StoreError::bad_configuration("Service type cannot be empty"));
        }
        self.interface()?;
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(StoreError::bad_configuration(
                    "Storage endpoint must be a valid HTTP/HTTPS URL",
                ));
            }
        }

        // Trusts and single-tenant access both authenticate as the service.
        if !self.multi_tenant || self.use_trusts {
            self.service_credentials()?;
        }
        Ok(())
    }
}
