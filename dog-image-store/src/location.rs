use serde::{Deserialize, Serialize};

use crate::{StoreError, StoreResult};

/// Where one image lives.
///
/// `service_url` is the identity endpoint for single-tenant stores (the
/// account is chosen by the store's credentials) and the caller's storage
/// URL for multi-tenant stores. Locations never carry credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreLocation {
    pub scheme: String,
    pub service_url: String,
    pub container: String,
    pub obj: String,
}

impl StoreLocation {
    pub fn new<S: Into<String>>(service_url: S, container: S, obj: S) -> Self {
        let service_url = service_url.into();
        let scheme = if service_url.starts_with("http://") {
            "swift+http"
        } else {
            "swift+https"
        };
        Self {
            scheme: scheme.to_string(),
            service_url: service_url.trim_end_matches('/').to_string(),
            container: container.into(),
            obj: obj.into(),
        }
    }

    /// Parse `swift[+http|+https]://<host>[/<path>]/<container>/<object>`
    pub fn parse(uri: &str) -> StoreResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| StoreError::bad_location(format!("URI has no scheme: {}", uri)))?;
        let http_scheme = match scheme {
            "swift" | "swift+https" => "https",
            "swift+http" => "http",
            other => {
                return Err(StoreError::bad_location(format!(
                    "Unsupported scheme '{}'",
                    other
                )))
            }
        };
        if rest.contains('@') {
            return Err(StoreError::bad_location(
                "Credentials in location URIs are not supported",
            ));
        }

        let mut parts = rest.rsplitn(3, '/');
        let obj = parts.next().unwrap_or_default();
        let container = parts.next().unwrap_or_default();
        let netloc = parts.next().unwrap_or_default();
        if netloc.is_empty() || container.is_empty() || obj.is_empty() {
            return Err(StoreError::bad_location(format!(
                "URI must name a host, a container and an object: {}",
                uri
            )));
        }

        Ok(Self {
            scheme: if http_scheme == "http" { "swift+http" } else { "swift+https" }.to_string(),
            service_url: format!("{}://{}", http_scheme, netloc),
            container: container.to_string(),
            obj: obj.to_string(),
        })
    }

    pub fn uri(&self) -> String {
        let netloc = self
            .service_url
            .split_once("://")
            .map_or(self.service_url.as_str(), |(_, rest)| rest);
        format!("{}://{}/{}/{}", self.scheme, netloc, self.container, self.obj)
    }

    /// Name of segment `index` (1-based)
    pub fn segment_name(&self, index: u32) -> String {
        format!("{}-{:05}", self.obj, index)
    }

    /// `<container>/<object>-`, shared by every segment of this image
    pub fn manifest_prefix(&self) -> String {
        format!("{}/{}-", self.container, self.obj)
    }
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// Reject identifiers that cannot name an object
pub(crate) fn check_image_id(image_id: &str) -> StoreResult<()> {
    if image_id.is_empty() {
        return Err(StoreError::bad_location("Image identifier cannot be empty"));
    }
    if image_id.contains('/') {
        return Err(StoreError::bad_location(format!(
            "Image identifier cannot contain '/': {}",
            image_id
        )));
    }
    Ok(())
}
