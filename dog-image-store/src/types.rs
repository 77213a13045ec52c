use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use uuid::Uuid;

use dog_identity::ServiceCatalog;

/// Stream of bytes for image content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Header announcing a dynamic large object (`<container>/<prefix>`)
pub const OBJECT_MANIFEST_HEADER: &str = "x-object-manifest";

/// Header set to `true` on static large object manifests
pub const STATIC_LARGE_OBJECT_HEADER: &str = "x-static-large-object";

/// Query asking the store to delete a static manifest with its segments
pub const DELETE_MANIFEST_QUERY: &str = "multipart-manifest=delete";

/// MD5 of the empty string, the ETag of a zero-byte manifest
pub const EMPTY_ETAG: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Caller context (user, project, token, request info).
///
/// Multi-tenant stores act on behalf of this caller; single-tenant stores
/// only use it for logging.
#[derive(Debug, Clone, Default)]
pub struct StoreCtx {
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub auth_token: Option<String>,
    pub service_catalog: ServiceCatalog,
    pub request_id: String,
}

impl StoreCtx {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            ..Self::default()
        }
    }

    /// Context for a caller authenticated with `auth_token`
    pub fn for_user<S: Into<String>>(user_id: S, project_id: S, auth_token: S) -> Self {
        Self::new()
            .with_user(user_id)
            .with_project(project_id)
            .with_token(auth_token)
    }

    pub fn with_user<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_project<S: Into<String>>(mut self, project_id: S) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_token<S: Into<String>>(mut self, auth_token: S) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    pub fn with_catalog(mut self, catalog: ServiceCatalog) -> Self {
        self.service_catalog = catalog;
        self
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Object or container headers, keyed by lowercase name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeaders(BTreeMap<String, String>);

impl ObjectHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: AsRef<str>, V: Into<String>>(&mut self, name: K, value: V) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn with<K: AsRef<str>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    pub fn etag(&self) -> Option<&str> {
        self.get("etag").map(|v| v.trim_matches('"'))
    }

    /// `<container>/<prefix>` of a dynamic large object
    pub fn object_manifest(&self) -> Option<&str> {
        self.get(OBJECT_MANIFEST_HEADER).filter(|v| !v.is_empty())
    }

    pub fn is_static_large_object(&self) -> bool {
        self.get(STATIC_LARGE_OBJECT_HEADER)
            .map_or(false, |v| v.eq_ignore_ascii_case("true"))
    }
}

/// One entry of a container listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectListing {
    pub name: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub hash: Option<String>,
}
