// Identity core: tokens, catalogs, trusts and the service seam.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};
use crate::options::AuthMethod;

/// Endpoint interface published in a service catalog
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    Public,
    Internal,
    Admin,
}

impl Default for Interface {
    fn default() -> Self {
        Self::Public
    }
}

impl Interface {
    /// Accepts both `public` and the older `publicURL` spellings.
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().to_ascii_lowercase();
        let v = v.strip_suffix("url").unwrap_or(&v);
        match v {
            "public" => Some(Self::Public),
            "internal" => Some(Self::Internal),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One endpoint of one service in a catalog
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEndpoint {
    pub service_type: String,
    pub interface: Interface,
    pub region: Option<String>,
    pub url: String,
}

impl CatalogEndpoint {
    pub fn new(service_type: impl Into<String>, interface: Interface, url: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            interface,
            region: None,
            url: url.into(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Service catalog returned with a token
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceCatalog {
    pub endpoints: Vec<CatalogEndpoint>,
}

impl ServiceCatalog {
    pub fn new(endpoints: Vec<CatalogEndpoint>) -> Self {
        Self { endpoints }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Look up the URL for a service type. When `region` is given only
    /// endpoints in that region match.
    pub fn url_for(
        &self,
        service_type: &str,
        interface: Interface,
        region: Option<&str>,
    ) -> IdentityResult<&str> {
        self.endpoints
            .iter()
            .filter(|e| e.service_type == service_type && e.interface == interface)
            .find(|e| match region {
                Some(r) => e.region.as_deref() == Some(r),
                None => true,
            })
            .map(|e| e.url.as_str())
            .ok_or_else(|| IdentityError::EndpointNotFound {
                service_type: service_type.to_string(),
                interface: interface.to_string(),
            })
    }
}

/// A token issued by the identity service, with everything the store needs
/// to know about it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRef {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
    pub project_id: Option<String>,
    pub roles: Vec<String>,
    pub catalog: ServiceCatalog,
    /// Set when the token was issued through a trust
    pub trust_id: Option<String>,
}

impl AuthRef {
    /// True when fewer than `margin` of validity remain at `now`.
    pub fn will_expire_soon_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let deadline = chrono::Duration::from_std(margin)
            .ok()
            .and_then(|margin| now.checked_add_signed(margin));
        match deadline {
            Some(deadline) => self.expires_at <= deadline,
            None => true,
        }
    }

    pub fn will_expire_soon(&self, margin: Duration) -> bool {
        self.will_expire_soon_at(Utc::now(), margin)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Request to delegate a trustor's roles on a project to a trustee
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustRequest {
    pub trustor_user_id: String,
    pub trustee_user_id: String,
    pub project_id: String,
    pub role_names: Vec<String>,
    pub impersonation: bool,
}

/// A created trust
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trust {
    pub id: String,
    pub trustor_user_id: String,
    pub trustee_user_id: String,
    pub project_id: String,
    pub role_names: Vec<String>,
    pub impersonation: bool,
}

/// Operations consumed from the identity service. The wire protocol lives
/// behind implementations of this trait.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Exchange credentials, a token or a trust for a fresh token
    async fn authenticate(&self, method: &AuthMethod) -> IdentityResult<AuthRef>;

    /// Create a trust, authorized by the trustor's token
    async fn create_trust(&self, trustor: &AuthRef, request: &TrustRequest) -> IdentityResult<Trust>;

    /// Revoke a trust
    async fn delete_trust(&self, caller: &AuthRef, trust_id: &str) -> IdentityResult<()>;
}
