// Identity session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::core::{AuthRef, IdentityService};
use crate::error::{IdentityError, IdentityResult};
use crate::options::AuthMethod;

/// One identity bound to one authentication method.
///
/// The token is requested lazily on first use and kept until it is refreshed
/// or the session is dropped.
pub struct Session {
    identity: Arc<dyn IdentityService>,
    method: AuthMethod,
    auth_ref: Option<AuthRef>,
}

impl Session {
    pub fn new(identity: Arc<dyn IdentityService>, method: AuthMethod) -> Self {
        Self {
            identity,
            method,
            auth_ref: None,
        }
    }

    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    pub fn identity(&self) -> &Arc<dyn IdentityService> {
        &self.identity
    }

    /// Token currently held, without contacting the identity service
    pub fn cached(&self) -> Option<&AuthRef> {
        self.auth_ref.as_ref()
    }

    /// Trust the current token was issued through, if any
    pub fn trust_id(&self) -> Option<&str> {
        match &self.method {
            AuthMethod::Trust { trust_id, .. } => Some(trust_id.as_str()),
            _ => self.auth_ref.as_ref().and_then(|r| r.trust_id.as_deref()),
        }
    }

    /// Current token, authenticating first if none is held
    pub async fn auth_ref(&mut self) -> IdentityResult<&AuthRef> {
        if self.auth_ref.is_none() {
            let auth_ref = self.identity.authenticate(&self.method).await?;
            debug!(user_id = %auth_ref.user_id, expires_at = %auth_ref.expires_at, "session authenticated");
            self.auth_ref = Some(auth_ref);
        }
        self.auth_ref
            .as_ref()
            .ok_or_else(|| IdentityError::service("session holds no token"))
    }

    /// Discard the held token and request a new one
    pub async fn reauthenticate(&mut self) -> IdentityResult<&AuthRef> {
        self.auth_ref = None;
        self.auth_ref().await
    }

    pub async fn token(&mut self) -> IdentityResult<String> {
        Ok(self.auth_ref().await?.token.clone())
    }

    pub async fn user_id(&mut self) -> IdentityResult<String> {
        Ok(self.auth_ref().await?.user_id.clone())
    }

    /// Request a new token when the held one has less than `margin` left.
    /// Returns whether a new token was issued.
    pub async fn refresh_if_expiring(&mut self, margin: Duration) -> IdentityResult<bool> {
        let expiring = self.auth_ref().await?.will_expire_soon(margin);
        if !expiring {
            return Ok(false);
        }
        if !self.method.can_reauthenticate() {
            debug!("token expires soon but was supplied by the caller; not refreshing");
            return Ok(false);
        }

        info!("Requesting new token");
        let auth_ref = self.reauthenticate().await?;
        info!(expires_at = %auth_ref.expires_at, "Token has been successfully requested");
        Ok(true)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("auth_url", &self.method.auth_url())
            .field("authenticated", &self.auth_ref.is_some())
            .finish()
    }
}
