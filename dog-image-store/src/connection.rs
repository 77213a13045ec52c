use std::sync::Arc;

use tracing::{debug, error, info, warn};

use dog_identity::{AuthMethod, AuthRef, IdentityService, Session, TrustRequest};

use crate::adapter::StoreCore;
use crate::store::ObjectConnection;
use crate::{StoreCtx, StoreError, StoreLocation, StoreResult};

/// Which account the manager's connections act in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    /// The service's own account, with the configured credentials
    SingleTenant,
    /// The caller's account, through the caller's token or a trust
    MultiTenant,
}

/// A trust created for one operation, revoked when the manager is released
struct TrustGrant {
    trust_id: String,
    trustor: AuthRef,
}

/// Owns the connection used by one store operation.
///
/// Connections handed out by [`ConnectionManager::get_connection`] carry a
/// token that is valid for at least the store's `expire_soon_interval` when
/// re-authentication is allowed. Call [`ConnectionManager::release`] when the
/// operation is over.
pub struct ConnectionManager {
    kind: ManagerKind,
    core: Arc<StoreCore>,
    location: StoreLocation,
    ctx: Option<StoreCtx>,
    allow_reauth: bool,
    client: Option<Session>,
    storage_url: Option<String>,
    connection: Option<Arc<dyn ObjectConnection>>,
    trust: Option<TrustGrant>,
    released: bool,
}

impl ConnectionManager {
    pub(crate) fn new(
        kind: ManagerKind,
        core: Arc<StoreCore>,
        location: StoreLocation,
        ctx: Option<StoreCtx>,
        allow_reauth: bool,
    ) -> Self {
        Self {
            kind,
            core,
            location,
            ctx,
            allow_reauth,
            client: None,
            storage_url: None,
            connection: None,
            trust: None,
            released: false,
        }
    }

    pub fn kind(&self) -> ManagerKind {
        self.kind
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn allow_reauth(&self) -> bool {
        self.allow_reauth
    }

    /// Trust backing this manager's session, if one was created
    pub fn trust_id(&self) -> Option<&str> {
        self.trust.as_ref().map(|t| t.trust_id.as_str())
    }

    /// A connection whose token is not about to expire
    pub async fn get_connection(&mut self) -> StoreResult<Arc<dyn ObjectConnection>> {
        if self.released {
            return Err(StoreError::backend("Connection manager has been released"));
        }

        if let Some(connection) = self.connection.clone() {
            if !self.allow_reauth {
                return Ok(connection);
            }
            let margin = self.core.config.expire_soon_interval;
            let refreshed = match self.client.as_mut() {
                Some(client) => client.refresh_if_expiring(margin).await?,
                None => false,
            };
            if !refreshed {
                return Ok(connection);
            }
            connection.close().await;
            self.connection = None;
        }

        let token = self.current_token().await?;
        let storage_url = self.storage_url().await?;
        debug!(storage_url = %storage_url, "Opening object store connection");
        let connection = self.core.transport.connect(&storage_url, &token);
        self.connection = Some(connection.clone());
        Ok(connection)
    }

    /// Build the identity session for this manager's tenancy.
    ///
    /// A multi-tenant manager without re-authentication uses the caller's
    /// token as is and has no session.
    pub async fn init_client(&mut self) -> StoreResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let identity = self.core.identity.clone();
        let client = match self.kind {
            ManagerKind::SingleTenant => {
                let credentials = self.core.config.service_credentials()?;
                Session::new(identity, AuthMethod::Password(credentials))
            }
            ManagerKind::MultiTenant if self.allow_reauth => self.trust_session(identity).await?,
            ManagerKind::MultiTenant => return Ok(()),
        };
        self.client = Some(client);
        Ok(())
    }

    /// Close the connection and revoke any trust created for this manager
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        if let Some(grant) = self.trust.take() {
            revoke_trust(self.core.identity.clone(), grant).await;
        }
    }

    async fn current_token(&mut self) -> StoreResult<String> {
        self.init_client().await?;
        match self.client.as_mut() {
            Some(client) => Ok(client.token().await?),
            None => self.caller_token().map(str::to_string),
        }
    }

    async fn storage_url(&mut self) -> StoreResult<String> {
        if let Some(url) = &self.storage_url {
            return Ok(url.clone());
        }
        let url = match self.kind {
            ManagerKind::MultiTenant => self.location.service_url.clone(),
            ManagerKind::SingleTenant => match &self.core.config.endpoint {
                Some(endpoint) => endpoint.clone(),
                None => {
                    let config = &self.core.config;
                    let interface = config.interface()?;
                    let client = self.client.as_mut().ok_or_else(|| {
                        StoreError::backend("Identity session was not initialized")
                    })?;
                    client
                        .auth_ref()
                        .await?
                        .catalog
                        .url_for(&config.service_type, interface, config.region.as_deref())?
                        .to_string()
                }
            },
        };
        self.storage_url = Some(url.clone());
        Ok(url)
    }

    fn context(&self) -> StoreResult<&StoreCtx> {
        self.ctx.as_ref().ok_or_else(|| {
            StoreError::bad_configuration("Multi-tenant Swift storage requires a context.")
        })
    }

    fn caller_token(&self) -> StoreResult<&str> {
        self.context()?
            .auth_token
            .as_deref()
            .ok_or_else(|| StoreError::bad_configuration("Request context carries no auth token."))
    }

    /// Delegate the caller's roles to the service user and return a session
    /// scoped by that trust
    async fn trust_session(&mut self, identity: Arc<dyn IdentityService>) -> StoreResult<Session> {
        let credentials = self.core.config.service_credentials()?;
        let ctx = self.context()?;
        let (user_id, project_id) = match (&ctx.user_id, &ctx.project_id) {
            (Some(user), Some(project)) => (user.clone(), project.clone()),
            _ => {
                return Err(StoreError::bad_configuration(
                    "Request context must name a user and a project to create a trust.",
                ))
            }
        };
        let caller_token = self.caller_token()?.to_string();

        let mut trustor = Session::new(
            identity.clone(),
            AuthMethod::Token {
                auth_url: credentials.auth_url.clone(),
                token: caller_token,
                project_id: Some(project_id.clone()),
            },
        );
        let trustor_ref = trustor.auth_ref().await?.clone();

        let mut trustee = Session::new(identity.clone(), AuthMethod::Password(credentials.clone()));
        let trustee_user_id = trustee.user_id().await?;

        let request = TrustRequest {
            trustor_user_id: user_id,
            trustee_user_id,
            project_id,
            role_names: trustor_ref.roles.clone(),
            impersonation: true,
        };
        let trust = identity.create_trust(&trustor_ref, &request).await?;
        info!(trust_id = %trust.id, project_id = %trust.project_id, "Created trust for multi-tenant access");

        self.trust = Some(TrustGrant {
            trust_id: trust.id.clone(),
            trustor: trustor_ref,
        });
        Ok(Session::new(
            identity,
            AuthMethod::Trust {
                credentials: credentials.unscoped(),
                trust_id: trust.id,
            },
        ))
    }
}

async fn revoke_trust(identity: Arc<dyn IdentityService>, grant: TrustGrant) {
    match identity.delete_trust(&grant.trustor, &grant.trust_id).await {
        Ok(()) => info!(trust_id = %grant.trust_id, "Revoked trust"),
        Err(e) => error!(trust_id = %grant.trust_id, error = %e, "Failed to revoke trust"),
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let connection = self.connection.take();
        let grant = self.trust.take();
        if connection.is_none() && grant.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let identity = self.core.identity.clone();
                handle.spawn(async move {
                    if let Some(connection) = connection {
                        connection.close().await;
                    }
                    if let Some(grant) = grant {
                        revoke_trust(identity, grant).await;
                    }
                });
            }
            Err(_) => warn!(
                trust_id = ?grant.as_ref().map(|g| g.trust_id.as_str()),
                "Connection manager dropped outside a runtime; connection and trust left open"
            ),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("kind", &self.kind)
            .field("location", &self.location)
            .field("allow_reauth", &self.allow_reauth)
            .field("connected", &self.connection.is_some())
            .field("trust_id", &self.trust_id())
            .finish()
    }
}
