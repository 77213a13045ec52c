// In-memory identity service.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::{AuthRef, IdentityService, ServiceCatalog, Trust, TrustRequest};
use crate::error::{IdentityError, IdentityResult};
use crate::options::{AuthMethod, PasswordCredentials};

#[derive(Clone, Debug)]
struct MemoryUser {
    user_id: String,
    password: String,
    project_id: String,
    roles: Vec<String>,
}

#[derive(Default)]
struct State {
    users: HashMap<String, MemoryUser>,
    tokens: HashMap<String, AuthRef>,
    trusts: HashMap<String, Trust>,
    issued: Vec<String>,
    deleted_trusts: Vec<String>,
    authentications: usize,
    authentication_limit: Option<usize>,
    fail_trust_deletion: bool,
}

/// Identity service kept entirely in process memory.
///
/// Issues sequential tokens (`token-1`, `token-2`, …) valid for a configurable
/// lifetime, and records every call so tests can assert on them.
pub struct MemoryIdentityService {
    state: Mutex<State>,
    token_ttl: Mutex<Duration>,
    catalog: ServiceCatalog,
}

impl MemoryIdentityService {
    pub fn new(catalog: ServiceCatalog) -> Self {
        Self {
            state: Mutex::new(State::default()),
            token_ttl: Mutex::new(Duration::from_secs(3600)),
            catalog,
        }
    }

    /// Register a user with a password, a home project and its roles there
    pub fn with_user(
        self,
        username: impl Into<String>,
        password: impl Into<String>,
        project_id: impl Into<String>,
        roles: &[&str],
    ) -> Self {
        let username = username.into();
        let user = MemoryUser {
            user_id: format!("{}-id", username),
            password: password.into(),
            project_id: project_id.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        self.state.lock().users.insert(username, user);
        self
    }

    /// Lifetime of tokens issued from now on
    pub fn set_token_ttl(&self, ttl: Duration) {
        *self.token_ttl.lock() = ttl;
    }

    /// Refuse every authentication after the first `count`
    pub fn refuse_authentications_after(&self, count: usize) {
        self.state.lock().authentication_limit = Some(count);
    }

    pub fn fail_trust_deletion(&self, fail: bool) {
        self.state.lock().fail_trust_deletion = fail;
    }

    /// Issue a token for a registered user directly, as a front-end
    /// service would have done for an incoming request.
    pub fn issue_user_token(&self, username: &str) -> IdentityResult<AuthRef> {
        let mut state = self.state.lock();
        let user = state
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| IdentityError::not_found(format!("user {}", username)))?;
        Ok(self.issue(&mut state, &user.user_id, Some(user.project_id), user.roles, None))
    }

    /// Tokens issued so far, in order
    pub fn issued_tokens(&self) -> Vec<String> {
        self.state.lock().issued.clone()
    }

    pub fn authentication_count(&self) -> usize {
        self.state.lock().authentications
    }

    /// Trusts that currently exist
    pub fn active_trusts(&self) -> Vec<Trust> {
        self.state.lock().trusts.values().cloned().collect()
    }

    pub fn deleted_trusts(&self) -> Vec<String> {
        self.state.lock().deleted_trusts.clone()
    }

    fn issue(
        &self,
        state: &mut State,
        user_id: &str,
        project_id: Option<String>,
        roles: Vec<String>,
        trust_id: Option<String>,
    ) -> AuthRef {
        let ttl = chrono::Duration::from_std(*self.token_ttl.lock())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let now = Utc::now();
        let token = format!("token-{}", state.issued.len() + 1);
        let auth_ref = AuthRef {
            token: token.clone(),
            issued_at: now,
            expires_at: now + ttl,
            user_id: user_id.to_string(),
            project_id,
            roles,
            catalog: self.catalog.clone(),
            trust_id,
        };
        state.issued.push(token.clone());
        state.tokens.insert(token, auth_ref.clone());
        auth_ref
    }

    fn check_password(state: &State, credentials: &PasswordCredentials) -> IdentityResult<MemoryUser> {
        let user = state
            .users
            .get(&credentials.username)
            .ok_or_else(|| IdentityError::unauthorized("unknown user"))?;
        if user.password != credentials.password {
            return Err(IdentityError::unauthorized("invalid password"));
        }
        Ok(user.clone())
    }

    fn check_token(state: &State, token: &str) -> IdentityResult<AuthRef> {
        let auth_ref = state
            .tokens
            .get(token)
            .ok_or_else(|| IdentityError::unauthorized("unknown token"))?;
        if auth_ref.is_expired() {
            return Err(IdentityError::unauthorized("token has expired"));
        }
        Ok(auth_ref.clone())
    }
}

#[async_trait]
impl IdentityService for MemoryIdentityService {
    async fn authenticate(&self, method: &AuthMethod) -> IdentityResult<AuthRef> {
        let mut state = self.state.lock();
        state.authentications += 1;
        if state
            .authentication_limit
            .map_or(false, |limit| state.authentications > limit)
        {
            return Err(IdentityError::service("identity service unavailable"));
        }

        match method {
            AuthMethod::Password(credentials) => {
                let user = Self::check_password(&state, credentials)?;
                let project = credentials.project_name.clone().or(Some(user.project_id.clone()));
                Ok(self.issue(&mut state, &user.user_id, project, user.roles, None))
            }
            AuthMethod::Token { token, project_id, .. } => {
                let current = Self::check_token(&state, token)?;
                let project = project_id.clone().or(current.project_id.clone());
                Ok(self.issue(&mut state, &current.user_id, project, current.roles, None))
            }
            AuthMethod::Trust { credentials, trust_id } => {
                let trustee = Self::check_password(&state, credentials)?;
                let trust = state
                    .trusts
                    .get(trust_id)
                    .cloned()
                    .ok_or_else(|| IdentityError::unauthorized(format!("unknown trust {}", trust_id)))?;
                if trust.trustee_user_id != trustee.user_id {
                    return Err(IdentityError::Forbidden(
                        "trust was not granted to this user".to_string(),
                    ));
                }
                let user_id = if trust.impersonation {
                    trust.trustor_user_id.clone()
                } else {
                    trustee.user_id.clone()
                };
                Ok(self.issue(
                    &mut state,
                    &user_id,
                    Some(trust.project_id.clone()),
                    trust.role_names.clone(),
                    Some(trust.id.clone()),
                ))
            }
        }
    }

    async fn create_trust(&self, trustor: &AuthRef, request: &TrustRequest) -> IdentityResult<Trust> {
        let mut state = self.state.lock();
        let caller = Self::check_token(&state, &trustor.token)?;
        if caller.user_id != request.trustor_user_id {
            return Err(IdentityError::Forbidden(
                "a trust can only be created by its trustor".to_string(),
            ));
        }
        if let Some(missing) = request.role_names.iter().find(|r| !caller.roles.contains(r)) {
            return Err(IdentityError::Forbidden(format!(
                "trustor does not hold role {}",
                missing
            )));
        }

        let trust = Trust {
            id: format!("trust-{}", Uuid::new_v4().simple()),
            trustor_user_id: request.trustor_user_id.clone(),
            trustee_user_id: request.trustee_user_id.clone(),
            project_id: request.project_id.clone(),
            role_names: request.role_names.clone(),
            impersonation: request.impersonation,
        };
        state.trusts.insert(trust.id.clone(), trust.clone());
        Ok(trust)
    }

    async fn delete_trust(&self, caller: &AuthRef, trust_id: &str) -> IdentityResult<()> {
        let mut state = self.state.lock();
        if state.fail_trust_deletion {
            return Err(IdentityError::service("trust deletion is unavailable"));
        }
        Self::check_token(&state, &caller.token)?;
        state
            .trusts
            .remove(trust_id)
            .ok_or_else(|| IdentityError::not_found(format!("trust {}", trust_id)))?;
        state.deleted_trusts.push(trust_id.to_string());
        Ok(())
    }
}
