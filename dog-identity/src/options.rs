// Credentials and authentication methods.

use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};

/// Password credentials for a service or user identity
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasswordCredentials {
    /// Identity service endpoint (e.g. "https://identity.example.com/v3/")
    pub auth_url: String,
    /// User name
    pub username: String,
    /// Password or key
    pub password: String,
    /// Project to scope the token to (omitted for trust-scoped tokens)
    pub project_name: Option<String>,
    pub user_domain_id: Option<String>,
    pub user_domain_name: Option<String>,
    pub project_domain_id: Option<String>,
    pub project_domain_name: Option<String>,
}

impl PasswordCredentials {
    /// Create unscoped credentials
    pub fn new(
        auth_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            username: username.into(),
            password: password.into(),
            project_name: None,
            user_domain_id: None,
            user_domain_name: None,
            project_domain_id: None,
            project_domain_name: None,
        }
    }

    /// Build credentials from a `project:user` reference string.
    pub fn from_reference(
        auth_url: impl Into<String>,
        reference_user: &str,
        key: impl Into<String>,
    ) -> IdentityResult<Self> {
        let (project, user) = split_project_user(reference_user)?;
        Ok(Self::new(auth_url, user, key).with_project(project))
    }

    pub fn with_project(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = Some(project_name.into());
        self
    }

    pub fn with_user_domain_id(mut self, id: Option<String>) -> Self {
        self.user_domain_id = id;
        self
    }

    pub fn with_user_domain_name(mut self, name: Option<String>) -> Self {
        self.user_domain_name = name;
        self
    }

    pub fn with_project_domain_id(mut self, id: Option<String>) -> Self {
        self.project_domain_id = id;
        self
    }

    pub fn with_project_domain_name(mut self, name: Option<String>) -> Self {
        self.project_domain_name = name;
        self
    }

    /// Same identity, without a project scope
    pub fn unscoped(&self) -> Self {
        Self {
            project_name: None,
            ..self.clone()
        }
    }

    /// Validate the credentials
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_url.is_empty() {
            return Err("Identity auth URL cannot be empty".to_string());
        }
        if !self.auth_url.starts_with("http://") && !self.auth_url.starts_with("https://") {
            return Err("Identity auth URL must be a valid HTTP/HTTPS URL".to_string());
        }
        if self.username.is_empty() {
            return Err("Identity user name cannot be empty".to_string());
        }
        if self.password.is_empty() {
            return Err("Identity password cannot be empty".to_string());
        }
        Ok(())
    }
}

/// How a session obtains its token
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuthMethod {
    /// Authenticate with a user name and password
    Password(PasswordCredentials),
    /// Rescope an existing token to a project
    Token {
        auth_url: String,
        token: String,
        project_id: Option<String>,
    },
    /// Authenticate as a trustee, scoped by a trust
    Trust {
        credentials: PasswordCredentials,
        trust_id: String,
    },
}

impl AuthMethod {
    pub fn auth_url(&self) -> &str {
        match self {
            Self::Password(credentials) => &credentials.auth_url,
            Self::Token { auth_url, .. } => auth_url,
            Self::Trust { credentials, .. } => &credentials.auth_url,
        }
    }

    /// Whether this method can mint a fresh token on its own
    pub fn can_reauthenticate(&self) -> bool {
        !matches!(self, Self::Token { .. })
    }
}

/// Split `project:user` into its two halves.
pub fn split_project_user(reference_user: &str) -> IdentityResult<(&str, &str)> {
    match reference_user.split_once(':') {
        Some((project, user)) if !project.is_empty() && !user.is_empty() && !user.contains(':') => {
            Ok((project, user))
        }
        _ => Err(IdentityError::invalid(format!(
            "Badly formed project:user '{}'",
            reference_user
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_user_splits_into_project_and_user() {
        let creds =
            PasswordCredentials::from_reference("https://id.example/v3/", "services:glance", "k")
                .unwrap();
        assert_eq!(creds.project_name.as_deref(), Some("services"));
        assert_eq!(creds.username, "glance");
        assert_eq!(creds.password, "k");
    }

    #[test]
    fn malformed_reference_user_is_rejected() {
        for bad in ["glance", ":glance", "services:", "a:b:c"] {
            assert!(matches!(
                split_project_user(bad),
                Err(IdentityError::Invalid(_))
            ));
        }
    }

    #[test]
    fn token_method_cannot_reauthenticate() {
        let method = AuthMethod::Token {
            auth_url: "https://id.example/v3/".into(),
            token: "t".into(),
            project_id: None,
        };
        assert!(!method.can_reauthenticate());
        assert!(AuthMethod::Password(PasswordCredentials::new("https://x/", "u", "p"))
            .can_reauthenticate());
    }

    #[test]
    fn validate_requires_http_url() {
        let creds = PasswordCredentials::new("ftp://id", "u", "p");
        assert!(creds.validate().is_err());
        assert!(PasswordCredentials::new("https://id", "u", "p").validate().is_ok());
    }
}
