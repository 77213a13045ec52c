// Identity errors.

use thiserror::Error;

/// Result type for identity-service calls
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors surfaced by an identity service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Credentials, token or trust were rejected
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// The caller is authenticated but may not perform the call
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A referenced user, project or trust does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The catalog has no endpoint for the requested service
    #[error("No endpoint for service type '{service_type}' ({interface})")]
    EndpointNotFound {
        service_type: String,
        interface: String,
    },

    /// Malformed credentials or request
    #[error("Invalid identity request: {0}")]
    Invalid(String),

    /// Transport or service failure
    #[error("Identity service error: {0}")]
    Service(String),
}

impl IdentityError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::Service(message.into())
    }
}
