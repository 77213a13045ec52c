use thiserror::Error;

use dog_identity::IdentityError;

/// Result type for image store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by image store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Image not found: {message}")]
    NotFound { message: String },

    #[error("Duplicate image: {message}")]
    Duplicate { message: String },

    #[error("Bad store configuration: {reason}")]
    BadConfiguration { reason: String },

    #[error("Bad store location: {reason}")]
    BadLocation { reason: String },

    #[error("Storage backend error: {message}")]
    Backend { message: String },

    /// The image source failed while being read
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Create a not found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a duplicate error
    pub fn duplicate<S: Into<String>>(message: S) -> Self {
        Self::Duplicate {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn bad_configuration<S: Into<String>>(reason: S) -> Self {
        Self::BadConfiguration {
            reason: reason.into(),
        }
    }

    /// Create a location error
    pub fn bad_location<S: Into<String>>(reason: S) -> Self {
        Self::BadLocation {
            reason: reason.into(),
        }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

impl From<ConnectionError> for StoreError {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::Io(source) => Self::Io { source },
            other => Self::backend(other.to_string()),
        }
    }
}

impl From<IdentityError> for StoreError {
    fn from(error: IdentityError) -> Self {
        Self::backend(error.to_string())
    }
}

/// Result type for calls on an object-store connection
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors raised by an object-store connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The object store answered with a non-success status
    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },

    /// The request never got an answer
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reading the request body from the image source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    pub fn http<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}
