//! Error types for toolrun

use thiserror::Error;

/// Result type alias using toolrun's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for toolrun
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Container engine error
    #[error("Container error: {0}")]
    Container(String),

    /// Container does not exist (already removed or never created)
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Session could not be provisioned
    #[error("Provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Execution refused by the scan gate
    #[error("Blocked by security scan: {0}")]
    SecurityBlocked(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures turning a bundle into a running container.
///
/// None of these are retried. A provisioning failure always leaves the
/// session in `Failed` with no container behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    /// Runtime image missing and could not be pulled
    #[error("image unavailable: {0}")]
    ImageUnavailable(String),

    /// Container create call failed
    #[error("container create failed: {0}")]
    Create(String),

    /// Bundle archive could not be written into the container
    #[error("file transfer failed: {0}")]
    Transfer(String),

    /// Container start call failed
    #[error("container start failed: {0}")]
    Start(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::NotFound(_)
                | Error::Unauthorized(_)
                | Error::SecurityBlocked(_)
        )
    }

    /// Whether the error means the container is already gone.
    ///
    /// Cleanup treats this as success.
    pub fn is_already_gone(&self) -> bool {
        matches!(self, Error::ContainerNotFound(_))
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => Error::ContainerNotFound(message),
            other => Error::Container(other.to_string()),
        }
    }
}
