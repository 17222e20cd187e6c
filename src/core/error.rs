use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Remote execution failed for {deployment}: {message}")]
    RemoteExecution { deployment: String, message: String },

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("No rotations available: {0}")]
    RotationsExhausted(String),

    #[error("Fatal startup failure: {0}")]
    FatalStartup(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub fn is_remote_execution(&self) -> bool {
        matches!(self, Self::RemoteExecution { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for ControllerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
