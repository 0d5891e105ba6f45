use thiserror::Error;

#[derive(Error, Debug)]
pub enum VarStoreError {
    #[error("Variable not found")]
    NotFound,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Write protected: {0}")]
    WriteProtected(String),

    #[error("Out of resources: variable store is full")]
    OutOfResources,

    #[error("Buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Corrupt variable store: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VarStoreError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        VarStoreError::InvalidParameter(msg.into())
    }

    pub(crate) fn protected(msg: impl Into<String>) -> Self {
        VarStoreError::WriteProtected(msg.into())
    }

    pub(crate) fn io(msg: impl Into<String>) -> Self {
        VarStoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, VarStoreError>;
