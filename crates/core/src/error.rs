use thiserror::Error;

/// Errors raised while interpreting core domain values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VanishError {
    #[error("invalid stored name: {0}")]
    InvalidStoredName(String),

    #[error("invalid blob id: {0}")]
    InvalidBlobId(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}
