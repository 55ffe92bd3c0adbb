use thiserror::Error;
use vanish_store::StoreError;

/// Errors from the upload and download paths.
#[derive(Debug, Error)]
pub enum ShareError {
    /// The request did not carry a usable upload.
    #[error("validation error: {0}")]
    Validation(String),

    /// The file never existed, was reclaimed, or has expired.
    #[error("file not found or expired")]
    NotFound,

    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// The store failed, timed out, or could not be reached.
    #[error("storage backend error: {0}")]
    Backend(#[source] StoreError),
}

impl From<StoreError> for ShareError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::PayloadTooLarge { size, limit } => Self::PayloadTooLarge { size, limit },
            other => Self::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_share_errors() {
        assert!(matches!(
            ShareError::from(StoreError::NotFound("x".into())),
            ShareError::NotFound
        ));
        assert!(matches!(
            ShareError::from(StoreError::PayloadTooLarge { size: 2, limit: 1 }),
            ShareError::PayloadTooLarge { size: 2, limit: 1 }
        ));
        assert!(matches!(
            ShareError::from(StoreError::BackendUnavailable("down".into())),
            ShareError::Backend(StoreError::BackendUnavailable(_))
        ));
    }
}
