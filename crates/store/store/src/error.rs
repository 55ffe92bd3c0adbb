use std::time::Duration;

use thiserror::Error;

use crate::store::Handle;

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested blob does not exist (never stored, or already deleted).
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The payload exceeds what the backend (or its configuration) accepts.
    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Actual size.
        size: u64,
        /// Maximum allowed size.
        limit: u64,
    },

    /// A blob is already stored under this name. Names are never reused.
    #[error("blob already exists: {0}")]
    AlreadyExists(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    /// A failure scoped to a single listed record. Listing callers treat
    /// this as a per-record problem; every other error yielded by a listing
    /// means the enumeration itself failed.
    #[error("record {handle}: {source}")]
    Record {
        handle: Handle,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Wrap `self` as a failure of one listed record.
    #[must_use]
    pub fn for_record(self, handle: Handle) -> Self {
        Self::Record {
            handle,
            source: Box::new(self),
        }
    }

    /// Whether this error means the blob is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Record { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
