use thiserror::Error;
use vanish_store::StoreError;

/// Errors that abort a whole reclaim run.
///
/// Per-record failures never surface here; they are collected in the
/// [`SweepReport`](crate::SweepReport).
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// The store could not be enumerated.
    #[error("listing failed: {0}")]
    Listing(#[source] StoreError),
}
