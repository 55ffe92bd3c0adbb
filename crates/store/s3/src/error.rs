use std::time::Duration;

use vanish_store::StoreError;

/// Classify an S3 SDK error message into the matching [`StoreError`].
///
/// Status-code specific cases (missing objects, failed preconditions) are
/// handled at the call sites; this covers everything that is left.
pub fn classify_sdk_error(error_str: &str, timeout: Duration) -> StoreError {
    let lower = error_str.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        StoreError::Timeout(timeout)
    } else if lower.contains("throttl")
        || lower.contains("slow down")
        || lower.contains("slowdown")
        || lower.contains("dispatch failure")
        || lower.contains("connection")
        || lower.contains("connect")
        || lower.contains("dns")
        || lower.contains("network")
    {
        StoreError::BackendUnavailable(error_str.to_owned())
    } else {
        StoreError::Backend(error_str.to_owned())
    }
}
