use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use vanish_reclaim::{ReclaimMetricsSnapshot, SweepFailure, SweepReport};
use vanish_share::UploadReceipt;

/// Generic error body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "File not found or expired")]
    pub error: String,
}

/// Successful upload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[schema(example = "File uploaded successfully")]
    pub message: String,
    /// Unique id of the upload.
    #[schema(example = "0b8f6c1e-3f5a-4c62-9a57-1d2f0c3e4b5a")]
    pub file_id: String,
    /// Sanitized original filename.
    #[schema(example = "report.pdf")]
    pub filename: String,
    /// Name the file is served under.
    #[schema(example = "0b8f6c1e-3f5a-4c62-9a57-1d2f0c3e4b5a.pdf")]
    pub stored_name: String,
    /// Share link.
    #[schema(example = "http://localhost:5000/files/0b8f6c1e-3f5a-4c62-9a57-1d2f0c3e4b5a.pdf")]
    pub url: String,
    /// Seconds until the link stops working.
    #[schema(example = 60)]
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

impl From<UploadReceipt> for UploadResponse {
    fn from(receipt: UploadReceipt) -> Self {
        Self {
            message: "File uploaded successfully".to_owned(),
            file_id: receipt.id.to_string(),
            filename: receipt.original_filename,
            stored_name: receipt.stored_name.to_string(),
            url: receipt.url,
            expires_in: receipt.expires_in,
            expires_at: receipt.expires_at,
        }
    }
}

/// A record the sweep failed to process.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CleanupFailure {
    #[schema(example = "/srv/vanish/uploads/0b8f6c1e-3f5a-4c62-9a57-1d2f0c3e4b5a.pdf")]
    pub handle: String,
    #[schema(example = "operation timed out after 10s")]
    pub message: String,
}

impl From<SweepFailure> for CleanupFailure {
    fn from(failure: SweepFailure) -> Self {
        Self {
            handle: failure.handle,
            message: failure.message,
        }
    }
}

/// Result of a triggered sweep.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    #[schema(example = true)]
    pub success: bool,
    /// When the sweep finished.
    pub timestamp: DateTime<Utc>,
    /// Records examined.
    #[schema(example = 3)]
    pub checked: u64,
    /// Expired records deleted by this sweep.
    #[schema(example = 1)]
    pub deleted: u64,
    /// Expired records someone else deleted first.
    #[schema(example = 0)]
    pub already_gone: u64,
    /// Records still within their lifetime.
    #[schema(example = 2)]
    pub live: u64,
    /// Records with no determinable expiry, left in place.
    pub skipped: Vec<String>,
    /// Per-record failures; omitted when there were none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<CleanupFailure>>,
}

impl From<SweepReport> for CleanupResponse {
    fn from(report: SweepReport) -> Self {
        let errors = (!report.errors.is_empty())
            .then(|| report.errors.into_iter().map(CleanupFailure::from).collect());
        Self {
            success: true,
            timestamp: report.finished_at,
            checked: report.checked,
            deleted: report.deleted,
            already_gone: report.already_gone,
            live: report.live,
            skipped: report.skipped,
            errors,
        }
    }
}

/// Sweep that could not list the store.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CleanupErrorResponse {
    #[schema(example = false)]
    pub success: bool,
    #[schema(example = "Cleanup failed")]
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Reclaim counters since process start.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimCounters {
    pub timer_deletions: u64,
    pub timer_noops: u64,
    pub timer_failures: u64,
    pub sweep_runs: u64,
    pub sweep_deletions: u64,
    pub sweep_errors: u64,
    pub sweep_fatal: u64,
}

impl From<ReclaimMetricsSnapshot> for ReclaimCounters {
    fn from(snap: ReclaimMetricsSnapshot) -> Self {
        Self {
            timer_deletions: snap.timer_deletions,
            timer_noops: snap.timer_noops,
            timer_failures: snap.timer_failures,
            sweep_runs: snap.sweep_runs,
            sweep_deletions: snap.sweep_deletions,
            sweep_errors: snap.sweep_errors,
            sweep_fatal: snap.sweep_fatal,
        }
    }
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    /// Active store backend.
    #[schema(example = "local")]
    pub backend: String,
    /// Expiry timers that have not fired yet.
    #[schema(example = 3)]
    pub pending_timers: usize,
    pub reclaim: ReclaimCounters,
}
