use serde::Deserialize;

use vanish_core::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_TTL_MS};

/// Upload lifetime and size limits.
#[derive(Debug, Deserialize)]
pub struct ExpiryConfig {
    /// Time to live of every upload, in milliseconds. Overridden by `TTL_MS`.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    /// Largest accepted upload, in bytes. Overridden by `MAX_UPLOAD_BYTES`.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Schedule an in-process deletion timer for every upload.
    ///
    /// Only honoured for process-local stores; shared stores rely on the
    /// sweep alone.
    #[serde(default = "default_enable_timers")]
    pub enable_timers: bool,
    /// Bound on each timer's delete call, in milliseconds.
    #[serde(default = "default_delete_timeout_ms")]
    pub timer_delete_timeout_ms: u64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            max_upload_bytes: default_max_upload_bytes(),
            enable_timers: default_enable_timers(),
            timer_delete_timeout_ms: default_delete_timeout_ms(),
        }
    }
}

/// Periodic sweep configuration.
#[derive(Debug, Deserialize)]
pub struct ReclaimConfig {
    /// Run the sweep on an interval inside the server process.
    ///
    /// Disable when an external scheduler drives `POST /cleanup` or the
    /// `sweep` subcommand instead.
    #[serde(default = "default_reclaim_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Sweep once immediately at startup.
    #[serde(default = "default_sweep_on_start")]
    pub sweep_on_start: bool,
    /// Maximum concurrent deletes within one sweep.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Bound on each sweep delete, in milliseconds.
    #[serde(default = "default_delete_timeout_ms")]
    pub delete_timeout_ms: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            enabled: default_reclaim_enabled(),
            interval_seconds: default_interval_seconds(),
            sweep_on_start: default_sweep_on_start(),
            concurrency: default_concurrency(),
            delete_timeout_ms: default_delete_timeout_ms(),
        }
    }
}

/// Protection for the externally triggered sweep.
#[derive(Default, Deserialize)]
pub struct CleanupConfig {
    /// Bearer secret required on `/cleanup`. Overridden by
    /// `CLEANUP_TRIGGER_SECRET`; mandatory in production.
    pub trigger_secret: Option<String>,
}

impl std::fmt::Debug for CleanupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupConfig")
            .field(
                "trigger_secret",
                &self.trigger_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_enable_timers() -> bool {
    true
}

fn default_delete_timeout_ms() -> u64 {
    10_000
}

fn default_reclaim_enabled() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_sweep_on_start() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}
