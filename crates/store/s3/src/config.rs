use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the S3 blob store.
///
/// Works against AWS itself or any S3-compatible service (`MinIO`,
/// `LocalStack`, R2) via `endpoint_url` and `force_path_style`.
#[derive(Clone, Serialize, Deserialize)]
pub struct S3StoreConfig {
    /// Bucket holding the uploads.
    pub bucket: String,

    /// Key prefix for every object (e.g. `"uploads/"`).
    #[serde(default)]
    pub prefix: String,

    /// AWS region (e.g. `"us-east-1"`).
    #[serde(default = "default_region")]
    pub region: String,

    /// Optional endpoint URL override for S3-compatible services.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Address buckets by path instead of virtual host. Most self-hosted
    /// S3-compatible services need this.
    #[serde(default)]
    pub force_path_style: bool,

    /// Optional IAM role ARN to assume via STS.
    #[serde(default)]
    pub role_arn: Option<String>,

    /// Optional STS session name (defaults to `"vanish-store"`).
    #[serde(default)]
    pub session_name: Option<String>,

    /// Per-operation timeout applied by the SDK, in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Largest payload accepted, in bytes. Capped at the single-request
    /// PUT limit of S3 regardless.
    #[serde(default)]
    pub max_object_bytes: Option<u64>,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

impl std::fmt::Debug for S3StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StoreConfig")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .field("role_arn", &self.role_arn.as_ref().map(|_| "[REDACTED]"))
            .field("session_name", &self.session_name)
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .field("max_object_bytes", &self.max_object_bytes)
            .finish()
    }
}

impl S3StoreConfig {
    /// Create a config for `bucket` with defaults for everything else.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            role_arn: None,
            session_name: None,
            operation_timeout_ms: default_operation_timeout_ms(),
            max_object_bytes: None,
        }
    }

    /// Set the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Point the client at an S3-compatible endpoint using path-style
    /// addressing.
    #[must_use]
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self.force_path_style = true;
        self
    }

    /// Set the IAM role ARN to assume.
    #[must_use]
    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    /// Set the SDK operation timeout.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Reject payloads larger than `limit` bytes.
    #[must_use]
    pub fn with_max_object_bytes(mut self, limit: u64) -> Self {
        self.max_object_bytes = Some(limit);
        self
    }

    /// The SDK operation timeout as a [`Duration`].
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}
