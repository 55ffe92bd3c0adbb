use serde::Deserialize;

/// Storage backend configuration.
///
/// # Example
///
/// ```toml
/// [store]
/// backend = "s3"
///
/// [store.s3]
/// bucket = "vanish-uploads"
/// prefix = "uploads/"
/// region = "eu-west-1"
/// ```
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Which backend to use: `"local"` or `"s3"`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Bound on each store call made while serving a request, in
    /// milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Largest object the backend will accept, in bytes. Unset means the
    /// backend's own limit.
    pub max_object_bytes: Option<u64>,
    #[serde(default)]
    pub local: LocalStoreSection,
    #[serde(default)]
    pub s3: S3StoreSection,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_object_bytes: None,
            local: LocalStoreSection::default(),
            s3: S3StoreSection::default(),
        }
    }
}

/// `[store.local]`
#[derive(Debug, Deserialize)]
pub struct LocalStoreSection {
    /// Directory holding payloads and their sidecars. Created on startup.
    #[serde(default = "default_local_directory")]
    pub directory: String,
}

impl Default for LocalStoreSection {
    fn default() -> Self {
        Self {
            directory: default_local_directory(),
        }
    }
}

/// `[store.s3]`
#[derive(Default, Deserialize)]
pub struct S3StoreSection {
    /// Bucket name. Required when `backend = "s3"`.
    pub bucket: Option<String>,
    /// Key prefix prepended to every stored name.
    #[serde(default)]
    pub prefix: String,
    /// AWS region.
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (`MinIO`, `LocalStack`).
    pub endpoint_url: Option<String>,
    /// IAM role to assume for bucket access.
    pub role_arn: Option<String>,
    /// SDK operation timeout in milliseconds.
    pub operation_timeout_ms: Option<u64>,
}

impl std::fmt::Debug for S3StoreSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StoreSection")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("role_arn", &self.role_arn.as_ref().map(|_| "[REDACTED]"))
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .finish()
    }
}

fn default_store_backend() -> String {
    "local".to_owned()
}

fn default_operation_timeout_ms() -> u64 {
    10_000
}

fn default_local_directory() -> String {
    "uploads".to_owned()
}
