use std::sync::Arc;

use vanish_store::BlobStore;
use vanish_store_local::{LocalBlobStore, LocalConfig};
#[cfg(feature = "s3")]
use vanish_store_s3::{S3BlobStore, S3StoreConfig};

use crate::config::StoreConfig;
use crate::error::ServerError;

/// Create the blob store selected by `[store] backend`.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn BlobStore>, ServerError> {
    let store: Arc<dyn BlobStore> = match config.backend.as_str() {
        "local" => {
            let mut local = LocalConfig::new(&config.local.directory);
            if let Some(limit) = config.max_object_bytes {
                local = local.with_max_object_bytes(limit);
            }
            let store = LocalBlobStore::open(local)
                .await
                .map_err(|e| ServerError::Config(format!("local store: {e}")))?;
            Arc::new(store)
        }
        #[cfg(feature = "s3")]
        "s3" => {
            let section = &config.s3;
            let bucket = section.bucket.as_deref().ok_or_else(|| {
                ServerError::Config("s3 store backend requires [store.s3] bucket".into())
            })?;

            let mut s3 = S3StoreConfig::new(bucket).with_prefix(&section.prefix);
            if let Some(region) = &section.region {
                s3 = s3.with_region(region);
            }
            if let Some(endpoint) = &section.endpoint_url {
                s3 = s3.with_endpoint_url(endpoint);
            }
            if let Some(role_arn) = &section.role_arn {
                s3 = s3.with_role_arn(role_arn);
            }
            if let Some(ms) = section.operation_timeout_ms {
                s3 = s3.with_operation_timeout(std::time::Duration::from_millis(ms));
            }
            if let Some(limit) = config.max_object_bytes {
                s3 = s3.with_max_object_bytes(limit);
            }

            Arc::new(S3BlobStore::connect(s3).await)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported store backend: {other:?} (is the matching feature enabled?)"
            )));
        }
    };

    tracing::info!(backend = store.backend_name(), "blob store ready");
    Ok(store)
}
