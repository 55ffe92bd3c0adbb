use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use vanish_core::filename::{FALLBACK_FILENAME, sanitize_filename};
use vanish_core::mime::content_type_for;
use vanish_core::{BlobId, BlobMetadata, Clock, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_TTL_MS, StoredName};
use vanish_reclaim::ExpiryTimers;
use vanish_store::{BlobStore, Locality, StoreError};

use crate::error::ShareError;

/// Limits applied to every upload.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// How long an upload stays retrievable.
    pub ttl: Duration,
    /// Largest accepted payload, in bytes.
    pub max_upload_bytes: u64,
    /// Bound on the store write.
    pub operation_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            operation_timeout: Duration::from_secs(10),
        }
    }
}

/// A file as received from the client, before validation.
#[derive(Debug, Clone, Default)]
pub struct IncomingUpload {
    /// Payload; `None` when the request carried no file at all.
    pub data: Option<Bytes>,
    /// Client-supplied filename, untrusted.
    pub filename: Option<String>,
    /// Client-declared content type, untrusted.
    pub content_type: Option<String>,
}

/// What the client gets back for a stored upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub id: BlobId,
    pub stored_name: StoredName,
    pub original_filename: String,
    /// Public retrieval URL.
    pub url: String,
    /// Seconds until the file expires.
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

/// Validates uploads, persists them with their expiry, and schedules their
/// deletion.
pub struct UploadIngestor {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    timers: Option<Arc<ExpiryTimers>>,
    config: IngestConfig,
}

impl std::fmt::Debug for UploadIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadIngestor")
            .field("backend", &self.store.backend_name())
            .field("timers", &self.timers.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UploadIngestor {
    pub fn new(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, config: IngestConfig) -> Self {
        Self {
            store,
            clock,
            timers: None,
            config,
        }
    }

    /// Register an expiry timer for every upload to a process-local store.
    #[must_use]
    pub fn with_timers(mut self, timers: Arc<ExpiryTimers>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Largest accepted payload, in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.config.max_upload_bytes
    }

    /// Validate and store one upload.
    ///
    /// The size limit is enforced before anything is written. `base_url`
    /// is the externally visible origin used to build the retrieval URL.
    #[instrument(skip(self, upload), fields(filename = upload.filename.as_deref().unwrap_or("")))]
    pub async fn ingest(
        &self,
        upload: IncomingUpload,
        base_url: &str,
    ) -> Result<UploadReceipt, ShareError> {
        let data = upload
            .data
            .ok_or_else(|| ShareError::Validation("no file uploaded".to_owned()))?;

        let size = data.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(ShareError::PayloadTooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }

        let original_filename =
            sanitize_filename(upload.filename.as_deref().unwrap_or(FALLBACK_FILENAME));
        let stored_name = StoredName::for_upload(BlobId::new(), &original_filename);
        let content_type = upload
            .content_type
            .map(|declared| declared.trim().to_owned())
            .filter(|declared| !declared.is_empty())
            .unwrap_or_else(|| content_type_for(stored_name.extension()).to_owned());

        let metadata = BlobMetadata::new(
            stored_name,
            original_filename,
            content_type,
            size,
            self.clock.now(),
            self.config.ttl,
        );

        let handle = tokio::time::timeout(
            self.config.operation_timeout,
            self.store.put(&metadata, data),
        )
        .await
        .map_err(|_| ShareError::Backend(StoreError::Timeout(self.config.operation_timeout)))??;

        if self.store.locality() == Locality::ProcessLocal
            && let Some(timers) = &self.timers
        {
            timers.register(handle.clone(), metadata.expires_at);
        } else {
            debug!(handle = %handle, "no in-process timer; relying on the sweep");
        }

        info!(
            id = %metadata.id,
            stored_name = %metadata.stored_name,
            size,
            expires_at = %metadata.expires_at,
            "upload stored"
        );

        Ok(UploadReceipt {
            id: metadata.id,
            url: format!(
                "{}/files/{}",
                base_url.trim_end_matches('/'),
                metadata.stored_name
            ),
            stored_name: metadata.stored_name,
            original_filename: metadata.original_filename,
            expires_in: u64::try_from(self.config.ttl.as_millis().div_ceil(1000))
                .unwrap_or(u64::MAX),
            expires_at: metadata.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use vanish_core::ManualClock;
    use vanish_reclaim::ReclaimMetrics;
    use vanish_store::testing::MemoryBlobStore;

    use super::*;

    const BASE: &str = "http://localhost:3000";

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_millis(1_700_000_000_000))
    }

    fn ingestor(store: &Arc<MemoryBlobStore>, clock: &Arc<ManualClock>) -> UploadIngestor {
        UploadIngestor::new(
            Arc::clone(store) as Arc<dyn BlobStore>,
            Arc::clone(clock) as Arc<dyn Clock>,
            IngestConfig::default(),
        )
    }

    fn file(name: &str, data: &'static [u8]) -> IncomingUpload {
        IncomingUpload {
            data: Some(Bytes::from_static(data)),
            filename: Some(name.to_owned()),
            content_type: None,
        }
    }

    #[tokio::test]
    async fn stores_upload_with_exact_expiry() {
        let store = Arc::new(MemoryBlobStore::new());
        let clock = clock();
        let receipt = ingestor(&store, &clock)
            .ingest(file("notes.txt", b"hello"), BASE)
            .await
            .unwrap();

        assert_eq!(receipt.original_filename, "notes.txt");
        assert_eq!(receipt.stored_name.extension(), Some("txt"));
        assert_eq!(receipt.stored_name.id(), receipt.id);
        assert_eq!(receipt.expires_in, 60);
        assert_eq!(
            receipt.url,
            format!("http://localhost:3000/files/{}", receipt.stored_name)
        );

        let stored = store.get(&store.locate(&receipt.stored_name)).await.unwrap();
        let meta = stored.info.metadata.unwrap();
        assert_eq!(stored.data, Bytes::from_static(b"hello"));
        assert_eq!(meta.created_at, clock.now());
        assert_eq!(
            meta.expires_at.timestamp_millis() - meta.created_at.timestamp_millis(),
            60_000
        );
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.size_bytes, 5);
    }

    #[tokio::test]
    async fn missing_file_is_a_validation_error() {
        let store = Arc::new(MemoryBlobStore::new());
        let err = ingestor(&store, &clock())
            .ingest(IncomingUpload::default(), BASE)
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::Validation(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn oversize_upload_persists_nothing() {
        let store = Arc::new(MemoryBlobStore::new());
        let ingestor = UploadIngestor::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            clock(),
            IngestConfig {
                max_upload_bytes: 4,
                ..IngestConfig::default()
            },
        );

        let err = ingestor.ingest(file("big.bin", b"12345"), BASE).await.unwrap_err();
        assert!(matches!(err, ShareError::PayloadTooLarge { size: 5, limit: 4 }));
        assert!(store.is_empty());

        assert!(ingestor.ingest(file("ok.bin", b"1234"), BASE).await.is_ok());
    }

    #[tokio::test]
    async fn empty_files_are_accepted() {
        let store = Arc::new(MemoryBlobStore::new());
        let receipt = ingestor(&store, &clock())
            .ingest(file("empty.txt", b""), BASE)
            .await
            .unwrap();
        let stored = store.get(&store.locate(&receipt.stored_name)).await.unwrap();
        assert!(stored.data.is_empty());
    }

    #[tokio::test]
    async fn client_filename_is_sanitized() {
        let store = Arc::new(MemoryBlobStore::new());
        let receipt = ingestor(&store, &clock())
            .ingest(file("../../etc/Passwd.PNG", b"x"), BASE)
            .await
            .unwrap();
        assert_eq!(receipt.original_filename, "Passwd.PNG");
        assert_eq!(receipt.stored_name.extension(), Some("png"));

        let unnamed = ingestor(&store, &clock())
            .ingest(
                IncomingUpload {
                    data: Some(Bytes::from_static(b"x")),
                    ..IncomingUpload::default()
                },
                BASE,
            )
            .await
            .unwrap();
        assert_eq!(unnamed.original_filename, FALLBACK_FILENAME);
        assert_eq!(unnamed.stored_name.extension(), Some("bin"));
    }

    #[tokio::test]
    async fn declared_content_type_wins_over_table() {
        let store = Arc::new(MemoryBlobStore::new());
        let mut upload = file("data.weird", b"{}");
        upload.content_type = Some("application/vnd.custom+json".to_owned());
        let receipt = ingestor(&store, &clock()).ingest(upload, BASE).await.unwrap();

        let meta = store
            .get(&store.locate(&receipt.stored_name))
            .await
            .unwrap()
            .info
            .metadata
            .unwrap();
        assert_eq!(meta.content_type, "application/vnd.custom+json");
    }

    #[tokio::test]
    async fn trailing_slash_in_base_url_is_ignored() {
        let store = Arc::new(MemoryBlobStore::new());
        let receipt = ingestor(&store, &clock())
            .ingest(file("a.txt", b"a"), "https://share.example/")
            .await
            .unwrap();
        assert!(receipt.url.starts_with("https://share.example/files/"));
    }

    #[tokio::test]
    async fn store_limit_surfaces_as_payload_too_large() {
        let store = Arc::new(MemoryBlobStore::new().with_max_object_bytes(1));
        let err = ingestor(&store, &clock())
            .ingest(file("a.txt", b"ab"), BASE)
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::PayloadTooLarge { size: 2, limit: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn registers_timer_only_for_process_local_stores() {
        let clock = clock();
        let metrics = Arc::new(ReclaimMetrics::default());

        for (store, expected) in [
            (Arc::new(MemoryBlobStore::new()), 1),
            (Arc::new(MemoryBlobStore::shared()), 0),
        ] {
            let timers = Arc::new(ExpiryTimers::new(
                Arc::clone(&store) as Arc<dyn BlobStore>,
                Arc::clone(&clock) as Arc<dyn Clock>,
                Arc::clone(&metrics),
            ));
            ingestor(&store, &clock)
                .with_timers(Arc::clone(&timers))
                .ingest(file("a.txt", b"a"), BASE)
                .await
                .unwrap();
            assert_eq!(timers.pending(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn registered_timer_reclaims_the_upload() {
        let store = Arc::new(MemoryBlobStore::new());
        let clock = clock();
        let timers = Arc::new(ExpiryTimers::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(ReclaimMetrics::default()),
        ));
        ingestor(&store, &clock)
            .with_timers(timers)
            .ingest(file("a.txt", b"a"), BASE)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty());
    }
}
