use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use vanish_core::filename::header_safe_filename;
use vanish_core::mime::content_type_for;
use vanish_core::{Clock, DEFAULT_TTL_MS, StoredName};
use vanish_store::{BlobStore, StoreError};

use crate::error::ShareError;

/// A file ready to be written to the client.
#[derive(Debug, Clone)]
pub struct ServedFile {
    pub data: Bytes,
    pub content_type: &'static str,
    pub content_length: u64,
    /// Sanitized original filename.
    pub filename: String,
    pub expires_at: DateTime<Utc>,
}

impl ServedFile {
    /// `Content-Disposition` value telling browsers to display the file
    /// inline under its original name.
    pub fn content_disposition(&self) -> String {
        format!("inline; filename=\"{}\"", header_safe_filename(&self.filename))
    }
}

/// Serves stored files until they expire.
///
/// Every read re-checks expiry against the clock, so an upload that is
/// still physically stored (timer lost, sweep not yet run) is never served
/// past its `expires_at`.
pub struct FileServer {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    operation_timeout: Duration,
}

impl std::fmt::Debug for FileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileServer")
            .field("backend", &self.store.backend_name())
            .field("default_ttl", &self.default_ttl)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl FileServer {
    pub fn new(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_ttl: Duration::from_millis(DEFAULT_TTL_MS),
            operation_timeout: Duration::from_secs(10),
        }
    }

    /// TTL assumed for records stored without expiry metadata.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Bound on the store read.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Fetch the file published under `name` (the URL path segment).
    ///
    /// Anything that is not a well-formed stored name, never existed, was
    /// reclaimed, has expired, or has no determinable expiry is
    /// [`ShareError::NotFound`].
    #[instrument(skip(self))]
    pub async fn serve(&self, name: &str) -> Result<ServedFile, ShareError> {
        let Ok(name) = StoredName::parse(name) else {
            debug!("malformed file name");
            return Err(ShareError::NotFound);
        };
        let handle = self.store.locate(&name);

        let object = tokio::time::timeout(self.operation_timeout, self.store.get(&handle))
            .await
            .map_err(|_| ShareError::Backend(StoreError::Timeout(self.operation_timeout)))??;

        let now = self.clock.now();
        let Some(expires_at) = object.info.expires_at(self.default_ttl) else {
            debug!(handle = %handle, "expiry undeterminable; refusing to serve");
            return Err(ShareError::NotFound);
        };
        if now >= expires_at {
            debug!(handle = %handle, %expires_at, "expired file still stored; refusing to serve");
            return Err(ShareError::NotFound);
        }

        let filename = object
            .info
            .metadata
            .map_or_else(|| name.to_string(), |meta| meta.original_filename);

        Ok(ServedFile {
            content_type: content_type_for(name.extension()),
            content_length: object.data.len() as u64,
            data: object.data,
            filename,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use vanish_core::{BlobId, BlobMetadata, ManualClock};
    use vanish_store::testing::MemoryBlobStore;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    struct Fixture {
        store: Arc<MemoryBlobStore>,
        clock: Arc<ManualClock>,
        server: FileServer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let server = FileServer::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        Fixture {
            store,
            clock,
            server,
        }
    }

    async fn upload(fx: &Fixture, original: &str, data: &'static [u8]) -> StoredName {
        let name = StoredName::for_upload(BlobId::new(), original);
        let meta = BlobMetadata::new(
            name.clone(),
            original,
            "application/x-declared",
            data.len() as u64,
            fx.clock.now(),
            TTL,
        );
        fx.store.put(&meta, Bytes::from_static(data)).await.unwrap();
        name
    }

    #[tokio::test]
    async fn serves_identical_bytes_with_table_content_type() {
        let fx = fixture();
        let name = upload(&fx, "hello.txt", b"hello world").await;

        let served = fx.server.serve(&name.to_string()).await.unwrap();
        assert_eq!(served.data, Bytes::from_static(b"hello world"));
        assert_eq!(served.content_type, "text/plain");
        assert_eq!(served.content_length, 11);
        assert_eq!(served.filename, "hello.txt");
        assert_eq!(served.content_disposition(), "inline; filename=\"hello.txt\"");
    }

    #[tokio::test]
    async fn unknown_extension_is_octet_stream() {
        let fx = fixture();
        let name = upload(&fx, "archive.xyz", b"?").await;
        let served = fx.server.serve(&name.to_string()).await.unwrap();
        assert_eq!(served.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn expired_file_is_not_served_even_if_stored() {
        let fx = fixture();
        let name = upload(&fx, "a.txt", b"a").await;

        fx.clock.advance(TTL - Duration::from_millis(1));
        assert!(fx.server.serve(&name.to_string()).await.is_ok());

        fx.clock.advance(Duration::from_millis(1));
        let err = fx.server.serve(&name.to_string()).await.unwrap_err();
        assert!(matches!(err, ShareError::NotFound));
        assert_eq!(fx.store.len(), 1);
    }

    #[tokio::test]
    async fn malformed_names_are_not_found() {
        let fx = fixture();
        upload(&fx, "a.txt", b"a").await;

        for raw in ["", "abc", "../etc/passwd", "..%2F..%2Fetc", "a.txt"] {
            assert!(
                matches!(fx.server.serve(raw).await, Err(ShareError::NotFound)),
                "{raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let fx = fixture();
        let name = StoredName::for_upload(BlobId::new(), "never.txt");
        let err = fx.server.serve(&name.to_string()).await.unwrap_err();
        assert!(matches!(err, ShareError::NotFound));
    }

    #[tokio::test]
    async fn falls_back_to_last_modified_without_metadata() {
        let fx = fixture();
        let name = StoredName::for_upload(BlobId::new(), "legacy.png");
        fx.store.insert_raw(
            &name.to_string(),
            None,
            Some(fx.clock.now()),
            Bytes::from_static(b"png"),
        );

        let served = fx.server.serve(&name.to_string()).await.unwrap();
        assert_eq!(served.content_type, "image/png");
        assert_eq!(served.filename, name.to_string());

        fx.clock.advance(TTL);
        assert!(matches!(
            fx.server.serve(&name.to_string()).await,
            Err(ShareError::NotFound)
        ));
    }

    #[tokio::test]
    async fn undeterminable_expiry_fails_closed() {
        let fx = fixture();
        let name = StoredName::for_upload(BlobId::new(), "mystery.txt");
        fx.store
            .insert_raw(&name.to_string(), None, None, Bytes::from_static(b"?"));

        assert!(matches!(
            fx.server.serve(&name.to_string()).await,
            Err(ShareError::NotFound)
        ));
    }

    #[tokio::test]
    async fn disposition_neutralizes_header_breaking_names() {
        let fx = fixture();
        let name = upload(&fx, "evil\"name é.txt", b"x").await;
        let served = fx.server.serve(&name.to_string()).await.unwrap();
        assert_eq!(
            served.content_disposition(),
            "inline; filename=\"evil_name _.txt\""
        );
    }
}
