use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use vanish_core::metadata::expiry_after;
use vanish_core::{BlobMetadata, StoredName};

use crate::error::StoreError;

/// Opaque, backend-specific reference to a stored blob.
///
/// Only the backend that produced a handle interprets it. Everything above
/// the store passes handles around, logs them, and hands them back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(String);

impl Handle {
    /// Wrap a backend-specific location. Intended for store implementations.
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// The backend-specific location string. Intended for store
    /// implementations and for logging.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a store keeps its data relative to the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    /// Visible only to this process and lost when it exits.
    ProcessLocal,
    /// Visible to every instance sharing the backend; survives restarts.
    Shared,
}

/// Result of a delete. Both variants are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    /// The blob existed and is now gone.
    Removed,
    /// Nothing was stored under the handle (reclaimed earlier, or never there).
    AlreadyGone,
}

/// What a backend knows about one stored object without reading its payload.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub handle: Handle,
    /// Persisted metadata, or `None` when it is missing or unreadable.
    pub metadata: Option<BlobMetadata>,
    /// Backend-reported modification time, when available.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectInfo {
    /// Determine when this object expires.
    ///
    /// Persisted `expires_at` metadata is authoritative. Without it, the
    /// backend's last-modified time plus `default_ttl` is used (degraded
    /// mode). With neither, returns `None`: the caller must not guess.
    pub fn expires_at(&self, default_ttl: Duration) -> Option<DateTime<Utc>> {
        match (&self.metadata, self.last_modified) {
            (Some(meta), _) => Some(meta.expires_at),
            (None, Some(modified)) => Some(expiry_after(modified, default_ttl)),
            (None, None) => None,
        }
    }
}

/// A fetched blob: what the backend knows about it, plus its payload.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub info: ObjectInfo,
    pub data: Bytes,
}

/// Persistence for uploaded payloads and their expiry metadata.
///
/// Implementations must be `Send + Sync` and safe for concurrent use by
/// many callers at once. Atomicity is per object and comes from the backend
/// itself; callers never lock.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs and health output (e.g. `"local"`).
    fn backend_name(&self) -> &'static str;

    /// Whether data is visible beyond the current process.
    fn locality(&self) -> Locality;

    /// Compute the handle a blob stored under `name` has in this backend.
    fn locate(&self, name: &StoredName) -> Handle;

    /// Store a payload together with its metadata, atomically.
    ///
    /// Fails with [`StoreError::AlreadyExists`] rather than overwrite, with
    /// [`StoreError::PayloadTooLarge`] when `data` exceeds the backend limit,
    /// and with [`StoreError::BackendUnavailable`] when the backend is
    /// unreachable.
    async fn put(&self, metadata: &BlobMetadata, data: Bytes) -> Result<Handle, StoreError>;

    /// Fetch a blob. Returns [`StoreError::NotFound`] when it is absent.
    async fn get(&self, handle: &Handle) -> Result<StoredObject, StoreError>;

    /// Delete a blob. Deleting something already absent is not an error.
    async fn delete(&self, handle: &Handle) -> Result<Deletion, StoreError>;

    /// Lazily enumerate every stored object.
    ///
    /// Each call starts a fresh, finite enumeration. Results may lag behind
    /// recent writes and deletes, so entries may no longer resolve on
    /// [`get`](Self::get). Items failing with [`StoreError::Record`] concern
    /// a single object; any other error means the listing itself failed.
    fn list(&self) -> BoxStream<'_, Result<ObjectInfo, StoreError>>;
}
