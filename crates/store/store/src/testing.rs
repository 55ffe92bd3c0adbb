//! Test support shared by every backend and by the layers above the store:
//! a backend conformance suite and an in-memory store with fault injection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use vanish_core::{BlobId, BlobMetadata, Clock, StoredName, SystemClock};

use crate::error::StoreError;
use crate::store::{BlobStore, Deletion, Handle, Locality, ObjectInfo, StoredObject};

#[derive(Debug, Clone)]
struct MemoryEntry {
    info: ObjectInfo,
    data: Bytes,
}

/// In-memory [`BlobStore`] backed by a [`DashMap`].
///
/// Besides plain storage it can simulate the failure modes the reclaim path
/// has to survive: failing or hanging deletes, a failing listing, per-record
/// listing errors, and a stale listing that keeps reporting deleted objects.
#[derive(Debug)]
pub struct MemoryBlobStore {
    objects: DashMap<String, MemoryEntry>,
    ghosts: DashMap<String, ObjectInfo>,
    failing_deletes: DashMap<String, String>,
    hanging_deletes: DashMap<String, ()>,
    failing_records: DashMap<String, String>,
    fail_listing: AtomicBool,
    locality: Locality,
    stale_listing: bool,
    max_object_bytes: Option<u64>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
            ghosts: DashMap::new(),
            failing_deletes: DashMap::new(),
            hanging_deletes: DashMap::new(),
            failing_records: DashMap::new(),
            fail_listing: AtomicBool::new(false),
            locality: Locality::ProcessLocal,
            stale_listing: false,
            max_object_bytes: None,
        }
    }
}

impl MemoryBlobStore {
    /// A process-local store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports [`Locality::Shared`], like a durable backend.
    pub fn shared() -> Self {
        Self {
            locality: Locality::Shared,
            ..Self::default()
        }
    }

    /// Keep listing deleted objects, as an eventually consistent backend may.
    #[must_use]
    pub fn with_stale_listing(mut self) -> Self {
        self.stale_listing = true;
        self
    }

    /// Reject payloads larger than `limit` bytes.
    #[must_use]
    pub fn with_max_object_bytes(mut self, limit: u64) -> Self {
        self.max_object_bytes = Some(limit);
        self
    }

    /// Insert an object directly, bypassing `put`, with arbitrary (possibly
    /// missing) metadata and modification time.
    pub fn insert_raw(
        &self,
        key: &str,
        metadata: Option<BlobMetadata>,
        last_modified: Option<DateTime<Utc>>,
        data: Bytes,
    ) -> Handle {
        let handle = Self::handle_for_key(key);
        self.objects.insert(
            handle.as_str().to_owned(),
            MemoryEntry {
                info: ObjectInfo {
                    handle: handle.clone(),
                    metadata,
                    last_modified,
                },
                data,
            },
        );
        handle
    }

    /// Make every delete of `handle` fail with a backend error.
    pub fn fail_deletes(&self, handle: &Handle, message: &str) {
        self.failing_deletes
            .insert(handle.as_str().to_owned(), message.to_owned());
    }

    /// Make every delete of `handle` never complete.
    pub fn hang_deletes(&self, handle: &Handle) {
        self.hanging_deletes.insert(handle.as_str().to_owned(), ());
    }

    /// Make the listing yield a per-record error in place of `handle`.
    pub fn fail_listing_record(&self, handle: &Handle, message: &str) {
        self.failing_records
            .insert(handle.as_str().to_owned(), message.to_owned());
    }

    /// Make the listing itself fail (or succeed again).
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Whether an object is currently stored under `handle`.
    pub fn contains(&self, handle: &Handle) -> bool {
        self.objects.contains_key(handle.as_str())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn handle_for_key(key: &str) -> Handle {
        Handle::new(format!("memory:{key}"))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn locality(&self) -> Locality {
        self.locality
    }

    fn locate(&self, name: &StoredName) -> Handle {
        Self::handle_for_key(&name.to_string())
    }

    async fn put(&self, metadata: &BlobMetadata, data: Bytes) -> Result<Handle, StoreError> {
        let size = data.len() as u64;
        if let Some(limit) = self.max_object_bytes
            && size > limit
        {
            return Err(StoreError::PayloadTooLarge { size, limit });
        }

        let handle = self.locate(&metadata.stored_name);
        match self.objects.entry(handle.as_str().to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::AlreadyExists(handle.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry {
                    info: ObjectInfo {
                        handle: handle.clone(),
                        metadata: Some(metadata.clone()),
                        last_modified: Some(metadata.created_at),
                    },
                    data,
                });
                Ok(handle)
            }
        }
    }

    async fn get(&self, handle: &Handle) -> Result<StoredObject, StoreError> {
        self.objects
            .get(handle.as_str())
            .map(|entry| StoredObject {
                info: entry.info.clone(),
                data: entry.data.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))
    }

    async fn delete(&self, handle: &Handle) -> Result<Deletion, StoreError> {
        if let Some(message) = self.failing_deletes.get(handle.as_str()) {
            return Err(StoreError::Backend(message.clone()));
        }
        if self.hanging_deletes.contains_key(handle.as_str()) {
            std::future::pending::<()>().await;
        }

        match self.objects.remove(handle.as_str()) {
            Some((key, entry)) => {
                if self.stale_listing {
                    self.ghosts.insert(key, entry.info);
                }
                Ok(Deletion::Removed)
            }
            None => Ok(Deletion::AlreadyGone),
        }
    }

    fn list(&self) -> BoxStream<'_, Result<ObjectInfo, StoreError>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return stream::once(async {
                Err(StoreError::BackendUnavailable("listing failed".to_owned()))
            })
            .boxed();
        }

        // Snapshot now so that the enumeration is finite even while objects
        // are added or removed concurrently.
        let mut infos: Vec<ObjectInfo> = self
            .objects
            .iter()
            .map(|entry| entry.info.clone())
            .chain(self.ghosts.iter().map(|ghost| ghost.value().clone()))
            .collect();
        infos.sort_by(|a, b| a.handle.as_str().cmp(b.handle.as_str()));

        let items: Vec<Result<ObjectInfo, StoreError>> = infos
            .into_iter()
            .map(|info| match self.failing_records.get(info.handle.as_str()) {
                Some(message) => {
                    Err(StoreError::Backend(message.clone()).for_record(info.handle))
                }
                None => Ok(info),
            })
            .collect();

        stream::iter(items).boxed()
    }
}

// -- Conformance suite ------------------------------------------------------

/// Build metadata for a fresh upload named `original` with a 60 s TTL.
pub fn sample_metadata(original: &str, size_bytes: u64) -> BlobMetadata {
    let name = StoredName::for_upload(BlobId::new(), original);
    BlobMetadata::new(
        name,
        original,
        vanish_core::mime::content_type_for(vanish_core::types::extension_of(original).as_deref()),
        size_bytes,
        SystemClock.now(),
        Duration::from_secs(60),
    )
}

/// Run the behaviour every [`BlobStore`] backend must provide.
///
/// The store should start empty.
pub async fn run_store_conformance_tests(store: &dyn BlobStore) -> Result<(), StoreError> {
    put_then_get_round_trips(store).await?;
    get_missing_is_not_found(store).await?;
    delete_is_idempotent(store).await?;
    put_never_overwrites(store).await?;
    list_reports_metadata_and_restarts(store).await?;
    locate_matches_put(store).await?;
    Ok(())
}

async fn put_then_get_round_trips(store: &dyn BlobStore) -> Result<(), StoreError> {
    let payload = Bytes::from_static(b"hello, vanish");
    let meta = sample_metadata("greeting.txt", payload.len() as u64);

    let handle = store.put(&meta, payload.clone()).await?;
    let fetched = store.get(&handle).await?;

    assert_eq!(fetched.data, payload, "payload must round-trip");
    assert_eq!(
        fetched.info.metadata.as_ref(),
        Some(&meta),
        "metadata must round-trip"
    );
    assert_eq!(fetched.info.handle, handle);

    store.delete(&handle).await?;
    Ok(())
}

async fn get_missing_is_not_found(store: &dyn BlobStore) -> Result<(), StoreError> {
    let meta = sample_metadata("never.bin", 0);
    let handle = store.locate(&meta.stored_name);
    let err = store
        .get(&handle)
        .await
        .expect_err("get of a never-stored blob must fail");
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
    Ok(())
}

async fn delete_is_idempotent(store: &dyn BlobStore) -> Result<(), StoreError> {
    let meta = sample_metadata("doomed.txt", 4);
    let handle = store.put(&meta, Bytes::from_static(b"bye!")).await?;

    assert_eq!(store.delete(&handle).await?, Deletion::Removed);
    assert_eq!(store.delete(&handle).await?, Deletion::AlreadyGone);

    let err = store
        .get(&handle)
        .await
        .expect_err("deleted blob must not resolve");
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
    Ok(())
}

async fn put_never_overwrites(store: &dyn BlobStore) -> Result<(), StoreError> {
    let meta = sample_metadata("once.txt", 5);
    let handle = store.put(&meta, Bytes::from_static(b"first")).await?;

    let second = store.put(&meta, Bytes::from_static(b"other")).await;
    assert!(
        matches!(second, Err(StoreError::AlreadyExists(_))),
        "second put under the same name must be rejected, got {second:?}"
    );
    assert_eq!(store.get(&handle).await?.data, Bytes::from_static(b"first"));

    store.delete(&handle).await?;
    Ok(())
}

async fn list_reports_metadata_and_restarts(store: &dyn BlobStore) -> Result<(), StoreError> {
    let first = sample_metadata("one.txt", 1);
    let second = sample_metadata("two.png", 2);
    let h1 = store.put(&first, Bytes::from_static(b"1")).await?;
    let h2 = store.put(&second, Bytes::from_static(b"22")).await?;

    for _ in 0..2 {
        let listed = collect_listing(store).await?;
        let handles: HashSet<&Handle> = listed.iter().map(|info| &info.handle).collect();
        assert!(handles.contains(&h1) && handles.contains(&h2));

        let info = listed
            .iter()
            .find(|info| info.handle == h1)
            .expect("listed above");
        assert_eq!(info.metadata.as_ref(), Some(&first));
        assert!(info.expires_at(Duration::ZERO).is_some());
    }

    store.delete(&h1).await?;
    let listed = collect_listing(store).await?;
    assert!(
        listed.iter().all(|info| info.handle != h1),
        "deleted blob must drop out of the listing"
    );

    store.delete(&h2).await?;
    Ok(())
}

async fn locate_matches_put(store: &dyn BlobStore) -> Result<(), StoreError> {
    let meta = sample_metadata("where.json", 2);
    let handle = store.put(&meta, Bytes::from_static(b"{}")).await?;
    assert_eq!(store.locate(&meta.stored_name), handle);
    store.delete(&handle).await?;
    Ok(())
}

async fn collect_listing(store: &dyn BlobStore) -> Result<Vec<ObjectInfo>, StoreError> {
    let mut out = Vec::new();
    let mut listing = store.list();
    while let Some(item) = listing.next().await {
        out.push(item?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_conformance() {
        let store = MemoryBlobStore::new();
        run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn stale_listing_keeps_deleted_objects() {
        let store = MemoryBlobStore::new().with_stale_listing();
        let meta = sample_metadata("ghost.txt", 1);
        let handle = store.put(&meta, Bytes::from_static(b"g")).await.unwrap();
        store.delete(&handle).await.unwrap();

        let listed = collect_listing(&store).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.delete(&handle).await.unwrap(), Deletion::AlreadyGone);
    }

    #[tokio::test]
    async fn failing_listing_yields_plain_error() {
        let store = MemoryBlobStore::new();
        store.fail_listing(true);
        let err = collect_listing(&store).await.unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn per_record_listing_error_is_scoped() {
        let store = MemoryBlobStore::new();
        let handle = store.insert_raw("broken", None, None, Bytes::new());
        store.fail_listing_record(&handle, "head failed");

        let mut listing = store.list();
        let item = listing.next().await.unwrap();
        match item {
            Err(StoreError::Record { handle: h, .. }) => assert_eq!(h, handle),
            other => panic!("expected record error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversize_put_is_rejected() {
        let store = MemoryBlobStore::new().with_max_object_bytes(2);
        let meta = sample_metadata("big.bin", 3);
        let err = store.put(&meta, Bytes::from_static(b"abc")).await.unwrap_err();
        assert!(matches!(err, StoreError::PayloadTooLarge { size: 3, limit: 2 }));
        assert!(store.is_empty());
    }

    #[test]
    fn expiry_prefers_metadata_then_last_modified() {
        let meta = sample_metadata("x.txt", 1);
        let modified = DateTime::from_timestamp_millis(1_000).unwrap();

        let with_meta = ObjectInfo {
            handle: Handle::new("a"),
            metadata: Some(meta.clone()),
            last_modified: Some(modified),
        };
        assert_eq!(with_meta.expires_at(Duration::from_secs(5)), Some(meta.expires_at));

        let degraded = ObjectInfo {
            handle: Handle::new("b"),
            metadata: None,
            last_modified: Some(modified),
        };
        assert_eq!(
            degraded.expires_at(Duration::from_secs(5)),
            DateTime::from_timestamp_millis(6_000)
        );

        let unknown = ObjectInfo {
            handle: Handle::new("c"),
            metadata: None,
            last_modified: None,
        };
        assert_eq!(unknown.expires_at(Duration::from_secs(5)), None);
    }
}
