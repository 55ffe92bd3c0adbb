use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::{HeadObjectError, HeadObjectOutput};
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tracing::{debug, error, info, instrument};

use vanish_core::{BlobMetadata, StoredName};
use vanish_store::{BlobStore, Deletion, Handle, Locality, ObjectInfo, StoreError, StoredObject};

use crate::auth::build_client;
use crate::config::S3StoreConfig;
use crate::error::classify_sdk_error;

/// Largest object S3 accepts in a single PUT request (5 GiB).
pub const MAX_SINGLE_PUT_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Blob store on an S3-compatible bucket.
pub struct S3BlobStore {
    config: S3StoreConfig,
    client: aws_sdk_s3::Client,
}

impl std::fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("config", &self.config)
            .field("client", &"<S3Client>")
            .finish()
    }
}

impl S3BlobStore {
    /// Create a store, building an SDK client from the environment.
    pub async fn connect(config: S3StoreConfig) -> Self {
        let client = build_client(&config).await;
        info!(bucket = %config.bucket, prefix = %config.prefix, "S3 blob store configured");
        Self { config, client }
    }

    /// Create a store with a pre-built client.
    pub fn with_client(config: S3StoreConfig, client: aws_sdk_s3::Client) -> Self {
        Self { config, client }
    }

    fn key_for(&self, name: &StoredName) -> String {
        format!("{}{name}", self.config.prefix)
    }

    fn handle_for_key(&self, key: &str) -> Handle {
        Handle::new(format!("s3://{}/{key}", self.config.bucket))
    }

    fn name_for_key(&self, key: &str) -> Option<StoredName> {
        key.strip_prefix(self.config.prefix.as_str())
            .and_then(|rest| StoredName::parse(rest).ok())
    }

    /// Map a handle back to an object key, refusing handles for other
    /// buckets or keys outside the prefix.
    fn resolve(&self, handle: &Handle) -> Option<(String, StoredName)> {
        let key = handle
            .as_str()
            .strip_prefix("s3://")?
            .strip_prefix(self.config.bucket.as_str())?
            .strip_prefix('/')?;
        let name = self.name_for_key(key)?;
        Some((key.to_owned(), name))
    }

    fn size_limit(&self) -> u64 {
        self.config
            .max_object_bytes
            .map_or(MAX_SINGLE_PUT_BYTES, |limit| limit.min(MAX_SINGLE_PUT_BYTES))
    }

    fn sdk_failure<E, R>(&self, operation: &str, err: &SdkError<E, R>) -> StoreError
    where
        E: std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let message = format!("S3 {operation} failed: {}", DisplayErrorContext(err));
        error!(error = %message, "S3 request failed");
        match err {
            SdkError::TimeoutError(_) => StoreError::Timeout(self.config.operation_timeout()),
            SdkError::DispatchFailure(_) => StoreError::BackendUnavailable(message),
            _ => classify_sdk_error(&message, self.config.operation_timeout()),
        }
    }

    fn describe(
        &self,
        key: &str,
        name: &StoredName,
        user_metadata: Option<&HashMap<String, String>>,
        content_length: Option<i64>,
        last_modified: Option<&S3DateTime>,
    ) -> ObjectInfo {
        let last_modified = last_modified.and_then(to_chrono);
        let size = content_length
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or_default();
        let metadata = user_metadata.and_then(|map| {
            BlobMetadata::from_user_metadata(name, map, size, last_modified)
                .inspect_err(|e| debug!(key = %key, error = %e, "object has no usable metadata"))
                .ok()
        });

        ObjectInfo {
            handle: self.handle_for_key(key),
            metadata,
            last_modified,
        }
    }

    async fn head(&self, key: &str) -> Result<Option<HeadObjectOutput>, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(Some(head)),
            Err(e)
                if e.as_service_error().is_some_and(HeadObjectError::is_not_found)
                    || status_of(&e) == Some(404) =>
            {
                Ok(None)
            }
            Err(e) => Err(self.sdk_failure("head_object", &e)),
        }
    }
}

fn to_chrono(at: &S3DateTime) -> Option<DateTime<Utc>> {
    at.to_millis().ok().and_then(DateTime::from_timestamp_millis)
}

fn status_of<E>(err: &SdkError<E, aws_sdk_s3::config::http::HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

/// Whether a failed conditional delete means someone else removed the
/// object between our HEAD and DELETE.
fn lost_delete_race(status: Option<u16>) -> bool {
    matches!(status, Some(404 | 412))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn locality(&self) -> Locality {
        Locality::Shared
    }

    fn locate(&self, name: &StoredName) -> Handle {
        self.handle_for_key(&self.key_for(name))
    }

    #[instrument(skip(self, metadata, data), fields(blob = %metadata.stored_name, size = data.len()))]
    async fn put(&self, metadata: &BlobMetadata, data: Bytes) -> Result<Handle, StoreError> {
        let size = data.len() as u64;
        let limit = self.size_limit();
        if size > limit {
            return Err(StoreError::PayloadTooLarge { size, limit });
        }

        let key = self.key_for(&metadata.stored_name);
        let handle = self.handle_for_key(&key);
        debug!(bucket = %self.config.bucket, key = %key, "uploading object to S3");

        // `If-None-Match: *` makes the write fail instead of replacing an
        // existing object.
        let result = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(&metadata.content_type)
            .set_metadata(Some(metadata.to_user_metadata()))
            .if_none_match("*")
            .body(ByteStream::from(data))
            .send()
            .await;

        match result {
            Ok(_) => Ok(handle),
            Err(e) if matches!(status_of(&e), Some(409 | 412)) => {
                Err(StoreError::AlreadyExists(handle.to_string()))
            }
            Err(e) => Err(self.sdk_failure("put_object", &e)),
        }
    }

    async fn get(&self, handle: &Handle) -> Result<StoredObject, StoreError> {
        let Some((key, name)) = self.resolve(handle) else {
            return Err(StoreError::NotFound(handle.to_string()));
        };

        let output = match self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error().is_some_and(GetObjectError::is_no_such_key)
                    || status_of(&e) == Some(404) =>
            {
                return Err(StoreError::NotFound(handle.to_string()));
            }
            Err(e) => return Err(self.sdk_failure("get_object", &e)),
        };

        let info = self.describe(
            &key,
            &name,
            output.metadata(),
            output.content_length(),
            output.last_modified(),
        );
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to read S3 body: {e}")))?
            .into_bytes();

        Ok(StoredObject { info, data })
    }

    #[instrument(skip(self), fields(handle = %handle))]
    async fn delete(&self, handle: &Handle) -> Result<Deletion, StoreError> {
        let Some((key, _)) = self.resolve(handle) else {
            return Ok(Deletion::AlreadyGone);
        };

        // S3 deletes succeed whether or not the key exists; a HEAD first
        // tells the two cases apart. The delete is conditional on the ETag
        // the HEAD saw, so of two racing deleters only one reports
        // `Removed`. Backends that ignore `If-Match` may still let both
        // through; the object is gone either way.
        let Some(head) = self.head(&key).await? else {
            return Ok(Deletion::AlreadyGone);
        };

        let mut request = self
            .client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&key);
        if let Some(etag) = head.e_tag() {
            request = request.if_match(etag);
        }

        match request.send().await {
            Ok(_) => {
                debug!(key = %key, "S3 object deleted");
                Ok(Deletion::Removed)
            }
            Err(e) if lost_delete_race(status_of(&e)) => {
                debug!(key = %key, "S3 object deleted concurrently");
                Ok(Deletion::AlreadyGone)
            }
            Err(e) => Err(self.sdk_failure("delete_object", &e)),
        }
    }

    fn list(&self) -> BoxStream<'_, Result<ObjectInfo, StoreError>> {
        let pages = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .prefix(&self.config.prefix)
            .into_paginator()
            .send();

        stream::unfold(
            (pages, VecDeque::<String>::new(), false),
            move |(mut pages, mut keys, done)| async move {
                loop {
                    if let Some(key) = keys.pop_front() {
                        let Some(name) = self.name_for_key(&key) else {
                            debug!(key = %key, "ignoring foreign object under prefix");
                            continue;
                        };
                        let item = match self.head(&key).await {
                            Ok(Some(head)) => Ok(self.describe(
                                &key,
                                &name,
                                head.metadata(),
                                head.content_length(),
                                head.last_modified(),
                            )),
                            Ok(None) => continue,
                            Err(e) => Err(e.for_record(self.handle_for_key(&key))),
                        };
                        return Some((item, (pages, keys, done)));
                    }
                    if done {
                        return None;
                    }
                    match pages.next().await {
                        None => return None,
                        Some(Ok(page)) => keys.extend(
                            page.contents()
                                .iter()
                                .filter_map(|object| object.key().map(str::to_owned)),
                        ),
                        Some(Err(e)) => {
                            let err = self.sdk_failure("list_objects_v2", &e);
                            return Some((Err(err), (pages, keys, true)));
                        }
                    }
                }
            },
        )
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::config::{BehaviorVersion, Region};
    use vanish_core::BlobId;

    use super::*;

    fn offline_store(config: S3StoreConfig) -> S3BlobStore {
        let client = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .region(Region::new("us-east-1"))
                .build(),
        );
        S3BlobStore::with_client(config, client)
    }

    #[test]
    fn handles_include_bucket_and_prefix() {
        let store = offline_store(S3StoreConfig::new("shared").with_prefix("tmp/"));
        let name = StoredName::for_upload(BlobId::new(), "a.txt");
        let handle = store.locate(&name);
        assert_eq!(handle.as_str(), format!("s3://shared/tmp/{name}"));

        let (key, resolved) = store.resolve(&handle).unwrap();
        assert_eq!(key, format!("tmp/{name}"));
        assert_eq!(resolved, name);
    }

    #[test]
    fn foreign_handles_do_not_resolve() {
        let store = offline_store(S3StoreConfig::new("shared").with_prefix("tmp/"));
        let name = StoredName::for_upload(BlobId::new(), "a.txt");

        for raw in [
            format!("s3://other/tmp/{name}"),
            format!("s3://shared/else/{name}"),
            "s3://shared/tmp/../secret".to_owned(),
            format!("/var/uploads/{name}"),
        ] {
            assert!(store.resolve(&Handle::new(raw.clone())).is_none(), "{raw}");
        }
    }

    #[test]
    fn size_limit_is_capped_by_single_put_limit() {
        let store = offline_store(S3StoreConfig::new("b"));
        assert_eq!(store.size_limit(), MAX_SINGLE_PUT_BYTES);

        let store = offline_store(S3StoreConfig::new("b").with_max_object_bytes(1024));
        assert_eq!(store.size_limit(), 1024);

        let store = offline_store(S3StoreConfig::new("b").with_max_object_bytes(u64::MAX));
        assert_eq!(store.size_limit(), MAX_SINGLE_PUT_BYTES);
    }

    #[test]
    fn conditional_delete_conflicts_count_as_already_gone() {
        assert!(lost_delete_race(Some(404)));
        assert!(lost_delete_race(Some(412)));
        assert!(!lost_delete_race(Some(403)));
        assert!(!lost_delete_race(Some(500)));
        assert!(!lost_delete_race(None));
    }

    #[test]
    fn reports_shared_locality() {
        let store = offline_store(S3StoreConfig::new("b"));
        assert_eq!(store.locality(), Locality::Shared);
        assert_eq!(store.backend_name(), "s3");
    }

    #[test]
    fn describe_falls_back_without_metadata() {
        let store = offline_store(S3StoreConfig::new("b"));
        let name = StoredName::for_upload(BlobId::new(), "x.bin");
        let key = store.key_for(&name);
        let modified = S3DateTime::from_millis(1_700_000_000_000);

        let info = store.describe(&key, &name, Some(&HashMap::new()), Some(5), Some(&modified));
        assert!(info.metadata.is_none());
        assert_eq!(
            info.last_modified,
            DateTime::from_timestamp_millis(1_700_000_000_000)
        );
    }
}
