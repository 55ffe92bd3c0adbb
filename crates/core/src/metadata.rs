use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::truncate_to_millis;
use crate::error::VanishError;
use crate::mime::content_type_for;
use crate::types::{BlobId, StoredName};

/// Keys under which [`BlobMetadata`] is attached to objects in backends that
/// support string key/value metadata.
pub mod keys {
    pub const ORIGINAL_FILENAME: &str = "original-filename";
    pub const EXPIRES_AT: &str = "expires-at";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const CREATED_AT: &str = "created-at";
    pub const SIZE_BYTES: &str = "size-bytes";
}

/// Persisted record describing one uploaded blob.
///
/// Immutable once written. `expires_at` is always `created_at + ttl` and is
/// stored next to the payload so that any process can decide expiry from
/// the persisted record alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    /// Unique blob identifier.
    pub id: BlobId,
    /// Name the payload is stored under (`id` plus extension).
    pub stored_name: StoredName,
    /// Sanitized original filename supplied by the uploader.
    pub original_filename: String,
    /// MIME content type recorded at upload time.
    pub content_type: String,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// Upload time (epoch milliseconds on the wire).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Instant after which the blob must no longer be served.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl BlobMetadata {
    /// Build the record for a fresh upload.
    pub fn new(
        stored_name: StoredName,
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: u64,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let created_at = truncate_to_millis(created_at);
        Self {
            id: stored_name.id(),
            stored_name,
            original_filename: original_filename.into(),
            content_type: content_type.into(),
            size_bytes,
            created_at,
            expires_at: expiry_after(created_at, ttl),
        }
    }

    /// Whether the blob must be treated as gone at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Flatten into string pairs for object-store user metadata.
    ///
    /// Timestamps are epoch milliseconds; the filename is percent-encoded
    /// because header-borne metadata must stay ASCII.
    pub fn to_user_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                keys::ORIGINAL_FILENAME.to_owned(),
                percent_encoding::utf8_percent_encode(
                    &self.original_filename,
                    percent_encoding::NON_ALPHANUMERIC,
                )
                .to_string(),
            ),
            (
                keys::EXPIRES_AT.to_owned(),
                self.expires_at.timestamp_millis().to_string(),
            ),
            (keys::CONTENT_TYPE.to_owned(), self.content_type.clone()),
            (
                keys::CREATED_AT.to_owned(),
                self.created_at.timestamp_millis().to_string(),
            ),
            (keys::SIZE_BYTES.to_owned(), self.size_bytes.to_string()),
        ])
    }

    /// Rebuild a record from object-store user metadata.
    ///
    /// `expires-at` is mandatory; without it the record cannot be trusted
    /// and the caller has to fall back to degraded expiry rules. The other
    /// keys are filled from the object's own attributes when missing.
    #[allow(clippy::implicit_hasher)]
    pub fn from_user_metadata(
        stored_name: &StoredName,
        map: &HashMap<String, String>,
        object_size: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Result<Self, VanishError> {
        let expires_at = map
            .get(keys::EXPIRES_AT)
            .and_then(|raw| parse_epoch_millis(raw))
            .ok_or_else(|| {
                VanishError::InvalidMetadata(format!(
                    "{stored_name}: missing or malformed {}",
                    keys::EXPIRES_AT
                ))
            })?;

        let created_at = map
            .get(keys::CREATED_AT)
            .and_then(|raw| parse_epoch_millis(raw))
            .or(last_modified)
            .unwrap_or(expires_at);

        let original_filename = map
            .get(keys::ORIGINAL_FILENAME)
            .and_then(|raw| percent_encoding::percent_decode_str(raw).decode_utf8().ok())
            .map_or_else(|| stored_name.to_string(), |name| name.into_owned());

        let content_type = map
            .get(keys::CONTENT_TYPE)
            .filter(|ct| !ct.is_empty())
            .cloned()
            .unwrap_or_else(|| content_type_for(stored_name.extension()).to_owned());

        let size_bytes = map
            .get(keys::SIZE_BYTES)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(object_size);

        Ok(Self {
            id: stored_name.id(),
            stored_name: stored_name.clone(),
            original_filename,
            content_type,
            size_bytes,
            created_at,
            expires_at,
        })
    }
}

/// `at + ttl`, saturating at the largest representable instant.
#[must_use]
pub fn expiry_after(at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    TimeDelta::try_milliseconds(millis)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_epoch_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}
