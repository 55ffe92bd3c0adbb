use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VanishError;

/// Longest file extension carried over from an original filename.
pub const MAX_EXTENSION_LEN: usize = 16;

/// Globally unique identifier of an uploaded blob.
///
/// Generated independently of the original filename so that client input
/// never influences where a blob is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    /// Generate a fresh random identifier.
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for BlobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Always the lowercase hyphenated form; parsing accepts only that form.
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for BlobId {
    type Err = VanishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::try_parse(s).map_err(|_| VanishError::InvalidBlobId(s.to_owned()))?;
        let id = Self(uuid);
        if id.to_string() != s {
            return Err(VanishError::InvalidBlobId(s.to_owned()));
        }
        Ok(id)
    }
}

/// Name under which a blob is stored: its [`BlobId`] plus an optional
/// extension taken from the original filename (e.g. `"<uuid>.txt"`).
///
/// This is also the path segment of the public retrieval URL. Parsing is
/// strict, so a value that round-trips through [`StoredName::parse`] can
/// never contain a path separator or a `..` component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoredName {
    id: BlobId,
    extension: Option<String>,
}

impl StoredName {
    /// Build a stored name from an id and an already-validated extension.
    ///
    /// Extensions failing validation are dropped rather than rejected.
    #[must_use]
    pub fn new(id: BlobId, extension: Option<&str>) -> Self {
        Self {
            id,
            extension: extension.and_then(normalize_extension),
        }
    }

    /// Derive the stored name for `id` from a client-supplied filename.
    #[must_use]
    pub fn for_upload(id: BlobId, original_filename: &str) -> Self {
        Self {
            id,
            extension: extension_of(original_filename),
        }
    }

    /// Parse a stored name from a URL path segment.
    pub fn parse(raw: &str) -> Result<Self, VanishError> {
        let (id_part, ext_part) = match raw.split_once('.') {
            Some((id, ext)) => (id, Some(ext)),
            None => (raw, None),
        };

        let id = id_part
            .parse::<BlobId>()
            .map_err(|_| VanishError::InvalidStoredName(raw.to_owned()))?;

        let extension = match ext_part {
            None => None,
            Some(ext) => Some(
                normalize_extension(ext)
                    .filter(|normalized| normalized == ext)
                    .ok_or_else(|| VanishError::InvalidStoredName(raw.to_owned()))?,
            ),
        };

        Ok(Self { id, extension })
    }

    /// The blob identifier part.
    #[must_use]
    pub fn id(&self) -> BlobId {
        self.id
    }

    /// The lower-cased extension without the leading dot, if any.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }
}

impl fmt::Display for StoredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.extension {
            Some(ext) => write!(f, "{}.{ext}", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

impl FromStr for StoredName {
    type Err = VanishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoredName {
    type Error = VanishError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StoredName> for String {
    fn from(value: StoredName) -> Self {
        value.to_string()
    }
}

/// Extract a safe extension from a client-supplied filename.
///
/// Only the final path component is considered. Returns `None` when the
/// name has no extension or the extension is not short ASCII alphanumeric.
#[must_use]
pub fn extension_of(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() {
        // Dotfiles such as ".bashrc" have no extension.
        return None;
    }
    normalize_extension(ext)
}

fn normalize_extension(ext: &str) -> Option<String> {
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
