pub mod clock;
pub mod error;
pub mod filename;
pub mod metadata;
pub mod mime;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::VanishError;
pub use metadata::BlobMetadata;
pub use types::{BlobId, StoredName};

/// Default time-to-live for an uploaded file, in milliseconds.
pub const DEFAULT_TTL_MS: u64 = 60_000;

/// Default maximum accepted upload size (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
