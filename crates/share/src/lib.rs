pub mod error;
pub mod ingest;
pub mod serve;

pub use error::ShareError;
pub use ingest::{IncomingUpload, IngestConfig, UploadIngestor, UploadReceipt};
pub use serve::{FileServer, ServedFile};
