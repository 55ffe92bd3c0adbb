mod config;
mod store;

pub use config::LocalConfig;
pub use store::LocalBlobStore;
