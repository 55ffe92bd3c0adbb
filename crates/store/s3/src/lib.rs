//! Durable blob store on any S3-compatible object store.
//!
//! Payloads are stored as objects under an optional key prefix; their
//! [`BlobMetadata`](vanish_core::BlobMetadata) travels as object user
//! metadata, so every instance sharing the bucket sees the same expiry.

pub mod auth;
pub mod config;
pub mod error;
mod store;

pub use config::S3StoreConfig;
pub use store::S3BlobStore;
