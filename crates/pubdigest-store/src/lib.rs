//! pubdigest-store: JSON document storage.
//!
//! Every stage reads and writes whole JSON documents by key. [`ObjectStore`]
//! is the seam; production uses [`S3ObjectStore`], local runs use
//! [`FsObjectStore`], tests use [`MemoryObjectStore`].

pub mod error;
pub mod fs;
pub mod memory;
pub mod s3;
mod sigv4;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::{S3Credentials, S3ObjectStore};
pub use store::{read_json, write_json, ListFilter, ObjectMeta, ObjectStore, JSON_CONTENT_TYPE};
