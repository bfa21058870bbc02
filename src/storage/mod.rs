//! Durable store adapter
//!
//! The runtime only needs a narrow blob interface: write, read and head by
//! reference. Errors are classified so callers can tell connectivity problems
//! (retryable) from permission and not-found errors (permanent).

pub mod backends;
pub mod error;
pub mod traits;
pub mod types;

pub use backends::{FileDataStore, MemoryDataStore};
pub use error::{StorageError, StorageResult};
pub use traits::DataStore;
pub use types::{content_digest, DataRef, ObjectMetadata};
