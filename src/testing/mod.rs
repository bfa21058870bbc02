//! Testing utilities and fixtures
//!
//! In-memory implementations of every boundary collaborator, so a pass can
//! run end to end without a controller, a blob store or a catalog service.

pub mod fixtures;
pub mod mocks;

pub use fixtures::InMemoryNodeContext;
pub use mocks::{
    MemoryCatalog, MemoryNodeStateWriter, MemoryOwnerQueue, StaticSecretManager, StaticTaskReader,
};
