//! Durable store implementations

pub mod file;
pub mod memory;

pub use file::FileDataStore;
pub use memory::MemoryDataStore;
