//! Resumable plugin state
//!
//! Plugin state is opaque to the runtime. It is restored at the start of every
//! pass from the `(codec version, bytes)` pair kept in the node's status
//! record, mutated in memory by the plugin, and re-encoded by the caller when
//! the pass ends. The codec version travels with the bytes so that a
//! controller upgrade can migrate or reject older encodings instead of
//! misreading them.

pub mod codec;
pub mod migration;
pub mod store;

pub use codec::{StateFrame, CURRENT_CODEC_VERSION};
pub use migration::{MigrationFn, MigrationRegistry};
pub use store::{PersistedState, PluginStateHandle, PluginStateStore, StatePhase};
