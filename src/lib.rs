//! # taskexec
//!
//! Per-node task execution runtime for a workflow orchestration controller.
//!
//! For every reconciliation pass over a node running a task, the runtime
//! assembles a capability-scoped [`context::TaskExecutionContext`], hands it to
//! the plugin selected by the task's type, then persists the plugin's state
//! and flushes its buffered events, in that order.
//!
//! ## Modules
//!
//! - `identity` - Stable, length-bounded execution names
//! - `state` - Versioned plugin state encoding, migrations and per-pass handles
//! - `events` - Buffered execution events and event sinks
//! - `output` - Output locations and immutable output writes
//! - `storage` - Durable store adapter and backends
//! - `context` - The per-pass facade handed to plugins
//! - `handler` - Context assembly and the reconciliation entry point
//! - `executor` - Bounded, per-node serialized pass execution
//! - `plugin` - Plugin trait, phases and registry
//! - `node`, `task`, `resources`, `secrets`, `catalog` - Boundary collaborators
//! - `testing` - In-memory collaborators for tests
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod handler;
pub mod identity;
pub mod logging;
pub mod node;
pub mod output;
pub mod plugin;
pub mod resources;
pub mod secrets;
pub mod state;
pub mod storage;
pub mod task;

pub mod testing;

pub use context::TaskExecutionContext;
pub use error::{Error, Result};
pub use executor::PassExecutor;
pub use handler::{PassOutcome, TaskHandler};
