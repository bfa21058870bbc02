//! Codec migrations between persisted plugin state versions

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Rewrites bytes persisted under one codec version into another.
pub type MigrationFn = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// Registered migrations keyed by exact `(from, to)` codec version pairs.
///
/// Migrations are not chained: restoring `v0` state into a `v2` build needs a
/// registered `(0, 2)` migration even if `(0, 1)` and `(1, 2)` exist.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    migrations: HashMap<(u32, u32), MigrationFn>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration from codec version `from` to `to`
    pub fn register<F>(&mut self, from: u32, to: u32, migrate: F) -> Result<()>
    where
        F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        if from == to {
            return Err(Error::Configuration(format!(
                "migration from codec version {from} to itself"
            )));
        }
        if self.migrations.contains_key(&(from, to)) {
            return Err(Error::Configuration(format!(
                "migration {from} -> {to} already registered"
            )));
        }
        self.migrations.insert((from, to), Arc::new(migrate));
        Ok(())
    }

    pub fn get(&self, from: u32, to: u32) -> Option<&MigrationFn> {
        self.migrations.get(&(from, to))
    }

    pub fn contains(&self, from: u32, to: u32) -> bool {
        self.migrations.contains_key(&(from, to))
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<_> = self.migrations.keys().collect();
        pairs.sort();
        f.debug_struct("MigrationRegistry")
            .field("migrations", &pairs)
            .finish()
    }
}
