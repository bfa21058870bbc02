//! Plugin state store and the per-pass state handle

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::codec::{decode_value, encode_value, StateFrame, CURRENT_CODEC_VERSION};
use super::migration::MigrationRegistry;
use crate::config::StateConfig;
use crate::error::{Error, Result};

/// The `(version, bytes)` pair kept in the node's status record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub bytes: Vec<u8>,
}

impl PersistedState {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Lifecycle of a state handle within one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePhase {
    /// No prior state existed
    Empty,
    /// Prior state restored and untouched
    Loaded,
    /// Written or reset during this pass
    Dirty,
    /// Encoded for persistence
    Persisted,
}

/// Restores plugin state handles and owns the registered codec migrations.
#[derive(Debug, Clone)]
pub struct PluginStateStore {
    migrations: MigrationRegistry,
    max_size_bytes: usize,
    strict: bool,
}

impl PluginStateStore {
    pub fn new(config: &StateConfig, migrations: MigrationRegistry) -> Self {
        Self {
            migrations,
            max_size_bytes: config.max_size_bytes,
            strict: config.strict_decoding,
        }
    }

    pub fn codec_version(&self) -> u32 {
        CURRENT_CODEC_VERSION
    }

    /// Restore the state persisted by the previous pass.
    ///
    /// Empty bytes yield an empty handle whatever the version. Bytes written
    /// under another codec version are migrated first, or rejected with
    /// [`Error::StateVersionMismatch`] when no exact migration exists.
    pub fn restore(&self, prior_version: u32, prior_bytes: &[u8]) -> Result<PluginStateHandle> {
        if prior_bytes.is_empty() {
            debug!("No prior plugin state, starting empty");
            return Ok(self.handle(None));
        }

        let frame = if prior_version == CURRENT_CODEC_VERSION {
            StateFrame::decode(prior_bytes)?
        } else {
            let migrate = self
                .migrations
                .get(prior_version, CURRENT_CODEC_VERSION)
                .ok_or(Error::StateVersionMismatch {
                    found: prior_version,
                    expected: CURRENT_CODEC_VERSION,
                })?;
            info!(
                "Migrating plugin state from codec version {} to {}",
                prior_version, CURRENT_CODEC_VERSION
            );
            let migrated = migrate(prior_bytes)?;
            StateFrame::decode(&migrated)?
        };

        debug!(
            "Restored plugin state version {} ({} payload bytes)",
            frame.state_version,
            frame.payload.len()
        );
        Ok(self.handle(Some(frame)))
    }

    fn handle(&self, loaded: Option<StateFrame>) -> PluginStateHandle {
        let phase = if loaded.is_some() {
            StatePhase::Loaded
        } else {
            StatePhase::Empty
        };
        PluginStateHandle {
            loaded,
            pending: None,
            cleared: false,
            phase,
            max_size_bytes: self.max_size_bytes,
            strict: self.strict,
        }
    }
}

/// Plugin state for exactly one pass.
///
/// Reads always observe the state as restored at the start of the pass;
/// writes become visible to the next pass once the caller persists them.
#[derive(Debug)]
pub struct PluginStateHandle {
    loaded: Option<StateFrame>,
    pending: Option<StateFrame>,
    cleared: bool,
    phase: StatePhase,
    max_size_bytes: usize,
    strict: bool,
}

impl PluginStateHandle {
    pub fn phase(&self) -> StatePhase {
        self.phase
    }

    /// Raw payload restored for this pass, `None` when nothing was found
    pub fn read(&self) -> Option<&[u8]> {
        self.loaded.as_ref().map(|f| f.payload.as_slice())
    }

    /// Schema version of the restored state, 0 when nothing was found
    pub fn state_version(&self) -> u8 {
        self.loaded.as_ref().map(|f| f.state_version).unwrap_or(0)
    }

    /// Decode the restored payload into `T`
    pub fn get<T>(&self) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        match &self.loaded {
            None => Ok(None),
            Some(frame) => decode_value(frame.state_version, &frame.payload, self.strict).map(Some),
        }
    }

    /// Replace the state with a raw payload, keeping the current state version
    pub fn write(&mut self, payload: Vec<u8>) -> Result<()> {
        let state_version = self
            .pending
            .as_ref()
            .map(|f| f.state_version)
            .unwrap_or_else(|| self.state_version());
        self.write_versioned(state_version, payload)
    }

    /// Replace the state with a raw payload under `state_version`
    pub fn write_versioned(&mut self, state_version: u8, payload: Vec<u8>) -> Result<()> {
        let frame = StateFrame::new(state_version, payload);
        let size = frame.encode().len();
        if size > self.max_size_bytes {
            return Err(Error::StateTooLarge {
                size,
                limit: self.max_size_bytes,
            });
        }
        self.pending = Some(frame);
        self.cleared = false;
        self.phase = StatePhase::Dirty;
        Ok(())
    }

    /// Encode `value` and replace the state with it
    pub fn put<T: Serialize>(&mut self, state_version: u8, value: &T) -> Result<()> {
        let payload = encode_value(value)?;
        self.write_versioned(state_version, payload)
    }

    /// Drop all state; the next pass starts empty
    pub fn reset(&mut self) {
        self.pending = None;
        self.cleared = true;
        self.phase = StatePhase::Dirty;
    }

    /// Encode the state to hand back to the node's status record.
    ///
    /// Untouched state carries over unchanged. Repeated calls without an
    /// intervening write return identical bytes.
    pub fn persist(&mut self) -> PersistedState {
        let frame = if self.cleared {
            None
        } else {
            self.pending.as_ref().or(self.loaded.as_ref())
        };
        let bytes = frame.map(StateFrame::encode).unwrap_or_default();
        self.phase = StatePhase::Persisted;
        PersistedState {
            version: CURRENT_CODEC_VERSION,
            bytes,
        }
    }
}
