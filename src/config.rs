//! Runtime configuration
//!
//! Built once at process start and injected into constructors. Loading from a
//! TOML file and environment overrides are provided for the bundled binary;
//! embedders can construct [`RuntimeConfig`] directly.

use humantime_serde::re::humantime::parse_duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::identity::{HASH_SUFFIX_LEN, ID_MAX_LENGTH};

const ENV_PREFIX: &str = "TASKEXEC_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of passes that may run concurrently across nodes
    pub workers: usize,
    /// Deadline for a single reconciliation pass
    #[serde(with = "humantime_serde")]
    pub pass_timeout: Duration,
    /// Maximum length of generated execution names
    pub id_max_length: usize,
    pub state: StateConfig,
    pub secrets: SecretsConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Upper bound on an encoded plugin state frame
    pub max_size_bytes: usize,
    /// Reject persisted fields the plugin's state type does not declare
    pub strict_decoding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Directory holding mounted secrets as `<group>/<key>` files
    pub path: PathBuf,
    /// Prefix of environment variables consulted when no file exists
    pub env_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            pass_timeout: Duration::from_secs(30),
            id_max_length: ID_MAX_LENGTH,
            state: StateConfig::default(),
            secrets: SecretsConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024,
            strict_decoding: false,
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/secrets"),
            env_prefix: "TASKEXEC_SECRET_".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {e}")))
    }

    /// Load a TOML file, apply environment overrides and validate
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("unable to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_from(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
    }

    fn merge_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(workers) = lookup("WORKERS").and_then(|v| v.parse().ok()) {
            self.workers = workers;
        }

        if let Some(timeout) = lookup("PASS_TIMEOUT").and_then(|v| parse_duration(&v).ok()) {
            self.pass_timeout = timeout;
        }

        if let Some(max_length) = lookup("ID_MAX_LENGTH").and_then(|v| v.parse().ok()) {
            self.id_max_length = max_length;
        }

        if let Some(strict) = lookup("STRICT_STATE").and_then(|v| v.parse().ok()) {
            self.state.strict_decoding = strict;
        }

        if let Some(path) = lookup("SECRETS_PATH") {
            self.secrets.path = PathBuf::from(path);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Configuration("workers must be at least 1".into()));
        }
        if self.id_max_length < HASH_SUFFIX_LEN {
            return Err(Error::Configuration(format!(
                "id_max_length must be at least {HASH_SUFFIX_LEN}, got {}",
                self.id_max_length
            )));
        }
        if self.pass_timeout.is_zero() {
            return Err(Error::Configuration("pass_timeout must be positive".into()));
        }
        Ok(())
    }
}
