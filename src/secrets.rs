//! Read-only secret lookup

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::config::SecretsConfig;
use crate::error::{Error, Result};

/// Secret lookup by `group/key` name
#[async_trait]
pub trait SecretManager: Send + Sync {
    async fn get(&self, name: &str) -> Result<String>;
}

/// Reads secrets mounted as files, falling back to environment variables.
///
/// `db/password` resolves to `<path>/db/password`, then to the variable
/// `<env_prefix>DB_PASSWORD`. Names that would leave `path` are rejected.
#[derive(Debug, Clone)]
pub struct FileEnvSecretManager {
    path: PathBuf,
    env_prefix: String,
}

impl FileEnvSecretManager {
    pub fn new(config: &SecretsConfig) -> Self {
        Self {
            path: config.path.clone(),
            env_prefix: config.env_prefix.clone(),
        }
    }

    fn file_path(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::SecretNotFound(format!(
                "{name:?} is not a valid secret name"
            )));
        }
        Ok(self.path.join(relative))
    }

    fn env_var_name(&self, name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| match c {
                '/' | '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.env_prefix, suffix)
    }
}

#[async_trait]
impl SecretManager for FileEnvSecretManager {
    async fn get(&self, name: &str) -> Result<String> {
        let path = self.file_path(name)?;
        match fs::read_to_string(&path).await {
            Ok(value) => return Ok(value.trim_end_matches('\n').to_string()),
            Err(e) => debug!("Secret file {} not readable: {}", path.display(), e),
        }

        let var = self.env_var_name(name);
        std::env::var(&var).map_err(|_| {
            Error::SecretNotFound(format!("{name} (looked in {} and ${var})", path.display()))
        })
    }
}
