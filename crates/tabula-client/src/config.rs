//! Client configuration, stored as RON.
//!
//! Looked up at `<config dir>/tabula/client.ron` unless a path is given.
//! Every field is optional in the file:
//!
//! ```ron
//! (
//!     endpoint: "agent.example.com:7878",
//!     user_id: "alice",
//!     mode: edit,
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabula_types::JobMode;
use tracing::debug;

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, CONNECT_TIMEOUT, DEFAULT_ENDPOINT, DEFAULT_USER_ID,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON write error: {0}")]
    RonWrite(#[from] ron::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend endpoint, `host:port` or `tcp://host:port`.
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    pub user_id: String,
    pub mode: JobMode,
    /// How many applied job ids the command router remembers.
    pub applied_job_memory: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_secs: CONNECT_TIMEOUT.as_secs(),
            user_id: DEFAULT_USER_ID.to_string(),
            mode: JobMode::default(),
            applied_job_memory: tabula_sheet::router::MAX_APPLIED_JOBS,
        }
    }
}

impl ClientConfig {
    /// `<config dir>/tabula/client.ron`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_ron(&text)?;
        debug!("Loaded client config from {}", path.display());
        Ok(config)
    }

    /// Load from `path` if given (it must exist), else from the default path
    /// if that file exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omitted_fields_take_defaults() {
        let config = ClientConfig::from_ron(r#"(endpoint: "10.0.0.5:9000", mode: edit)"#).unwrap();
        assert_eq!(config.endpoint, "10.0.0.5:9000");
        assert_eq!(config.mode, JobMode::Edit);
        assert_eq!(config.user_id, DEFAULT_USER_ID);
        assert_eq!(config.connect_timeout(), CONNECT_TIMEOUT);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(ClientConfig::from_ron("()").unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.ron");
        let mut config = ClientConfig::default();
        config.user_id = "alice".into();
        std::fs::write(&path, config.to_ron().unwrap()).unwrap();

        assert_eq!(ClientConfig::load(&path).unwrap(), config);
        assert!(matches!(
            ClientConfig::load(&dir.path().join("missing.ron")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ClientConfig::from_ron("(endpoint: 42)"),
            Err(ConfigError::Ron(_))
        ));
    }
}
