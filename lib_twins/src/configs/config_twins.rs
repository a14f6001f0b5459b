use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "config.twins.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Service configuration. Every field is optional so layers can be merged.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TwinsConfig {
    /// Channel that receives operation notifications. Disabled when unset.
    pub notify_channel: Option<String>,
    /// Directory for log files.
    pub log_dir: Option<PathBuf>,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: Option<String>,
}

impl TwinsConfig {
    pub fn defaults() -> Self {
        Self {
            notify_channel: None,
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
        }
    }

    // Merge two configs, where 'other' overrides 'self' for Some values
    pub fn merge(self, other: TwinsConfig) -> TwinsConfig {
        TwinsConfig {
            notify_channel: other.notify_channel.or(self.notify_channel),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    /// Reads a JSON config file. A missing file yields an empty layer.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("Config file not found at {}. Using defaults and environment.", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The `TWINS_*` variables as a config layer.
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            notify_channel: lookup("TWINS_NOTIFY_CHANNEL"),
            log_dir: lookup("TWINS_LOG_DIR").map(PathBuf::from),
            log_level: lookup("TWINS_LOG_LEVEL"),
        }
    }

    /// Defaults, then the config file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    /// [`TwinsConfig::load`] with a custom variable lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        Ok(Self::defaults()
            .merge(Self::from_file(&path)?)
            .merge(Self::from_env_with(lookup)))
    }
}
