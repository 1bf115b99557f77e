//! TOML configuration for the test-case runner

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::ConfigError;
use crate::task::DEFAULT_TIMEOUT_MS;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "otter_testcase.toml";

/// Runner configuration loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Per-test budget in milliseconds for cases that do not set one (0 = zero-length budget)
    pub default_timeout_ms: u64,

    /// Only run tests whose name contains this substring
    pub filter: Option<String>,

    /// Colored report output
    pub color: bool,

    /// Emit the summary as JSON instead of text
    pub json: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            filter: None,
            color: true,
            json: false,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if it exists, falling
    /// back to defaults when the file is missing or broken.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Self::default();
                }
                default_path
            }
        };

        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}", e);
                Self::default()
            }
        }
    }
}
