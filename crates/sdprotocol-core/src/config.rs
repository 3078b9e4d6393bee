//! Controller configuration stored as JSON
//!
//! Every field is optional; a missing file means all defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::{CatalogError, CycleDef, ProtocolCatalog, ProtocolDef};
use crate::engine::PacingConfig;
use crate::link::LinkConfig;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that was accessed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The file is not valid configuration JSON
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        /// File that was parsed
        path: PathBuf,
        /// Decoder error with line and column
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Serial link settings
    pub link: LinkConfig,

    /// Engine timing
    pub pacing: PacingConfig,

    /// Longest wait for the worker to exit on shutdown
    pub shutdown_timeout_ms: u64,

    /// Extra software-paced protocols, added after the built-in ones
    pub protocols: Vec<ProtocolDef>,

    /// Extra device-synchronized cycles
    pub cycles: Vec<CycleDef>,
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            pacing: PacingConfig::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            protocols: Vec::new(),
            cycles: Vec::new(),
        }
    }
}

impl ControllerConfig {
    /// `<config dir>/sdprotocol/config.json`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sdprotocol").join("config.json"))
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from a JSON file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Write as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_error)
    }

    /// Bound on the worker join at shutdown
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Built-in catalog extended with the configured entries
    pub fn catalog(&self) -> Result<ProtocolCatalog, CatalogError> {
        let mut catalog = ProtocolCatalog::builtin();
        catalog.extend_from_defs(&self.protocols, &self.cycles)?;
        Ok(catalog)
    }
}
