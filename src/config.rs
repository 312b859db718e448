//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/opcda_write.toml` by default)
//! 2. environment variables prefixed with `OPCDA_WRITE_`, with `__` separating
//!    nested keys (e.g. `OPCDA_WRITE_NODE__GROUP_ID=line3`)
//!
//! # Example
//! ```no_run
//! use opcda_write::config::WriterConfig;
//!
//! let config = WriterConfig::load()?;
//! config.validate()?;
//! println!("Writing group {} on {}", config.node.group_id, config.node.server);
//! # Ok::<(), opcda_write::error::WriteError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppResult, WriteError};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/opcda_write.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "OPCDA_WRITE_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WriterConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Write node settings
    #[serde(default)]
    pub node: NodeConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which server connection and group a coordinator writes through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name of the server connection to use. Empty means none selected.
    #[serde(default)]
    pub server: String,
    /// Group name opened on the server.
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_name() -> String {
    "OPC DA Write".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_group_id() -> String {
    "opcda-write".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            group_id: default_group_id(),
        }
    }
}

impl WriterConfig {
    /// Load configuration from the default file and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment variables
    /// still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(WriterConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(WriteError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.node.server.trim().is_empty() {
            return Err(WriteError::NoServer);
        }

        if self.node.group_id.trim().is_empty() {
            return Err(WriteError::Configuration(
                "group_id must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
