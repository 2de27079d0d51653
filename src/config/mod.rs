//! Configuration module for ring-relay
//!
//! A run is described by a TOML file with two sections:
//!
//! ```toml
//! [pipeline]
//! stages = 8
//! mailbox_capacity = 8
//! result_capacity = 64
//! termination = "deliver"   # or "discard"
//!
//! [source]
//! count = 10
//! ```
//!
//! Every key is optional; missing keys take the `DEFAULT_*` values below.
//! Command line flags override whatever the file says.

pub mod settings;

pub use settings::*;

use crate::error::{RelayError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of stages in the ring
pub const DEFAULT_STAGES: usize = 8;

/// Default capacity of each stage mailbox
pub const DEFAULT_MAILBOX_CAPACITY: usize = 8;

/// Default capacity of the result sink
pub const DEFAULT_RESULT_CAPACITY: usize = 64;

/// Default number of buffered observability events
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default number of primes fed into the ring by the binary
pub const DEFAULT_PRIME_COUNT: usize = 10;

/// Complete configuration for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub source: SourceConfig,
}

impl RelayConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Write this configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))
    }
}
