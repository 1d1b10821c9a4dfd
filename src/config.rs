//! Code generator configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounds on the temporary pool size of each register class.
pub const MIN_TEMP_COUNT: u8 = 4;
pub const MAX_TEMP_COUNT: u8 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} must be between {} and {}, got {value}", MIN_TEMP_COUNT, MAX_TEMP_COUNT)]
    TempCount { field: &'static str, value: u8 },
}

/// JIT configuration (jit.toml)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Produce an annotated listing of the generated code
    pub dump_code: bool,
    /// Temporary GP registers, starting at x0
    pub gp_temp_count: u8,
    /// Temporary vector registers, starting at d16
    pub vec_temp_count: u8,
    /// Pin number and non-pointer registers to callee-saved registers
    pub pin_registers: bool,
    /// Pass inline property cache pointers to property helpers
    pub property_caching: bool,
    /// Replace every type guard by a branch to the slow path
    pub always_slow_path: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            dump_code: false,
            gp_temp_count: MAX_TEMP_COUNT,
            vec_temp_count: MAX_TEMP_COUNT,
            pin_registers: true,
            property_caching: true,
            always_slow_path: false,
        }
    }
}

impl JitConfig {
    pub fn from_toml(src: &str) -> Result<Self, ConfigError> {
        let config: JitConfig = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("gp_temp_count", self.gp_temp_count),
            ("vec_temp_count", self.vec_temp_count),
        ] {
            if !(MIN_TEMP_COUNT..=MAX_TEMP_COUNT).contains(&value) {
                return Err(ConfigError::TempCount { field, value });
            }
        }
        Ok(())
    }
}
