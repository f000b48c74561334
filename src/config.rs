//! Runtime configuration loaded from TOML.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{SubstrateError, SubstrateResult};

/// Top level configuration for [`SubstrateRuntime`](crate::SubstrateRuntime).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub arena: ArenaConfig,
    pub hardware: HardwareConfig,
}

impl RuntimeConfig {
    pub fn from_toml_str(source: &str) -> SubstrateResult<Self> {
        let config: RuntimeConfig =
            toml::from_str(source).map_err(|err| SubstrateError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SubstrateResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|err| {
            SubstrateError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> SubstrateResult<String> {
        toml::to_string_pretty(self).map_err(|err| SubstrateError::Config(err.to_string()))
    }

    fn validate(&self) -> SubstrateResult<()> {
        if self.arena.cells < ArenaConfig::MIN_CELLS {
            return Err(SubstrateError::Config(format!(
                "arena.cells must be at least {}",
                ArenaConfig::MIN_CELLS
            )));
        }
        if self.arena.low_memory_percent > 100 {
            return Err(SubstrateError::Config(
                "arena.low_memory_percent must be within 0..=100".into(),
            ));
        }
        Ok(())
    }
}

/// Sizing of the cell pool and the byte budget for arena-owned buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Number of value cells available to scripts.
    pub cells: usize,
    /// Bytes available to arena-owned array buffers.
    pub buffer_bytes: usize,
    /// Usage percentage at which the `LOW_MEMORY` flag is raised.
    pub low_memory_percent: u8,
}

impl ArenaConfig {
    pub const MIN_CELLS: usize = 16;
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            cells: 4096,
            buffer_bytes: 64 * 1024,
            low_memory_percent: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Clock frequency reported by the software hardware layer before `setClock`.
    pub default_clock_hz: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            default_clock_hz: 64_000_000,
        }
    }
}
