//! Whole-system configuration: one struct per component, loadable from JSON.

use crate::cache::CacheConfig;
use crate::error::{Error, Result};
use crate::interconnect::InterconnectConfig;
use crate::memory::MemoryConfig;
use crate::workload::WorkloadConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Largest number of lines (sets x ways) in one private cache.
pub const MAX_CACHE_LINES: usize = 1 << 16;

/// Everything a run needs besides the protocol and the seed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub cache: CacheConfig,
    pub memory: MemoryConfig,
    pub interconnect: InterconnectConfig,
    pub workload: WorkloadConfig,
}

impl SystemConfig {
    /// Reads a JSON file; missing sections and fields fall back to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: SystemConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.workload.validate()?;
        if self.cache.associativity == 0 {
            return Err(Error::InvalidConfig("cache associativity must be at least 1".into()));
        }
        if !self.cache.num_sets.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "cache set count {} is not a power of two",
                self.cache.num_sets
            )));
        }
        let lines = self.cache.num_sets.checked_mul(self.cache.associativity);
        if !lines.is_some_and(|n| n <= MAX_CACHE_LINES) {
            return Err(Error::InvalidConfig(format!(
                "cache of {} sets x {} ways exceeds {MAX_CACHE_LINES} lines",
                self.cache.num_sets, self.cache.associativity
            )));
        }
        Ok(())
    }
}
