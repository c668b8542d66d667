//! Bridge configuration loaded from TOML
//!
//! # Format
//!
//! ```toml
//! [pool]
//! policy = "size_classed"      # or "exact_size"
//! min_class_size = 16
//! max_class_size = 65536
//! max_retained_per_class = 256
//!
//! [store]
//! max_append_entries = 100
//!
//! [bridge]
//! initial_scratch_capacity = 4096
//! fault_channel_capacity = 64
//! ```
//!
//! Every key is optional; missing keys take the defaults shown above.

use serde::Deserialize;
use std::path::Path;
use void_crdt::StoreConfig;
use void_memory::{PoolConfig, PoolPolicy};

use crate::error::ConfigError;

/// Largest size class a pool may be configured with
const MAX_CLASS_LIMIT: usize = 1 << 30;

/// Pool policy as spelled in configuration files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySetting {
    #[default]
    SizeClassed,
    ExactSize,
}

impl From<PolicySetting> for PoolPolicy {
    fn from(setting: PolicySetting) -> Self {
        match setting {
            PolicySetting::SizeClassed => PoolPolicy::SizeClassed,
            PolicySetting::ExactSize => PoolPolicy::ExactSize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    pub policy: PolicySetting,
    pub min_class_size: usize,
    pub max_class_size: usize,
    pub max_retained_per_class: usize,
}

impl Default for PoolSection {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            policy: PolicySetting::default(),
            min_class_size: defaults.min_class_size,
            max_class_size: defaults.max_class_size,
            max_retained_per_class: defaults.max_retained_per_class,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub max_append_entries: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            max_append_entries: StoreConfig::default().max_append_entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSection {
    /// Bytes reserved up front for the outgoing encode buffer
    pub initial_scratch_capacity: usize,
    /// Faults buffered before new ones are dropped
    pub fault_channel_capacity: usize,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            initial_scratch_capacity: 4096,
            fault_channel_capacity: 64,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub pool: PoolSection,
    pub store: StoreSection,
    pub bridge: BridgeSection,
}

impl BridgeConfig {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        log::debug!("Loading bridge config from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pool = &self.pool;
        if pool.min_class_size == 0 {
            return Err(ConfigError::Validation("pool.min_class_size must be positive".into()));
        }
        if pool.min_class_size > pool.max_class_size {
            return Err(ConfigError::Validation(format!(
                "pool.min_class_size ({}) exceeds pool.max_class_size ({})",
                pool.min_class_size, pool.max_class_size
            )));
        }
        if pool.max_class_size > MAX_CLASS_LIMIT {
            return Err(ConfigError::Validation(format!(
                "pool.max_class_size ({}) exceeds {}",
                pool.max_class_size, MAX_CLASS_LIMIT
            )));
        }
        if self.store.max_append_entries == 0 {
            return Err(ConfigError::Validation("store.max_append_entries must be positive".into()));
        }
        if self.bridge.fault_channel_capacity == 0 {
            return Err(ConfigError::Validation("bridge.fault_channel_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            policy: self.pool.policy.into(),
            min_class_size: self.pool.min_class_size,
            max_class_size: self.pool.max_class_size,
            max_retained_per_class: self.pool.max_retained_per_class,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_append_entries: self.store.max_append_entries,
        }
    }
}
