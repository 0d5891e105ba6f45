//! Store configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! bank_size = 65536
//! volatile_store_size = 32768
//! max_variable_size = 8192
//!
//! [cache]
//! boot_snapshot = 65536
//! runtime_nv = 32768
//! volatile = 32768
//!
//! [[protected]]
//! namespace = "8be4df61-93ca-11d2-aa0d-00e098032b8c"
//! name = "PK"
//! ```

use crate::cache::CacheCapacities;
use crate::error::{Result, VarStoreError};
use crate::guid::Guid;
use crate::header::HEADER_SIZE;
use crate::name::VariableName;
use crate::record::RECORD_HEADER_SIZE;
use crate::store::VariableKey;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Smallest bank that can hold a header and one small record
pub const MIN_BANK_SIZE: usize = 512;

/// A variable enrolled in the protected set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedVariableConfig {
    pub namespace: Guid,
    pub name: VariableName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Size of each of the two non-volatile banks
    pub bank_size: usize,

    /// Size of the in-memory volatile store
    pub volatile_store_size: usize,

    /// Largest record (header, name and data) accepted by a write
    pub max_variable_size: usize,

    /// Capacity of the policy lookup cache
    pub policy_cache_size: usize,

    pub cache: CacheCapacities,

    pub protected: Vec<ProtectedVariableConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            bank_size: 64 * 1024,
            volatile_store_size: 32 * 1024,
            max_variable_size: 8 * 1024,
            policy_cache_size: 256,
            cache: CacheCapacities::default(),
            protected: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: StoreConfig =
            toml::from_str(source).map_err(|e| VarStoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VarStoreError::Config(e.to_string()))
    }

    /// Check sizes are consistent with each other
    pub fn validate(&self) -> Result<()> {
        if self.bank_size < MIN_BANK_SIZE || self.bank_size > u32::MAX as usize {
            return Err(VarStoreError::Config(format!(
                "bank_size {} must be between {} and {}",
                self.bank_size,
                MIN_BANK_SIZE,
                u32::MAX
            )));
        }

        if self.volatile_store_size < MIN_BANK_SIZE || self.volatile_store_size > u32::MAX as usize
        {
            return Err(VarStoreError::Config(format!(
                "volatile_store_size {} must be between {} and {}",
                self.volatile_store_size,
                MIN_BANK_SIZE,
                u32::MAX
            )));
        }

        let min_variable = RECORD_HEADER_SIZE + 4;
        let max_variable = self.bank_size.min(self.volatile_store_size) - HEADER_SIZE;
        if self.max_variable_size < min_variable || self.max_variable_size > max_variable {
            return Err(VarStoreError::Config(format!(
                "max_variable_size {} must be between {} and {}",
                self.max_variable_size, min_variable, max_variable
            )));
        }

        for (label, size) in [
            ("cache.boot_snapshot", self.cache.boot_snapshot),
            ("cache.runtime_nv", self.cache.runtime_nv),
            ("cache.volatile", self.cache.volatile),
        ] {
            if size < HEADER_SIZE + RECORD_HEADER_SIZE || size > u32::MAX as usize {
                return Err(VarStoreError::Config(format!(
                    "{} of {} bytes is out of range",
                    label, size
                )));
            }
        }

        if self.policy_cache_size == 0 {
            return Err(VarStoreError::Config(
                "policy_cache_size must be at least 1".to_string(),
            ));
        }

        if self
            .protected
            .iter()
            .any(|p| p.name.is_empty() || p.namespace == Guid::PROTECTED_METADATA)
        {
            return Err(VarStoreError::Config(
                "protected variables need a name outside the reserved namespace".to_string(),
            ));
        }

        Ok(())
    }

    /// Keys of the protected variable set
    pub fn enrolled_keys(&self) -> Vec<VariableKey> {
        self.protected
            .iter()
            .map(|p| VariableKey::new(p.name.clone(), p.namespace))
            .collect()
    }
}
