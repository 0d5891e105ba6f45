//! Policy entries
//!
//! An entry targets a namespace, optionally narrowed to one name or a `#`
//! pattern, and constrains the size, the attributes and the lock state of
//! every variable it governs. Entries serialize to JSON for dumping and
//! loading:
//!
//! ```json
//! {
//!   "namespace": "8be4df61-93ca-11d2-aa0d-00e098032b8c",
//!   "name": "Boot####",
//!   "max_size": 1024,
//!   "attributes_must_have": "NON_VOLATILE",
//!   "lock_policy": { "type": "lock_on_create" }
//! }
//! ```

use super::PatternMatcher;
use crate::attributes::Attributes;
use crate::error::{Result, VarStoreError};
use crate::guid::Guid;
use crate::name::VariableName;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// `max_size` value meaning no maximum
pub const NO_MAX_SIZE: u32 = u32::MAX;

/// When a governed variable becomes read-only
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockPolicy {
    #[default]
    NoLock,
    /// Never writable
    LockNow,
    /// Writable until it exists
    LockOnCreate,
    /// Read-only while the state variable holds exactly one byte equal to `value`
    LockOnVarState {
        namespace: Guid,
        name: VariableName,
        value: u8,
    },
}

/// A registered policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub namespace: Guid,

    /// Exact name or `#` pattern; `None` covers the whole namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub min_size: u32,

    #[serde(default = "no_max_size")]
    pub max_size: u32,

    #[serde(default)]
    pub attributes_must_have: Attributes,

    #[serde(default)]
    pub attributes_cant_have: Attributes,

    #[serde(default)]
    pub lock_policy: LockPolicy,
}

fn no_max_size() -> u32 {
    NO_MAX_SIZE
}

impl PolicyEntry {
    /// Entry covering a whole namespace with no constraints
    pub fn namespace(namespace: Guid) -> Self {
        PolicyEntry {
            namespace,
            name: None,
            min_size: 0,
            max_size: NO_MAX_SIZE,
            attributes_must_have: Attributes::empty(),
            attributes_cant_have: Attributes::empty(),
            lock_policy: LockPolicy::NoLock,
        }
    }

    /// Entry for one name or `#` pattern with no constraints
    pub fn named(namespace: Guid, name: impl Into<String>) -> Self {
        PolicyEntry {
            name: Some(name.into()),
            ..Self::namespace(namespace)
        }
    }

    pub fn with_sizes(mut self, min_size: u32, max_size: u32) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    pub fn with_attributes(mut self, must_have: Attributes, cant_have: Attributes) -> Self {
        self.attributes_must_have = must_have;
        self.attributes_cant_have = cant_have;
        self
    }

    pub fn with_lock(mut self, lock_policy: LockPolicy) -> Self {
        self.lock_policy = lock_policy;
        self
    }

    /// Check the entry is well formed
    pub fn validate(&self) -> Result<()> {
        if self.min_size > self.max_size {
            return Err(VarStoreError::invalid(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }

        if self
            .attributes_must_have
            .intersects(self.attributes_cant_have)
        {
            return Err(VarStoreError::invalid(format!(
                "attributes {:?} are both required and forbidden",
                self.attributes_must_have & self.attributes_cant_have
            )));
        }

        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err(VarStoreError::invalid("policy name is empty"));
            }
            // '#' is a valid UCS-2 character, so the pattern must also be a valid name
            VariableName::new(name.as_str())?;
        }

        Ok(())
    }

    /// Whether this entry targets the same variables as `other`
    pub fn same_target(&self, other: &PolicyEntry) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }

    /// Whether this entry governs the given variable
    pub fn matches(&self, name: &VariableName, namespace: &Guid) -> bool {
        if self.namespace != *namespace {
            return false;
        }
        match &self.name {
            None => true,
            Some(pattern) => PatternMatcher::matches(pattern, name.as_str()),
        }
    }

    /// Compare how narrowly two entries target
    ///
    /// Exact names beat patterns, patterns with fewer wildcards beat those with
    /// more, and any name beats a namespace-wide entry.
    pub fn cmp_specificity(&self, other: &PolicyEntry) -> Ordering {
        self.specificity().cmp(&other.specificity())
    }

    fn specificity(&self) -> (u8, std::cmp::Reverse<usize>) {
        match &self.name {
            None => (0, std::cmp::Reverse(0)),
            Some(pattern) if PatternMatcher::is_exact(pattern) => (2, std::cmp::Reverse(0)),
            Some(pattern) => (1, std::cmp::Reverse(PatternMatcher::wildcard_count(pattern))),
        }
    }

    /// Size and attribute constraints for a write of `data_size` bytes
    pub fn check_write(&self, attributes: Attributes, data_size: usize) -> Result<()> {
        let size = u32::try_from(data_size).unwrap_or(u32::MAX);
        if size < self.min_size || size > self.max_size {
            return Err(VarStoreError::invalid(format!(
                "size {} outside policy range {}..={}",
                data_size, self.min_size, self.max_size
            )));
        }

        if !attributes.contains(self.attributes_must_have) {
            return Err(VarStoreError::invalid(format!(
                "attributes {:?} missing required {:?}",
                attributes,
                self.attributes_must_have - attributes
            )));
        }

        if attributes.intersects(self.attributes_cant_have) {
            return Err(VarStoreError::invalid(format!(
                "attributes {:?} include forbidden {:?}",
                attributes,
                attributes & self.attributes_cant_have
            )));
        }

        Ok(())
    }
}
