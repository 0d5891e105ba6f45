//! Policy evaluation engine
//!
//! Holds the registered entries and decides whether a write is allowed.
//! Key features:
//! - The most specific matching entry governs a variable
//! - Lock policies are checked before size and attribute constraints
//! - Deletes only face lock policies
//! - Lookups are cached and the cache is dropped on every registration

use super::{LockPolicy, PolicyCache, PolicyEntry};
use crate::attributes::Attributes;
use crate::error::{Result, VarStoreError};
use crate::guid::Guid;
use crate::name::VariableName;
use crate::region::FlashRegion;
use crate::store::RecordStore;
use std::cmp::Ordering;
use tracing::{debug, info};

/// Read access to the current contents of the stores
///
/// Lock policies depend on whether a variable exists and, for
/// [`LockPolicy::LockOnVarState`], on its value.
pub trait VariableLookup {
    /// Data of a live variable, `None` when absent
    fn lookup(&self, name: &VariableName, namespace: &Guid) -> Option<Vec<u8>>;
}

impl<R: FlashRegion> VariableLookup for RecordStore<R> {
    fn lookup(&self, name: &VariableName, namespace: &Guid) -> Option<Vec<u8>> {
        self.find(name, namespace).ok().map(|record| record.data)
    }
}

impl<F> VariableLookup for F
where
    F: Fn(&VariableName, &Guid) -> Option<Vec<u8>>,
{
    fn lookup(&self, name: &VariableName, namespace: &Guid) -> Option<Vec<u8>> {
        self(name, namespace)
    }
}

/// Variable policy engine
pub struct PolicyEngine {
    entries: Vec<PolicyEntry>,
    cache: PolicyCache,
    locked: bool,
    enabled: bool,
}

impl PolicyEngine {
    /// Create a new policy engine with given cache capacity
    pub fn new(cache_capacity: usize) -> Self {
        PolicyEngine {
            entries: Vec::new(),
            cache: PolicyCache::new(cache_capacity),
            locked: false,
            enabled: true,
        }
    }

    /// Create a new policy engine with default cache (256 entries)
    pub fn new_default() -> Self {
        Self::new(256)
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    /// Register a policy entry
    ///
    /// Fails with `WriteProtected` once the engine is locked and with
    /// `InvalidParameter` for a malformed entry or one whose target is
    /// already registered.
    pub fn register(&mut self, entry: PolicyEntry) -> Result<()> {
        self.check_new(&entry, &[])?;
        debug!(
            "Registered policy for {}:{}",
            entry.namespace,
            entry.name.as_deref().unwrap_or("*")
        );
        self.entries.push(entry);
        self.cache.clear();
        Ok(())
    }

    fn check_new(&self, entry: &PolicyEntry, pending: &[PolicyEntry]) -> Result<()> {
        if self.locked {
            return Err(VarStoreError::protected("variable policy is locked"));
        }
        entry.validate()?;
        if self
            .entries
            .iter()
            .chain(pending)
            .any(|existing| existing.same_target(entry))
        {
            return Err(VarStoreError::invalid(format!(
                "policy for {}:{} already registered",
                entry.namespace,
                entry.name.as_deref().unwrap_or("*")
            )));
        }
        Ok(())
    }

    /// Make the registered set immutable. Idempotent.
    pub fn lock(&mut self) {
        if !self.locked {
            info!("Variable policy locked with {} entries", self.entries.len());
        }
        self.locked = true;
    }

    /// Turn policy enforcement off; only possible before locking
    pub fn disable(&mut self) -> Result<()> {
        if self.locked {
            return Err(VarStoreError::protected("variable policy is locked"));
        }
        if self.enabled {
            info!("Variable policy enforcement disabled");
        }
        self.enabled = false;
        Ok(())
    }

    /// Registered entries as pretty JSON
    pub fn dump(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    /// Register every entry of a JSON array, all or nothing
    pub fn load_json(&mut self, json: &str) -> Result<usize> {
        if self.locked {
            return Err(VarStoreError::protected("variable policy is locked"));
        }
        let entries: Vec<PolicyEntry> = serde_json::from_str(json)?;
        for (i, entry) in entries.iter().enumerate() {
            self.check_new(entry, &entries[..i])?;
        }

        let count = entries.len();
        self.entries.extend(entries);
        self.cache.clear();
        info!("Loaded {} policy entries", count);
        Ok(count)
    }

    /// Most specific entry governing a variable
    pub fn find_policy(&mut self, name: &VariableName, namespace: &Guid) -> Option<&PolicyEntry> {
        let index = match self.cache.get(namespace, name) {
            Some(cached) => cached,
            None => {
                let found = self.best_match(name, namespace);
                self.cache.put(namespace, name, found);
                found
            }
        };
        index.and_then(|i| self.entries.get(i))
    }

    fn best_match(&self, name: &VariableName, namespace: &Guid) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.matches(name, namespace) {
                continue;
            }
            // ties go to the earlier registration
            let better = match best {
                None => true,
                Some(b) => entry.cmp_specificity(&self.entries[b]) == Ordering::Greater,
            };
            if better {
                best = Some(i);
            }
        }
        best
    }

    /// Decide whether a write may proceed
    ///
    /// A write of zero bytes or with empty attributes is a delete and is only
    /// subject to the lock policy.
    pub fn authorize<L: VariableLookup + ?Sized>(
        &mut self,
        name: &VariableName,
        namespace: &Guid,
        attributes: Attributes,
        data_size: usize,
        lookup: &L,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let Some(entry) = self.find_policy(name, namespace) else {
            return Ok(());
        };

        match &entry.lock_policy {
            LockPolicy::NoLock => {}
            LockPolicy::LockNow => {
                return Err(VarStoreError::protected(format!(
                    "{}:{} is locked",
                    namespace, name
                )));
            }
            LockPolicy::LockOnCreate => {
                if lookup.lookup(name, namespace).is_some() {
                    return Err(VarStoreError::protected(format!(
                        "{}:{} is locked once created",
                        namespace, name
                    )));
                }
            }
            LockPolicy::LockOnVarState {
                namespace: state_namespace,
                name: state_name,
                value,
            } => {
                if lookup.lookup(state_name, state_namespace).as_deref() == Some(&[*value][..]) {
                    return Err(VarStoreError::protected(format!(
                        "{}:{} is locked by {}:{}",
                        namespace, name, state_namespace, state_name
                    )));
                }
            }
        }

        if data_size == 0 || attributes.is_empty() {
            return Ok(());
        }

        entry.check_write(attributes, data_size)
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new_default()
    }
}
