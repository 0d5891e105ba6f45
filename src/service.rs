//! Variable service front-end
//!
//! [`VariableServices`] is the four-operation interface callers see.
//! [`VariableService`] implements it over a non-volatile [`RecordStore`], a
//! volatile store in RAM, the [`PolicyEngine`], the [`ProtectedVariables`]
//! layer and, once the initialization window is closed, the
//! [`RuntimeCache`].
//!
//! Before the window closes every operation runs under one mutex. Closing the
//! window locks the policy engine and builds the runtime cache; from then on
//! reads are served lock-free from the cache and writes commit to the stores
//! before being mirrored into it.

use crate::attributes::Attributes;
use crate::cache::RuntimeCache;
use crate::config::{ProtectedVariableConfig, StoreConfig};
use crate::error::{Result, VarStoreError};
use crate::guid::Guid;
use crate::name::VariableName;
use crate::policy::{PolicyEngine, PolicyEntry};
use crate::protected::{
    HmacSha256, InMemoryCounter, IntegrityMac, MonotonicCounter, ProtectedVariables,
};
use crate::record::{VariableRecord, RECORD_HEADER_SIZE};
use crate::region::{FlashRegion, MemoryRegion};
use crate::store::{RecordStore, StoreUsage, VariableKey};
use parking_lot::Mutex;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Result of [`VariableServices::query_variable_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableStorageInfo {
    /// Bytes available for variables of the queried kind
    pub maximum_storage: u64,
    /// Bytes still available
    pub remaining_storage: u64,
    /// Largest name plus data a single variable may carry
    pub maximum_variable_size: u64,
}

/// Variable services
///
/// Synchronous; implementations serialize writers internally.
pub trait VariableServices {
    /// Copy a variable's data into `buffer`
    ///
    /// Returns the attributes and the data length. Fails with
    /// `BufferTooSmall` carrying the required length when `buffer` is short.
    fn get_variable(
        &self,
        name: &VariableName,
        namespace: &Guid,
        buffer: &mut [u8],
    ) -> Result<(Attributes, usize)>;

    /// Name following the given one; an empty name starts over
    ///
    /// Returns `NotFound` after the last variable and `BufferTooSmall` when
    /// the encoded name exceeds `name_capacity` bytes.
    ///
    /// Enumeration follows storage order and holds no state between calls, so
    /// writes made between calls change what a walk sees:
    /// - a previous key deleted in the meantime yields `InvalidParameter`
    /// - keys created after the walk started may or may not be visited
    /// - a key replaced in the meantime moves to the end and may be visited
    ///   again
    fn get_next_variable_name(
        &self,
        previous_name: &VariableName,
        previous_namespace: &Guid,
        name_capacity: usize,
    ) -> Result<(VariableName, Guid)>;

    /// Create, replace, append to or delete a variable
    ///
    /// Empty data without `APPEND_WRITE`, or empty attributes, deletes.
    fn set_variable(
        &self,
        name: &VariableName,
        namespace: &Guid,
        attributes: Attributes,
        data: &[u8],
    ) -> Result<()>;

    fn query_variable_info(&self, attributes: Attributes) -> Result<VariableStorageInfo>;
}

/// Everything guarded by the service mutex
struct ServiceState<R: FlashRegion> {
    nv: RecordStore<R>,
    volatile: RecordStore<MemoryRegion>,
    policy: PolicyEngine,
    protected: ProtectedVariables,
}

impl<R: FlashRegion> ServiceState<R> {
    fn find(&self, name: &VariableName, namespace: &Guid) -> Result<VariableRecord> {
        match self.nv.find(name, namespace) {
            Err(VarStoreError::NotFound) => self.volatile.find(name, namespace),
            other => other,
        }
    }

    /// Next visible key, non-volatile store first
    fn next_key(&self, previous: Option<&VariableKey>) -> Result<Option<VariableKey>> {
        let mut cursor = previous.cloned();
        loop {
            match self.next_stored_key(cursor.as_ref())? {
                // protection metadata is internal
                Some(key) if key.namespace == Guid::PROTECTED_METADATA => cursor = Some(key),
                other => return Ok(other),
            }
        }
    }

    fn next_stored_key(&self, previous: Option<&VariableKey>) -> Result<Option<VariableKey>> {
        let from_nv = match previous {
            None => self.nv.next_after(None)?,
            Some(key) if self.nv.contains(&key.name, &key.namespace) => {
                self.nv.next_after(Some(key))?
            }
            Some(key) => return self.volatile.next_after(Some(key)),
        };
        match from_nv {
            Some(key) => Ok(Some(key)),
            None => self.volatile.next_after(None),
        }
    }
}

/// Variable service over a non-volatile store in `R`
pub struct VariableService<R: FlashRegion> {
    state: Mutex<ServiceState<R>>,
    cache: OnceLock<RuntimeCache>,
    config: StoreConfig,
}

impl<R: FlashRegion> VariableService<R> {
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether the initialization window has closed
    pub fn is_runtime(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Runtime cache, present once the window has closed
    pub fn runtime_cache(&self) -> Option<&RuntimeCache> {
        self.cache.get()
    }

    /// Lock the policy engine and build the runtime cache
    ///
    /// One-shot; later calls do nothing.
    pub fn close_initialization_window(&self) -> Result<()> {
        let mut state = self.state.lock();
        if self.is_runtime() {
            debug!("Initialization window already closed");
            return Ok(());
        }

        let nv = state.nv.iter().collect::<Result<Vec<_>>>()?;
        let volatile = state.volatile.iter().collect::<Result<Vec<_>>>()?;
        let cache = RuntimeCache::build(self.config.cache, nv, volatile)?;

        state.policy.lock();
        // Only reachable with the state lock held and the cache unset
        let _ = self.cache.set(cache);

        info!("Initialization window closed, serving reads from the runtime cache");
        Ok(())
    }

    pub fn register_policy(&self, entry: PolicyEntry) -> Result<()> {
        self.state.lock().policy.register(entry)
    }

    /// Register entries from a JSON array; all or nothing
    pub fn load_policies_json(&self, json: &str) -> Result<usize> {
        self.state.lock().policy.load_json(json)
    }

    pub fn dump_policies(&self) -> Result<String> {
        self.state.lock().policy.dump()
    }

    pub fn disable_policy(&self) -> Result<()> {
        self.state.lock().policy.disable()
    }

    pub fn lock_policy(&self) {
        self.state.lock().policy.lock();
    }

    pub fn is_policy_locked(&self) -> bool {
        self.state.lock().policy.is_locked()
    }

    /// Delete all protected variables and provision fresh metadata
    ///
    /// Only allowed before the initialization window closes.
    pub fn reset_protected(&self) -> Result<()> {
        let mut guard = self.state.lock();
        if self.is_runtime() {
            return Err(VarStoreError::protected(
                "protected variables cannot be reset at runtime",
            ));
        }
        let state = &mut *guard;
        state.protected.reset(&mut state.nv)
    }

    /// Reclaim tombstoned space in the non-volatile store
    pub fn compact(&self) -> Result<()> {
        self.state.lock().nv.compact()
    }

    pub fn nv_usage(&self) -> StoreUsage {
        self.state.lock().nv.usage()
    }

    pub fn volatile_usage(&self) -> StoreUsage {
        self.state.lock().volatile.usage()
    }

    /// Visible variables, non-volatile first, in storage order
    pub fn variables(&self) -> Result<Vec<VariableRecord>> {
        if let Some(cache) = self.cache.get() {
            let mut records = Vec::new();
            let mut cursor = None;
            while let Some(key) = cache.next_name(cursor.as_ref())? {
                records.push(cache.get(&key.name, &key.namespace)?);
                cursor = Some(key);
            }
            return Ok(records);
        }

        let state = self.state.lock();
        state
            .nv
            .iter()
            .chain(state.volatile.iter())
            .filter(|r| {
                r.as_ref()
                    .map(|r| r.namespace != Guid::PROTECTED_METADATA)
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Release the non-volatile banks
    pub fn into_banks(self) -> [R; 2] {
        self.state.into_inner().nv.into_banks()
    }
}

impl<R: FlashRegion> VariableServices for VariableService<R> {
    fn get_variable(
        &self,
        name: &VariableName,
        namespace: &Guid,
        buffer: &mut [u8],
    ) -> Result<(Attributes, usize)> {
        let record = match self.cache.get() {
            Some(cache) => cache.get(name, namespace)?,
            None => self.state.lock().find(name, namespace)?,
        };

        let len = record.data.len();
        if buffer.len() < len {
            return Err(VarStoreError::BufferTooSmall { required: len });
        }
        buffer[..len].copy_from_slice(&record.data);
        Ok((record.attributes, len))
    }

    fn get_next_variable_name(
        &self,
        previous_name: &VariableName,
        previous_namespace: &Guid,
        name_capacity: usize,
    ) -> Result<(VariableName, Guid)> {
        let previous = if previous_name.is_empty() {
            None
        } else {
            Some(VariableKey::new(previous_name.clone(), *previous_namespace))
        };

        let next = match self.cache.get() {
            Some(cache) => cache.next_name(previous.as_ref())?,
            None => self.state.lock().next_key(previous.as_ref())?,
        };

        let key = next.ok_or(VarStoreError::NotFound)?;
        let required = key.name.encoded_len();
        if required > name_capacity {
            return Err(VarStoreError::BufferTooSmall { required });
        }
        Ok((key.name, key.namespace))
    }

    fn set_variable(
        &self,
        name: &VariableName,
        namespace: &Guid,
        attributes: Attributes,
        data: &[u8],
    ) -> Result<()> {
        if name.is_empty() {
            return Err(VarStoreError::invalid("variable name is empty"));
        }
        if *namespace == Guid::PROTECTED_METADATA {
            return Err(VarStoreError::protected(format!(
                "namespace {} is reserved",
                namespace
            )));
        }

        let attributes = Attributes::check_for_write(attributes.bits())?;
        let append = attributes.contains(Attributes::APPEND_WRITE);
        let stored = attributes.stored();
        if append && data.is_empty() {
            debug!("Empty append to {}:{}, nothing to do", namespace, name);
            return Ok(());
        }
        let delete = data.is_empty() || stored.is_empty();

        let mut guard = self.state.lock();
        let ServiceState {
            nv,
            volatile,
            policy,
            protected,
        } = &mut *guard;
        let cache = self.cache.get();
        let enrolled = protected.is_enrolled(name, namespace);

        if stored.contains(Attributes::AUTHENTICATED_WRITE_ACCESS) && !enrolled {
            return Err(VarStoreError::invalid(format!(
                "{}:{} is not a protected variable",
                namespace, name
            )));
        }
        if enrolled && !delete && stored.is_volatile() {
            return Err(VarStoreError::invalid(format!(
                "protected variable {}:{} must be non-volatile",
                namespace, name
            )));
        }
        if cache.is_some() && !delete && !stored.contains(Attributes::RUNTIME_ACCESS) {
            return Err(VarStoreError::invalid(format!(
                "{}:{} needs runtime access to be written at runtime",
                namespace, name
            )));
        }

        let existing = match nv.find(name, namespace) {
            Err(VarStoreError::NotFound) => volatile.find(name, namespace),
            other => other,
        };
        let existing = match existing {
            Ok(record) => Some(record),
            Err(VarStoreError::NotFound) => None,
            Err(e) => return Err(e),
        };

        if let (Some(_), Some(record)) = (cache, &existing) {
            if !record.attributes.contains(Attributes::RUNTIME_ACCESS) {
                // Boot-only variables are invisible at runtime
                return Err(if delete {
                    VarStoreError::NotFound
                } else {
                    VarStoreError::invalid(format!(
                        "{}:{} is not accessible at runtime",
                        namespace, name
                    ))
                });
            }
        }

        if delete && existing.is_none() {
            return Err(VarStoreError::NotFound);
        }

        if let (false, Some(record)) = (delete, &existing) {
            if record.attributes != stored {
                return Err(VarStoreError::invalid(format!(
                    "attributes {:?} do not match existing {:?} of {}:{}",
                    stored, record.attributes, namespace, name
                )));
            }
        }

        let value = match (&existing, append) {
            (Some(record), true) => {
                let mut joined = Vec::with_capacity(record.data.len() + data.len());
                joined.extend_from_slice(&record.data);
                joined.extend_from_slice(data);
                joined
            }
            _ => data.to_vec(),
        };

        if !delete {
            let size = RECORD_HEADER_SIZE + name.encoded_len() + value.len();
            if size > self.config.max_variable_size {
                return Err(VarStoreError::invalid(format!(
                    "{}:{} needs {} bytes, maximum is {}",
                    namespace, name, size, self.config.max_variable_size
                )));
            }
        }

        {
            let lookup = |n: &VariableName, g: &Guid| -> Option<Vec<u8>> {
                match nv.find(n, g) {
                    Ok(record) => Some(record.data),
                    Err(_) => volatile.find(n, g).ok().map(|record| record.data),
                }
            };
            let data_size = if delete { 0 } else { value.len() };
            policy.authorize(name, namespace, stored, data_size, &lookup)?;
        }

        if let (false, Some(record)) = (delete, &existing) {
            if record.data == value {
                debug!("{}:{} unchanged, skipping write", namespace, name);
                return Ok(());
            }
        }

        let record = VariableRecord::new(name.clone(), *namespace, stored, value);
        if let (Some(cache), false) = (cache, delete) {
            if !cache.fits(&record) {
                warn!("Runtime cache has no room for {}:{}", namespace, name);
                return Err(VarStoreError::OutOfResources);
            }
        }

        let in_volatile = match &existing {
            Some(old) if delete => old.attributes.is_volatile(),
            _ => stored.is_volatile(),
        };

        if enrolled {
            let payload: &[u8] = if delete { &[] } else { &record.data };
            protected.protected_set(nv, name, namespace, stored, payload)?;
        } else {
            match (delete, in_volatile) {
                (true, false) => nv.tombstone(name, namespace)?,
                (true, true) => volatile.tombstone(name, namespace)?,
                (false, false) => nv.update(&record)?,
                (false, true) => volatile.update(&record)?,
            }
        }

        if let Some(cache) = cache {
            let payload: &[u8] = if delete { &[] } else { &record.data };
            if let Err(e) = cache.runtime_set(name, namespace, stored, payload) {
                error!(
                    "Runtime cache out of sync for {}:{} after a committed write: {}",
                    namespace, name, e
                );
                return Err(e);
            }
        }

        debug!(
            "{} {}:{} ({} bytes)",
            if delete { "Deleted" } else { "Set" },
            namespace,
            name,
            record.data.len()
        );
        Ok(())
    }

    fn query_variable_info(&self, attributes: Attributes) -> Result<VariableStorageInfo> {
        let attributes = Attributes::check_for_write(attributes.bits())?.stored();
        if attributes.is_empty() {
            return Err(VarStoreError::invalid("attributes are empty"));
        }

        let cache = self.cache.get();
        if cache.is_some() && !attributes.contains(Attributes::RUNTIME_ACCESS) {
            return Err(VarStoreError::invalid(
                "only runtime variables can be queried at runtime",
            ));
        }

        let usage = {
            let state = self.state.lock();
            if attributes.is_volatile() {
                state.volatile.usage()
            } else {
                state.nv.usage()
            }
        };

        let mut remaining = usage.remaining();
        if let Some(cache) = cache {
            remaining = remaining.min(cache.query(attributes).free);
        }

        Ok(VariableStorageInfo {
            maximum_storage: usage.capacity as u64,
            remaining_storage: remaining as u64,
            maximum_variable_size: (self.config.max_variable_size - RECORD_HEADER_SIZE) as u64,
        })
    }
}

/// Builder for a [`VariableService`]
///
/// # Examples
///
/// ```rust
/// use varstore::{MemoryRegion, VariableServiceBuilder};
///
/// # fn main() -> varstore::Result<()> {
/// let service = VariableServiceBuilder::new()
///     .bank_size(16 * 1024)
///     .integrity_key(b"platform secret")
///     .build([MemoryRegion::new(16 * 1024), MemoryRegion::new(16 * 1024)])?;
/// assert!(!service.is_runtime());
/// # Ok(())
/// # }
/// ```
pub struct VariableServiceBuilder {
    config: StoreConfig,
    counter: Option<Box<dyn MonotonicCounter>>,
    mac: Option<Box<dyn IntegrityMac>>,
    integrity_key: Option<Vec<u8>>,
    policies: Vec<PolicyEntry>,
    reset_on_violation: bool,
}

impl VariableServiceBuilder {
    pub fn new() -> Self {
        VariableServiceBuilder {
            config: StoreConfig::default(),
            counter: None,
            mac: None,
            integrity_key: None,
            policies: Vec::new(),
            reset_on_violation: false,
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the size of each non-volatile bank
    pub fn bank_size(mut self, size: usize) -> Self {
        self.config.bank_size = size;
        self
    }

    /// Enroll a variable in the protected set
    pub fn protect(mut self, name: VariableName, namespace: Guid) -> Self {
        self.config
            .protected
            .push(ProtectedVariableConfig { namespace, name });
        self
    }

    /// Trusted counter; defaults to an in-memory counter starting at zero
    pub fn counter(mut self, counter: Box<dyn MonotonicCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Key the default HMAC-SHA256 digest
    pub fn integrity_key(mut self, secret: &[u8]) -> Self {
        self.integrity_key = Some(secret.to_vec());
        self
    }

    /// Use a custom digest instead of HMAC-SHA256
    pub fn mac(mut self, mac: Box<dyn IntegrityMac>) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Register a policy before the service starts
    pub fn policy(mut self, entry: PolicyEntry) -> Self {
        self.policies.push(entry);
        self
    }

    /// Reset the protected variables instead of failing when verification fails
    pub fn reset_on_violation(mut self) -> Self {
        self.reset_on_violation = true;
        self
    }

    /// Load the stores and verify the protected variables
    pub fn build<R: FlashRegion>(self, banks: [R; 2]) -> Result<VariableService<R>> {
        let config = self.config;
        config.validate()?;
        if banks[0].len() != config.bank_size {
            return Err(VarStoreError::Config(format!(
                "bank of {} bytes does not match configured bank_size {}",
                banks[0].len(),
                config.bank_size
            )));
        }

        let mac = match (self.mac, self.integrity_key) {
            (Some(mac), _) => mac,
            (None, Some(key)) => Box::new(HmacSha256::new(&key)?) as Box<dyn IntegrityMac>,
            (None, None) => {
                return Err(VarStoreError::Config(
                    "an integrity key or digest must be set".to_string(),
                ))
            }
        };
        let counter = self
            .counter
            .unwrap_or_else(|| Box::new(InMemoryCounter::default()) as Box<dyn MonotonicCounter>);

        info!(
            "Building variable service: {} byte banks, {} protected variables",
            config.bank_size,
            config.protected.len()
        );

        let mut nv = RecordStore::load(banks)?;
        let volatile = RecordStore::load([
            MemoryRegion::new(config.volatile_store_size),
            MemoryRegion::new(config.volatile_store_size),
        ])?;

        let mut protected = ProtectedVariables::new(config.enrolled_keys(), counter, mac);
        match protected.verify_on_load(&mut nv) {
            Ok(()) => {}
            Err(VarStoreError::SecurityViolation(msg)) if self.reset_on_violation => {
                warn!("Resetting protected variables after failed check: {}", msg);
                protected.reset(&mut nv)?;
            }
            Err(e) => return Err(e),
        }

        let mut policy = PolicyEngine::new(config.policy_cache_size);
        for entry in self.policies {
            policy.register(entry)?;
        }
        if !policy.entries().is_empty() {
            debug!("Registered {} policies", policy.entries().len());
        }

        Ok(VariableService {
            state: Mutex::new(ServiceState {
                nv,
                volatile,
                policy,
                protected,
            }),
            cache: OnceLock::new(),
            config,
        })
    }
}

impl Default for VariableServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
