//! Protected variables
//!
//! A fixed set of enrolled variables is covered by a trusted monotonic
//! counter and a keyed digest over their canonical encoding. The counter and
//! digest live in an ordinary record in a reserved namespace; every protected
//! write advances the counter, writes the variable and then rewrites that
//! record, so rollback of the store or tampering with any enrolled value is
//! detected on the next load.

mod canonical;
mod crypto;

pub use canonical::{ProtectionMetadata, METADATA_SIZE};
pub use crypto::{
    FileCounter, HmacSha256, InMemoryCounter, IntegrityMac, MonotonicCounter, DIGEST_SIZE,
};

use crate::attributes::Attributes;
use crate::error::{Result, VarStoreError};
use crate::guid::Guid;
use crate::name::VariableName;
use crate::record::VariableRecord;
use crate::region::FlashRegion;
use crate::store::{RecordStore, VariableKey};
use std::collections::BTreeSet;
use tracing::{debug, error, info};

/// Name of the metadata record under [`Guid::PROTECTED_METADATA`]
pub const METADATA_VARIABLE_NAME: &str = "MetaDataHmacVar";

/// Attributes of the metadata record
const METADATA_ATTRIBUTES: Attributes =
    Attributes::NON_VOLATILE.union(Attributes::BOOTSERVICE_ACCESS);

/// Integrity protection for the enrolled variable set
pub struct ProtectedVariables {
    /// Sorted by (name, namespace), the canonical order
    enrolled: BTreeSet<VariableKey>,
    counter: Box<dyn MonotonicCounter>,
    mac: Box<dyn IntegrityMac>,
}

impl ProtectedVariables {
    pub fn new(
        enrolled: impl IntoIterator<Item = VariableKey>,
        counter: Box<dyn MonotonicCounter>,
        mac: Box<dyn IntegrityMac>,
    ) -> Self {
        ProtectedVariables {
            enrolled: enrolled.into_iter().collect(),
            counter,
            mac,
        }
    }

    pub fn is_enrolled(&self, name: &VariableName, namespace: &Guid) -> bool {
        self.enrolled
            .contains(&VariableKey::new(name.clone(), *namespace))
    }

    pub fn enrolled(&self) -> impl Iterator<Item = &VariableKey> + '_ {
        self.enrolled.iter()
    }

    /// Current value of the trusted counter
    pub fn counter(&self) -> Result<u64> {
        self.counter.read()
    }

    fn metadata_name() -> VariableName {
        VariableName::from_static(METADATA_VARIABLE_NAME)
    }

    /// Stored metadata, `None` when the record is absent
    pub fn read_metadata<R: FlashRegion>(
        store: &RecordStore<R>,
    ) -> Result<Option<ProtectionMetadata>> {
        match store.find(&Self::metadata_name(), &Guid::PROTECTED_METADATA) {
            Ok(record) => ProtectionMetadata::from_bytes(&record.data)
                .map(Some)
                .ok_or_else(|| {
                    VarStoreError::SecurityViolation(format!(
                        "protection metadata has {} bytes, expected {}",
                        record.data.len(),
                        METADATA_SIZE
                    ))
                }),
            Err(VarStoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn violation(msg: String) -> VarStoreError {
        error!("Protected variable check failed: {}", msg);
        VarStoreError::SecurityViolation(msg)
    }

    /// Check the enrolled variables against the stored counter and digest
    ///
    /// On first boot (no metadata, trusted counter at zero, no enrolled
    /// variable present) the metadata record is provisioned instead.
    pub fn verify_on_load<R: FlashRegion>(&mut self, store: &mut RecordStore<R>) -> Result<()> {
        let trusted = self.counter.read()?;

        let metadata = match Self::read_metadata(store) {
            Ok(metadata) => metadata,
            Err(VarStoreError::SecurityViolation(msg)) => return Err(Self::violation(msg)),
            Err(e) => return Err(e),
        };

        let Some(metadata) = metadata else {
            let any_present = self
                .enrolled
                .iter()
                .any(|key| store.contains(&key.name, &key.namespace));
            if trusted != 0 || any_present {
                return Err(Self::violation(format!(
                    "protection metadata missing (counter {}, enrolled data present: {})",
                    trusted, any_present
                )));
            }

            self.write_metadata(store, trusted)?;
            info!(
                "Provisioned protection metadata for {} enrolled variables",
                self.enrolled.len()
            );
            return Ok(());
        };

        if metadata.counter < trusted {
            return Err(Self::violation(format!(
                "stored counter {} is behind trusted counter {}",
                metadata.counter, trusted
            )));
        }
        if metadata.counter > trusted {
            return Err(Self::violation(format!(
                "stored counter {} is ahead of trusted counter {}",
                metadata.counter, trusted
            )));
        }

        let message = canonical::encode(metadata.counter, &self.enrolled, store)?;
        if !self.mac.verify(&message, &metadata.digest) {
            return Err(Self::violation(
                "digest does not match enrolled variables".to_string(),
            ));
        }

        info!(
            "Verified {} protected variables at counter {}",
            self.enrolled.len(),
            trusted
        );
        Ok(())
    }

    /// Write (or delete, on empty data) an enrolled variable
    ///
    /// Fails with `OutOfResources`, leaving the counter and the store
    /// untouched, when the variable and the metadata cannot both be written.
    /// Otherwise the trusted counter advances first, then the variable is
    /// written and finally the metadata. If a later step fails the stored
    /// metadata no longer matches and the next
    /// [`verify_on_load`](Self::verify_on_load) reports a violation.
    pub fn protected_set<R: FlashRegion>(
        &mut self,
        store: &mut RecordStore<R>,
        name: &VariableName,
        namespace: &Guid,
        attributes: Attributes,
        data: &[u8],
    ) -> Result<()> {
        if !self.is_enrolled(name, namespace) {
            return Err(VarStoreError::invalid(format!(
                "{}:{} is not a protected variable",
                namespace, name
            )));
        }

        let delete = data.is_empty() || attributes.is_empty();
        if delete && !store.contains(name, namespace) {
            return Err(VarStoreError::NotFound);
        }

        let record = VariableRecord::new(name.clone(), *namespace, attributes, data.to_vec());
        let metadata = Self::metadata_record(&ProtectionMetadata::default());
        let fits = if delete {
            store.can_hold(&[&metadata])
        } else {
            store.can_hold(&[&record, &metadata])
        };
        if !fits {
            debug!("No room for protected write of {}:{}", namespace, name);
            return Err(VarStoreError::OutOfResources);
        }

        let counter = self.counter.increment()?;
        if delete {
            store.tombstone(name, namespace)?;
        } else {
            store.update(&record)?;
        }
        self.write_metadata(store, counter)?;

        debug!("Protected write of {}:{} at counter {}", namespace, name, counter);
        Ok(())
    }

    /// Delete every enrolled variable and provision fresh metadata
    ///
    /// Remediation for a failed [`verify_on_load`](Self::verify_on_load).
    pub fn reset<R: FlashRegion>(&mut self, store: &mut RecordStore<R>) -> Result<()> {
        for key in &self.enrolled {
            if store.contains(&key.name, &key.namespace) {
                store.tombstone(&key.name, &key.namespace)?;
            }
        }
        if !store.can_hold(&[&Self::metadata_record(&ProtectionMetadata::default())]) {
            return Err(VarStoreError::OutOfResources);
        }
        let counter = self.counter.increment()?;
        self.write_metadata(store, counter)?;
        info!("Reset protected variables at counter {}", counter);
        Ok(())
    }

    fn write_metadata<R: FlashRegion>(
        &self,
        store: &mut RecordStore<R>,
        counter: u64,
    ) -> Result<()> {
        let message = canonical::encode(counter, &self.enrolled, store)?;
        let metadata = ProtectionMetadata {
            counter,
            digest: self.mac.digest(&message),
        };
        store.update(&Self::metadata_record(&metadata))
    }

    fn metadata_record(metadata: &ProtectionMetadata) -> VariableRecord {
        VariableRecord::new(
            Self::metadata_name(),
            Guid::PROTECTED_METADATA,
            METADATA_ATTRIBUTES,
            metadata.to_bytes(),
        )
    }
}
