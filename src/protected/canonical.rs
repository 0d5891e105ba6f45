//! Canonical encoding of the protected set
//!
//! ```text
//! counter: u64
//! for each enrolled key, sorted by (name, namespace):
//!     namespace: [u8; 16]
//!     name_size: u32
//!     name:      [u8; name_size]   UCS-2LE, NUL-terminated
//!     present:   u8
//!     if present:
//!         attributes: u32
//!         data_size:  u32
//!         data:       [u8; data_size]
//! ```
//!
//! The encoding depends only on the values, never on where records sit in a
//! bank, so compaction does not change the digest.

use super::crypto::DIGEST_SIZE;
use crate::error::{Result, VarStoreError};
use crate::header::le_u64;
use crate::region::FlashRegion;
use crate::store::{RecordStore, VariableKey};

/// Encode the current contents of `enrolled` (already sorted) at `counter`
pub(crate) fn encode<'a, R, I>(
    counter: u64,
    enrolled: I,
    store: &RecordStore<R>,
) -> Result<Vec<u8>>
where
    R: FlashRegion,
    I: IntoIterator<Item = &'a VariableKey>,
{
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&counter.to_le_bytes());

    for key in enrolled {
        let name = key.name.to_ucs2_bytes();
        bytes.extend_from_slice(&key.namespace.to_bytes());
        bytes.extend_from_slice(&(name.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&name);

        match store.find(&key.name, &key.namespace) {
            Ok(record) => {
                bytes.push(1);
                bytes.extend_from_slice(&record.attributes.bits().to_le_bytes());
                bytes.extend_from_slice(&(record.data.len() as u32).to_le_bytes());
                bytes.extend_from_slice(&record.data);
            }
            Err(VarStoreError::NotFound) => bytes.push(0),
            Err(e) => return Err(e),
        }
    }

    Ok(bytes)
}

/// Size of the metadata record payload
pub const METADATA_SIZE: usize = 8 + DIGEST_SIZE;

/// Counter and digest as stored in the metadata record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectionMetadata {
    pub counter: u64,
    pub digest: [u8; DIGEST_SIZE],
}

impl ProtectionMetadata {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(METADATA_SIZE);
        bytes.extend_from_slice(&self.counter.to_le_bytes());
        bytes.extend_from_slice(&self.digest);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != METADATA_SIZE {
            return None;
        }
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&bytes[8..]);
        Some(ProtectionMetadata {
            counter: le_u64(bytes, 0),
            digest,
        })
    }
}
