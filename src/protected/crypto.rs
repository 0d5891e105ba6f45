//! Trusted counter and integrity digest capabilities

use crate::error::{Result, VarStoreError};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fs;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;

/// Size of an integrity digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// Monotonic counter kept outside the variable store
///
/// The protected layer trusts this value; a stored counter that disagrees
/// with it is treated as rollback or tampering.
pub trait MonotonicCounter: Send {
    fn read(&self) -> Result<u64>;

    /// Advance by one and return the new value
    fn increment(&mut self) -> Result<u64>;
}

/// Counter held in process memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryCounter {
    value: u64,
}

impl InMemoryCounter {
    pub fn new(value: u64) -> Self {
        InMemoryCounter { value }
    }
}

impl MonotonicCounter for InMemoryCounter {
    fn read(&self) -> Result<u64> {
        Ok(self.value)
    }

    fn increment(&mut self) -> Result<u64> {
        self.value += 1;
        Ok(self.value)
    }
}

/// Counter persisted as 8 little-endian bytes in a file
///
/// Lets host tools keep a store image and its counter side by side. A missing
/// file reads as zero.
#[derive(Debug, Clone)]
pub struct FileCounter {
    path: PathBuf,
}

impl FileCounter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileCounter {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MonotonicCounter for FileCounter {
    fn read(&self) -> Result<u64> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    VarStoreError::io(format!(
                        "counter file {:?} has {} bytes, expected 8",
                        self.path,
                        bytes.len()
                    ))
                })?;
                Ok(u64::from_le_bytes(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn increment(&mut self) -> Result<u64> {
        let next = self.read()? + 1;
        fs::write(&self.path, next.to_le_bytes())?;
        Ok(next)
    }
}

/// Keyed digest over the canonical encoding of the protected set
pub trait IntegrityMac: Send {
    fn digest(&self, message: &[u8]) -> [u8; DIGEST_SIZE];

    /// Compare `expected` against the digest of `message` in constant time
    fn verify(&self, message: &[u8], expected: &[u8]) -> bool {
        let actual = self.digest(message);
        actual[..].ct_eq(expected).into()
    }
}

/// HMAC-SHA256 keyed by an opaque secret
#[derive(Clone)]
pub struct HmacSha256 {
    mac: Hmac<Sha256>,
}

impl HmacSha256 {
    /// Key the digest with a caller-provided secret
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(VarStoreError::invalid("integrity key is empty"));
        }
        let mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
            .map_err(|e| VarStoreError::invalid(format!("integrity key rejected: {}", e)))?;
        Ok(HmacSha256 { mac })
    }
}

impl std::fmt::Debug for HmacSha256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSha256").finish_non_exhaustive()
    }
}

impl IntegrityMac for HmacSha256 {
    fn digest(&self, message: &[u8]) -> [u8; DIGEST_SIZE] {
        let mut mac = self.mac.clone();
        mac.update(message);
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&mac.finalize().into_bytes());
        digest
    }
}
