use crate::error::{Result, VarStoreError};
use crate::guid::{Guid, GUID_SIZE};

/// Size of the store header in bytes
pub const HEADER_SIZE: usize = 28;

/// `format` value of a formatted store
pub const VARIABLE_STORE_FORMATTED: u8 = 0x5A;

/// `health` value of an uncorrupted store
pub const VARIABLE_STORE_HEALTHY: u8 = 0xFE;

/// `health` value written over a bank retired by compaction
pub const VARIABLE_STORE_RETIRED: u8 = 0x00;

/// Offset of the `health` byte inside the header
pub const HEALTH_OFFSET: usize = 21;

/// Offset of the `format` byte inside the header
pub const FORMAT_OFFSET: usize = 20;

/// Variable store header
///
/// Occupies the first 28 bytes of a bank. The `format` and `health` bytes are
/// written last when a bank is prepared, so a bank whose preparation was
/// interrupted never validates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    /// Namespace of the store format (`gEfiVariableGuid`)
    pub signature: Guid,

    /// Total bank size in bytes, header included
    pub size: u32,

    /// Must equal [`VARIABLE_STORE_FORMATTED`]
    pub format: u8,

    /// Must equal [`VARIABLE_STORE_HEALTHY`]
    pub health: u8,

    pub reserved: u16,
    pub reserved1: u32,
}

impl StoreHeader {
    /// Create a header for a bank of `size` bytes
    pub fn new(size: u32) -> Self {
        StoreHeader {
            signature: Guid::VARIABLE_STORE,
            size,
            format: VARIABLE_STORE_FORMATTED,
            health: VARIABLE_STORE_HEALTHY,
            reserved: 0,
            reserved1: 0,
        }
    }

    /// Check both sentinels, the signature and the declared size
    pub fn validate(&self, bank_len: usize) -> Result<()> {
        if self.signature != Guid::VARIABLE_STORE {
            return Err(VarStoreError::Corrupt(format!(
                "unexpected store signature {}",
                self.signature
            )));
        }

        if self.format != VARIABLE_STORE_FORMATTED {
            return Err(VarStoreError::Corrupt(format!(
                "store not formatted (format byte {:#04x})",
                self.format
            )));
        }

        if self.health != VARIABLE_STORE_HEALTHY {
            return Err(VarStoreError::Corrupt(format!(
                "store not healthy (health byte {:#04x})",
                self.health
            )));
        }

        let size = self.size as usize;
        if size < HEADER_SIZE || size > bank_len {
            return Err(VarStoreError::Corrupt(format!(
                "declared size {} does not fit bank of {} bytes",
                size, bank_len
            )));
        }

        Ok(())
    }

    pub fn is_trusted(&self, bank_len: usize) -> bool {
        self.validate(bank_len).is_ok()
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..16].copy_from_slice(&self.signature.to_bytes());
        bytes[16..20].copy_from_slice(&self.size.to_le_bytes());
        bytes[FORMAT_OFFSET] = self.format;
        bytes[HEALTH_OFFSET] = self.health;
        bytes[22..24].copy_from_slice(&self.reserved.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.reserved1.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes without validating it
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(VarStoreError::Corrupt(format!(
                "insufficient bytes for store header: {}",
                bytes.len()
            )));
        }

        let signature = Guid::from_slice(&bytes[0..GUID_SIZE])
            .ok_or_else(|| VarStoreError::Corrupt("short signature".to_string()))?;

        Ok(StoreHeader {
            signature,
            size: le_u32(bytes, 16),
            format: bytes[FORMAT_OFFSET],
            health: bytes[HEALTH_OFFSET],
            reserved: le_u16(bytes, 22),
            reserved1: le_u32(bytes, 24),
        })
    }
}

pub(crate) fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_creation() {
        let header = StoreHeader::new(4096);
        assert_eq!(header.signature, Guid::VARIABLE_STORE);
        assert_eq!(header.format, VARIABLE_STORE_FORMATTED);
        assert_eq!(header.health, VARIABLE_STORE_HEALTHY);
        assert!(header.validate(4096).is_ok());
    }

    #[test]
    fn test_header_layout() {
        let bytes = StoreHeader::new(0x1000).to_bytes();
        assert_eq!(&bytes[16..20], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(bytes[20], 0x5A);
        assert_eq!(bytes[21], 0xFE);
        assert_eq!(&bytes[22..28], &[0; 6]);
    }

    #[test]
    fn test_header_serialization() {
        let header = StoreHeader::new(8192);
        let parsed = StoreHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_bad_format_byte() {
        let mut header = StoreHeader::new(4096);
        header.format = 0xFF;
        assert!(matches!(header.validate(4096), Err(VarStoreError::Corrupt(_))));
    }

    #[test]
    fn test_bad_health_byte() {
        let mut header = StoreHeader::new(4096);
        header.health = VARIABLE_STORE_RETIRED;
        assert!(!header.is_trusted(4096));
    }

    #[test]
    fn test_declared_size_exceeds_bank() {
        let header = StoreHeader::new(8192);
        assert!(!header.is_trusted(4096));
    }

    #[test]
    fn test_erased_bank_is_untrusted() {
        let erased = [0xFFu8; HEADER_SIZE];
        let header = StoreHeader::from_bytes(&erased).unwrap();
        assert!(!header.is_trusted(4096));
    }

    #[test]
    fn test_short_input() {
        assert!(StoreHeader::from_bytes(&[0u8; 10]).is_err());
    }
}
