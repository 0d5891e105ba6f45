//! Namespace identifiers
//!
//! Variables are scoped by a 128-bit GUID. On the medium GUIDs use the EFI
//! mixed-endian layout: the first three fields are little-endian and the
//! trailing eight bytes are stored as-is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Size of a GUID on the medium
pub const GUID_SIZE: usize = 16;

/// Namespace identifier of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(Uuid);

impl Guid {
    /// The all-zero GUID
    pub const ZERO: Guid = Guid(Uuid::nil());

    /// Signature of a variable store header (`gEfiVariableGuid`)
    pub const VARIABLE_STORE: Guid = Guid::from_u128(0xddcf3616_3275_4164_98b6_fe85707ffe7d);

    /// Architectural namespace for `Boot####`, `BootOrder`, `SecureBoot`, ...
    pub const GLOBAL_VARIABLE: Guid = Guid::from_u128(0x8be4df61_93ca_11d2_aa0d_00e098032b8c);

    /// Reserved namespace holding protected-variable metadata
    pub const PROTECTED_METADATA: Guid = Guid::from_u128(0xb3e5f1a2_6c7d_4e8f_9a0b_1c2d3e4f5a6b);

    /// Build a GUID from its canonical integer form
    pub const fn from_u128(value: u128) -> Self {
        Guid(Uuid::from_u128(value))
    }

    /// Decode a GUID from its on-medium (mixed-endian) bytes
    pub fn from_bytes(bytes: [u8; GUID_SIZE]) -> Self {
        Guid(Uuid::from_bytes_le(bytes))
    }

    /// Decode a GUID from a slice holding at least 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; GUID_SIZE] = bytes.get(..GUID_SIZE)?.try_into().ok()?;
        Some(Self::from_bytes(raw))
    }

    /// Encode the GUID in its on-medium (mixed-endian) layout
    pub fn to_bytes(&self) -> [u8; GUID_SIZE] {
        self.0.to_bytes_le()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for Guid {
    fn from(value: Uuid) -> Self {
        Guid(value)
    }
}

impl FromStr for Guid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Guid)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_endian_layout() {
        let bytes = Guid::VARIABLE_STORE.to_bytes();
        // ddcf3616 stored little-endian, trailing bytes verbatim
        assert_eq!(&bytes[0..4], &[0x16, 0x36, 0xcf, 0xdd]);
        assert_eq!(&bytes[4..6], &[0x75, 0x32]);
        assert_eq!(&bytes[6..8], &[0x64, 0x41]);
        assert_eq!(&bytes[8..16], &[0x98, 0xb6, 0xfe, 0x85, 0x70, 0x7f, 0xfe, 0x7d]);
        assert_eq!(Guid::from_bytes(bytes), Guid::VARIABLE_STORE);
    }

    #[test]
    fn test_parse_and_display() {
        let guid: Guid = "8be4df61-93ca-11d2-aa0d-00e098032b8c".parse().unwrap();
        assert_eq!(guid, Guid::GLOBAL_VARIABLE);
        assert_eq!(guid.to_string(), "8be4df61-93ca-11d2-aa0d-00e098032b8c");
    }

    #[test]
    fn test_from_short_slice() {
        assert!(Guid::from_slice(&[0u8; 15]).is_none());
        assert_eq!(Guid::from_slice(&[0u8; 20]), Some(Guid::ZERO));
    }
}
