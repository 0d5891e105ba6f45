//! Variable names
//!
//! Names are stored on the medium as NUL-terminated UCS-2 little-endian
//! strings. In memory they are kept as Rust strings restricted to the basic
//! multilingual plane.

use crate::error::{Result, VarStoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a variable
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariableName(String);

impl VariableName {
    /// Create a name, rejecting characters that have no UCS-2 encoding
    pub fn new<S: Into<String>>(name: S) -> Result<Self> {
        let name = name.into();
        if name.contains('\0') {
            return Err(VarStoreError::invalid("variable name contains a NUL character"));
        }
        if name.chars().any(|c| c as u32 > 0xFFFF) {
            return Err(VarStoreError::invalid(
                "variable name contains characters outside UCS-2",
            ));
        }
        Ok(VariableName(name))
    }

    /// Name from a literal known to be valid UCS-2
    pub(crate) fn from_static(name: &'static str) -> Self {
        VariableName(name.to_string())
    }

    /// The empty name, used to restart name enumeration
    pub fn empty() -> Self {
        VariableName(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Size in bytes of the encoded name, terminator included
    pub fn encoded_len(&self) -> usize {
        (self.0.encode_utf16().count() + 1) * 2
    }

    /// Encode as NUL-terminated UCS-2LE
    pub fn to_ucs2_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        for unit in self.0.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0, 0]);
        bytes
    }

    /// Decode a NUL-terminated UCS-2LE name
    pub fn from_ucs2_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 || bytes.len() % 2 != 0 {
            return Err(VarStoreError::invalid(format!(
                "encoded name has invalid length {}",
                bytes.len()
            )));
        }

        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let (terminator, body) = units
            .split_last()
            .ok_or_else(|| VarStoreError::invalid("encoded name is empty"))?;
        if *terminator != 0 {
            return Err(VarStoreError::invalid("encoded name is not NUL-terminated"));
        }

        let name: String = char::decode_utf16(body.iter().copied())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| VarStoreError::invalid("encoded name is not valid UCS-2"))?;

        Self::new(name)
    }
}

impl TryFrom<&str> for VariableName {
    type Error = VarStoreError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for VariableName {
    type Error = VarStoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<VariableName> for String {
    fn from(value: VariableName) -> Self {
        value.0
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
