use super::{check_bounds, erase_bytes, program_bytes, FlashRegion};
use crate::error::Result;
use crate::record::ERASED_BYTE;

/// RAM-backed region
///
/// Used for the volatile store and for tests.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    bytes: Vec<u8>,
}

impl MemoryRegion {
    /// Create an erased region of `len` bytes
    pub fn new(len: usize) -> Self {
        MemoryRegion {
            bytes: vec![ERASED_BYTE; len],
        }
    }

    /// Wrap an existing image, e.g. one read from a dump
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        MemoryRegion { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl FlashRegion for MemoryRegion {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.bytes.len(), offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        program_bytes(&mut self.bytes, offset, data)
    }

    fn erase(&mut self) -> Result<()> {
        erase_bytes(&mut self.bytes);
        Ok(())
    }
}
