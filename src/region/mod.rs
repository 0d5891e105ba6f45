//! Backing regions for variable store banks
//!
//! A region behaves like NOR flash: erased bytes read as `0xFF`, a program
//! operation may only clear bits, and setting a bit back requires erasing the
//! whole region.

mod file;
mod memory;

pub use file::FileRegion;
pub use memory::MemoryRegion;

use crate::error::{Result, VarStoreError};
use crate::record::ERASED_BYTE;

/// Byte-addressed region with bit-clear-only writes
pub trait FlashRegion: Send {
    /// Size of the region in bytes
    fn len(&self) -> usize;

    /// Read `buf.len()` bytes starting at `offset`
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Program `data` at `offset`
    ///
    /// Fails without modifying the region if any byte would need a bit set.
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    /// Reset every byte to the erased value
    fn erase(&mut self) -> Result<()>;

    /// Make previous writes durable
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes starting at `offset` into a new buffer
    fn read_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Check that `offset..offset+len` lies within a region of `region_len` bytes
pub(crate) fn check_bounds(region_len: usize, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= region_len => Ok(()),
        _ => Err(VarStoreError::io(format!(
            "access {}..{} outside region of {} bytes",
            offset,
            offset.saturating_add(len),
            region_len
        ))),
    }
}

/// Apply a program operation to a byte slice with flash semantics
pub(crate) fn program_bytes(target: &mut [u8], offset: usize, data: &[u8]) -> Result<()> {
    check_bounds(target.len(), offset, data.len())?;

    let window = &mut target[offset..offset + data.len()];
    if let Some(pos) = window
        .iter()
        .zip(data)
        .position(|(old, new)| old & new != *new)
    {
        return Err(VarStoreError::io(format!(
            "program at offset {} would set bits ({:#04x} -> {:#04x})",
            offset + pos,
            window[pos],
            data[pos]
        )));
    }

    window.copy_from_slice(data);
    Ok(())
}

pub(crate) fn erase_bytes(target: &mut [u8]) {
    target.fill(ERASED_BYTE);
}
