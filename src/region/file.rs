//! Memory-mapped file regions

use super::{check_bounds, erase_bytes, program_bytes, FlashRegion};
use crate::error::{Result, VarStoreError};
use crate::record::ERASED_BYTE;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File-backed region
///
/// A store image file holds both banks back to back; each bank is mapped
/// separately so the two can be erased and swapped independently.
pub struct FileRegion {
    map: MmapMut,
    path: PathBuf,
    offset: u64,
}

impl FileRegion {
    /// Create (or truncate) an image of two erased banks of `bank_size` bytes
    pub fn create_banks<P: AsRef<Path>>(path: P, bank_size: usize) -> Result<[FileRegion; 2]> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&vec![ERASED_BYTE; bank_size * 2])?;
        file.flush()?;

        Self::map_banks(&file, path.as_ref(), bank_size)
    }

    /// Open an existing image of two banks
    pub fn open_banks<P: AsRef<Path>>(path: P) -> Result<[FileRegion; 2]> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 || len % 2 != 0 {
            return Err(VarStoreError::io(format!(
                "store image {:?} has invalid length {}",
                path.as_ref(),
                len
            )));
        }

        Self::map_banks(&file, path.as_ref(), len / 2)
    }

    /// Open the image at `path`, creating it if it does not exist
    pub fn open_or_create<P: AsRef<Path>>(path: P, bank_size: usize) -> Result<[FileRegion; 2]> {
        if path.as_ref().exists() {
            Self::open_banks(path)
        } else {
            Self::create_banks(path, bank_size)
        }
    }

    fn map_banks(file: &File, path: &Path, bank_size: usize) -> Result<[FileRegion; 2]> {
        let map_bank = |index: u64| -> Result<FileRegion> {
            let offset = index * bank_size as u64;
            // SAFETY: the image file is owned by this store for its lifetime;
            // nothing else truncates or maps it concurrently.
            let map = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(bank_size)
                    .map_mut(file)?
            };
            Ok(FileRegion {
                map,
                path: path.to_path_buf(),
                offset,
            })
        };

        Ok([map_bank(0)?, map_bank(1)?])
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of this bank inside the image file
    pub fn file_offset(&self) -> u64 {
        self.offset
    }
}

impl FlashRegion for FileRegion {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.map.len(), offset, buf.len())?;
        buf.copy_from_slice(&self.map[offset..offset + buf.len()]);
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        program_bytes(&mut self.map, offset, data)
    }

    fn erase(&mut self) -> Result<()> {
        erase_bytes(&mut self.map);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}
