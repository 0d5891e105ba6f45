//! Fixed-capacity record buffer shared with lock-free readers
//!
//! Laid out exactly like a store bank (header followed by records) but held
//! in RAM as atomic bytes, so a reader racing a writer sees stale or torn
//! bytes instead of undefined behaviour. Torn reads are discarded by the
//! retry protocol in [`RuntimeCache`](super::RuntimeCache).

use crate::error::{Result, VarStoreError};
use crate::header::{StoreHeader, HEADER_SIZE};
use crate::name::VariableName;
use crate::record::{
    footprint, state, RecordHeader, VariableRecord, ERASED_BYTE, RECORD_HEADER_SIZE, STATE_OFFSET,
};
use crate::store::{scan_bank, VariableKey};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

pub(crate) struct CacheBuffer {
    label: &'static str,
    bytes: Box<[AtomicU8]>,
    /// First byte after the last record
    end: AtomicUsize,
    /// Bytes held by live records
    live: AtomicUsize,
    /// Offsets of live records; only changed while no reader is inside
    index: RwLock<AHashMap<VariableKey, usize>>,
}

impl CacheBuffer {
    /// Create an empty buffer of `size` bytes, header included
    pub fn new(label: &'static str, size: usize) -> Result<Self> {
        if size < HEADER_SIZE + RECORD_HEADER_SIZE {
            return Err(VarStoreError::invalid(format!(
                "{} cache buffer of {} bytes is too small",
                label, size
            )));
        }

        let bytes: Box<[AtomicU8]> = (0..size).map(|_| AtomicU8::new(ERASED_BYTE)).collect();
        let buffer = CacheBuffer {
            label,
            bytes,
            end: AtomicUsize::new(HEADER_SIZE),
            live: AtomicUsize::new(0),
            index: RwLock::new(AHashMap::new()),
        };
        buffer.store_bytes(0, &StoreHeader::new(size as u32).to_bytes());
        Ok(buffer)
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Bytes available for records
    pub fn capacity(&self) -> usize {
        self.bytes.len() - HEADER_SIZE
    }

    /// Bytes left for appending without compaction
    pub fn free(&self) -> usize {
        self.bytes.len() - self.end.load(Ordering::Acquire)
    }

    /// Bytes available once tombstones are reclaimed
    pub fn remaining(&self) -> usize {
        self.capacity() - self.live.load(Ordering::Acquire)
    }

    /// Footprint of the live copy of `key`, zero when absent
    pub fn live_footprint(&self, key: &VariableKey) -> usize {
        self.offset_of(key)
            .and_then(|offset| self.header_at(offset))
            .map(|header| footprint(header.name_size as usize, header.data_size as usize))
            .unwrap_or(0)
    }

    fn store_bytes(&self, offset: usize, data: &[u8]) {
        for (slot, &byte) in self.bytes[offset..offset + data.len()].iter().zip(data) {
            slot.store(byte, Ordering::Relaxed);
        }
    }

    fn load_bytes(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        if end > self.end.load(Ordering::Acquire) {
            return None;
        }
        Some(
            self.bytes[offset..end]
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
        )
    }

    fn header_at(&self, offset: usize) -> Option<RecordHeader> {
        RecordHeader::from_bytes(&self.load_bytes(offset, RECORD_HEADER_SIZE)?)
    }

    /// Copy of the used part of the buffer
    pub fn snapshot(&self) -> Vec<u8> {
        let end = self.end.load(Ordering::Acquire).min(self.bytes.len());
        self.bytes[..end]
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    pub fn offset_of(&self, key: &VariableKey) -> Option<usize> {
        self.index.read().get(key).copied()
    }

    /// Decode the live record stored under `key`
    pub fn get(&self, key: &VariableKey) -> Option<VariableRecord> {
        let offset = self.offset_of(key)?;
        let header = self.header_at(offset)?;
        let payload = self.load_bytes(
            offset + RECORD_HEADER_SIZE,
            header.name_size as usize + header.data_size as usize,
        )?;
        VariableRecord::decode(&header, &payload).ok()
    }

    /// First live key stored after the record at `after`, or from the start
    pub fn next_key(&self, after: Option<usize>) -> Option<VariableKey> {
        let mut offset = match after {
            None => HEADER_SIZE,
            Some(offset) => {
                let header = self.header_at(offset)?;
                offset + footprint(header.name_size as usize, header.data_size as usize)
            }
        };

        while let Some(header) = self.header_at(offset) {
            let name_size = header.name_size as usize;
            if state::is_live(header.state) {
                let name = VariableName::from_ucs2_bytes(
                    &self.load_bytes(offset + RECORD_HEADER_SIZE, name_size)?,
                )
                .ok()?;
                return Some(VariableKey::new(name, header.namespace));
            }
            offset += footprint(name_size, header.data_size as usize);
        }
        None
    }

    /// Append a committed record. Writers must hold the cache update guard.
    pub fn append(&self, record: &VariableRecord) -> Result<()> {
        let footprint = record.footprint();
        let offset = self.end.load(Ordering::Acquire);
        if offset + footprint > self.bytes.len() {
            return Err(VarStoreError::OutOfResources);
        }

        self.store_bytes(offset, &record.encode(state::ADDED));
        self.end.store(offset + footprint, Ordering::Release);
        self.live.fetch_add(footprint, Ordering::AcqRel);
        self.index.write().insert(
            VariableKey::new(record.name.clone(), record.namespace),
            offset,
        );
        Ok(())
    }

    /// Tombstone the live copy of `key`. Writers must hold the cache update guard.
    pub fn remove(&self, key: &VariableKey) -> bool {
        let freed = self.live_footprint(key);
        let Some(offset) = self.index.write().remove(key) else {
            return false;
        };
        self.bytes[offset + STATE_OFFSET].fetch_and(state::DELETED, Ordering::Relaxed);
        self.live.fetch_sub(freed, Ordering::AcqRel);
        true
    }

    /// Rewrite the live records from the start of the buffer
    ///
    /// Writers must hold the cache update guard with no reader inside.
    /// Returns the number of bytes reclaimed.
    pub fn compact(&self) -> Result<usize> {
        let before = self.end.load(Ordering::Acquire);
        let records = live_records(&self.snapshot());

        self.store_bytes(HEADER_SIZE, &vec![ERASED_BYTE; before - HEADER_SIZE]);
        self.end.store(HEADER_SIZE, Ordering::Release);
        self.live.store(0, Ordering::Release);
        self.index.write().clear();

        for record in &records {
            self.append(record)?;
        }
        Ok(before - self.end.load(Ordering::Acquire))
    }
}

/// Live records of a buffer snapshot in storage order
fn live_records(image: &[u8]) -> Vec<VariableRecord> {
    scan_bank(image, image.len())
        .records
        .into_iter()
        .filter(|r| r.is_live())
        .filter_map(|r| {
            let start = r.offset + RECORD_HEADER_SIZE;
            VariableRecord::decode(&r.header, &image[start..]).ok()
        })
        .collect()
}
