//! Record store
//!
//! Maps a conventional key/value interface onto a medium that only supports
//! clearing bits:
//!
//! - new records are appended after the last record
//! - deletion clears state bits in place (tombstoning)
//! - a replacement marks the old copy in-transition, appends the new copy and
//!   then tombstones the old copy, so a crash at any point leaves exactly one
//!   live copy after the next load
//! - tombstoned space is reclaimed by compaction, which copies every live record
//!   into the erased spare bank and swaps banks
//!
//! ```text
//! ┌──────────────────────── bank ────────────────────────┐
//! │ StoreHeader (28 bytes)                               │
//! ├──────────────────────────────────────────────────────┤
//! │ record │ record (deleted) │ record │ ...  │ 0xFF ... │
//! └──────────────────────────────────────────────────────┘
//!                                             ^ write offset
//! ```

mod compact;
mod scan;


use crate::error::{Result, VarStoreError};
use crate::guid::Guid;
use crate::header::{StoreHeader, FORMAT_OFFSET, HEADER_SIZE};
use crate::name::VariableName;
use crate::record::{state, RecordHeader, VariableRecord, RECORD_HEADER_SIZE, STATE_OFFSET};
use crate::region::FlashRegion;
use ahash::AHashMap;
pub(crate) use scan::scan_bank;
use scan::ScannedRecord;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Identity of a variable
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableKey {
    pub name: VariableName,
    pub namespace: Guid,
}

impl VariableKey {
    pub fn new(name: VariableName, namespace: Guid) -> Self {
        VariableKey { name, namespace }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// Space accounting for a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreUsage {
    /// Bytes available for records (bank size minus header)
    pub capacity: usize,
    /// Bytes occupied by live records
    pub live_bytes: usize,
    /// Bytes occupied by tombstones and abandoned writes
    pub reclaimable_bytes: usize,
    /// Bytes available for appending without compaction
    pub free_bytes: usize,
}

impl StoreUsage {
    /// Bytes available once tombstones are reclaimed
    pub fn remaining(&self) -> usize {
        self.capacity - self.live_bytes
    }
}

/// Location of a live record in the active bank
#[derive(Debug, Clone)]
struct Slot {
    key: VariableKey,
    header: RecordHeader,
}

impl Slot {
    fn footprint(&self) -> usize {
        crate::record::footprint(
            self.header.name_size as usize,
            self.header.data_size as usize,
        )
    }
}

/// Variable record store over two banks of a flash region
pub struct RecordStore<R: FlashRegion> {
    banks: [R; 2],
    active: usize,
    /// Size declared by the active bank header
    size: usize,
    write_offset: usize,
    /// Live records by offset, i.e. in storage order
    live: BTreeMap<usize, Slot>,
    index: AHashMap<VariableKey, usize>,
    live_bytes: usize,
    reclaimable: usize,
}

impl<R: FlashRegion> RecordStore<R> {
    /// Load a store from its two banks
    ///
    /// The first bank with a trusted header is used. When neither bank is
    /// trusted the store is formatted empty; a damaged store is never parsed
    /// partially.
    pub fn load(banks: [R; 2]) -> Result<Self> {
        if banks[0].len() != banks[1].len() {
            return Err(VarStoreError::invalid(format!(
                "bank sizes differ: {} vs {}",
                banks[0].len(),
                banks[1].len()
            )));
        }
        if banks[0].len() < HEADER_SIZE + RECORD_HEADER_SIZE {
            return Err(VarStoreError::invalid(format!(
                "bank of {} bytes is too small",
                banks[0].len()
            )));
        }

        let mut trusted = None;
        for (i, bank) in banks.iter().enumerate() {
            let header = StoreHeader::from_bytes(&bank.read_vec(0, HEADER_SIZE)?)?;
            match header.validate(bank.len()) {
                Ok(()) => {
                    trusted = Some(i);
                    break;
                }
                Err(e) => debug!("Bank {} not usable: {}", i, e),
            }
        }

        let mut store = RecordStore {
            banks,
            active: 0,
            size: 0,
            write_offset: HEADER_SIZE,
            live: BTreeMap::new(),
            index: AHashMap::new(),
            live_bytes: 0,
            reclaimable: 0,
        };

        match trusted {
            Some(active) => {
                store.active = active;
                store.rebuild()?;
                info!(
                    "Loaded variable store from bank {}: {} live records, {} bytes free",
                    active,
                    store.live.len(),
                    store.size - store.write_offset
                );
            }
            None => {
                warn!("No trusted variable store bank found, formatting an empty store");
                store.format()?;
            }
        }

        Ok(store)
    }

    /// Erase both banks and write an empty store to bank 0
    pub fn format(&mut self) -> Result<()> {
        for bank in self.banks.iter_mut() {
            bank.erase()?;
        }
        let size = self.banks[0].len();
        write_header(&mut self.banks[0], size)?;
        self.banks[0].flush()?;

        self.active = 0;
        self.size = size;
        self.write_offset = HEADER_SIZE;
        self.live.clear();
        self.index.clear();
        self.live_bytes = 0;
        self.reclaimable = 0;
        info!("Formatted variable store ({} bytes per bank)", size);
        Ok(())
    }

    /// Rebuild in-memory state by scanning the active bank
    fn rebuild(&mut self) -> Result<()> {
        let bank = &self.banks[self.active];
        let image = bank.read_vec(0, bank.len())?;
        let header = StoreHeader::from_bytes(&image)?;
        self.size = header.size as usize;

        let scan = scan_bank(&image, self.size);
        self.live.clear();
        self.index.clear();
        self.live_bytes = 0;
        self.reclaimable = 0;

        let mut superseded = Vec::new();
        for record in &scan.records {
            if !record.is_live() {
                self.reclaimable += record.footprint();
                continue;
            }
            if let Some(stale) = self.insert_scanned(record) {
                superseded.push(stale);
            }
        }

        self.write_offset = scan.end;
        if !scan.tail_erased {
            warn!(
                "Variable store has unparseable data from offset {}, reserving it until compaction",
                scan.end
            );
            self.reclaimable += self.size - scan.end;
            self.write_offset = self.size;
        }

        // Finish interrupted replacements
        if !superseded.is_empty() {
            info!("Completing {} interrupted replacements", superseded.len());
            for offset in superseded {
                self.mark(offset, state::DELETED)?;
            }
            self.banks[self.active].flush()?;
        }

        Ok(())
    }

    /// Index a live scanned record, returning the offset of a copy it supersedes
    fn insert_scanned(&mut self, record: &ScannedRecord) -> Option<usize> {
        let name = record.name.clone()?;
        let key = VariableKey::new(name, record.header.namespace);
        let slot = Slot {
            key: key.clone(),
            header: record.header,
        };

        let previous = self.index.get(&key).copied();
        let new_is_transition = state::is_in_transition(record.header.state);

        match previous {
            Some(prev) => {
                let prev_is_transition = self
                    .live
                    .get(&prev)
                    .map(|s| state::is_in_transition(s.header.state))
                    .unwrap_or(false);

                // An in-transition copy loses to a fully added copy; between two
                // copies in the same state the later one is newer.
                if new_is_transition && !prev_is_transition {
                    self.reclaimable += slot.footprint();
                    return Some(record.offset);
                }

                if let Some(old) = self.live.remove(&prev) {
                    self.live_bytes -= old.footprint();
                    self.reclaimable += old.footprint();
                }
                self.live_bytes += slot.footprint();
                self.live.insert(record.offset, slot);
                self.index.insert(key, record.offset);
                Some(prev)
            }
            None => {
                self.live_bytes += slot.footprint();
                self.live.insert(record.offset, slot);
                self.index.insert(key, record.offset);
                None
            }
        }
    }

    /// Clear state bits of the record at `offset`
    fn mark(&mut self, offset: usize, mask: u8) -> Result<()> {
        let bank = &mut self.banks[self.active];
        let current = bank.read_vec(offset + STATE_OFFSET, 1)?[0];
        bank.program(offset + STATE_OFFSET, &[current & mask])
    }

    /// Bytes available for records
    pub fn capacity(&self) -> usize {
        self.size - HEADER_SIZE
    }

    pub fn usage(&self) -> StoreUsage {
        StoreUsage {
            capacity: self.capacity(),
            live_bytes: self.live_bytes,
            reclaimable_bytes: self.reclaimable,
            free_bytes: self.size - self.write_offset,
        }
    }

    /// Number of live variables
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Index of the bank currently holding the store
    pub fn active_bank(&self) -> usize {
        self.active
    }

    /// Release the underlying banks
    pub fn into_banks(self) -> [R; 2] {
        self.banks
    }

    /// Raw image of the active bank
    pub fn image(&self) -> Result<Vec<u8>> {
        let bank = &self.banks[self.active];
        bank.read_vec(0, bank.len())
    }

    pub fn contains(&self, name: &VariableName, namespace: &Guid) -> bool {
        self.index
            .contains_key(&VariableKey::new(name.clone(), *namespace))
    }

    /// Look up a live variable
    pub fn find(&self, name: &VariableName, namespace: &Guid) -> Result<VariableRecord> {
        let key = VariableKey::new(name.clone(), *namespace);
        let offset = *self.index.get(&key).ok_or(VarStoreError::NotFound)?;
        self.read_at(offset)
    }

    fn read_at(&self, offset: usize) -> Result<VariableRecord> {
        let slot = self
            .live
            .get(&offset)
            .ok_or_else(|| VarStoreError::io(format!("no live record at offset {}", offset)))?;
        let payload_len = slot.header.name_size as usize + slot.header.data_size as usize;
        let payload = self.banks[self.active].read_vec(offset + RECORD_HEADER_SIZE, payload_len)?;
        VariableRecord::decode(&slot.header, &payload)
    }

    /// Live variables in storage order
    pub fn iter(&self) -> impl Iterator<Item = Result<VariableRecord>> + '_ {
        self.live.keys().map(move |&offset| self.read_at(offset))
    }

    /// Keys of all live variables in storage order
    pub fn keys(&self) -> impl Iterator<Item = &VariableKey> + '_ {
        self.live.values().map(|slot| &slot.key)
    }

    /// Key following `previous` in storage order, or the first key for `None`
    ///
    /// Returns `InvalidParameter` when `previous` is not a live variable.
    pub fn next_after(&self, previous: Option<&VariableKey>) -> Result<Option<VariableKey>> {
        let start = match previous {
            None => 0,
            Some(key) => {
                let offset = self.index.get(key).ok_or_else(|| {
                    VarStoreError::invalid(format!("{} is not a live variable", key))
                })?;
                offset + 1
            }
        };
        Ok(self.live.range(start..).next().map(|(_, slot)| slot.key.clone()))
    }

    /// Append a record for a key that is not live yet
    ///
    /// Fails with `OutOfResources` when the record does not fit in the free
    /// space after the last record. Compaction is not attempted here; see
    /// [`RecordStore::update`].
    pub fn append(&mut self, record: &VariableRecord) -> Result<()> {
        let key = VariableKey::new(record.name.clone(), record.namespace);
        if self.index.contains_key(&key) {
            return Err(VarStoreError::invalid(format!("{} already exists", key)));
        }
        self.append_unchecked(key, record)
    }

    fn append_unchecked(&mut self, key: VariableKey, record: &VariableRecord) -> Result<()> {
        let needed = record.footprint();
        if self.write_offset + needed > self.size {
            return Err(VarStoreError::OutOfResources);
        }

        let offset = self.write_offset;
        let bytes = record.encode(state::HEADER_VALID_ONLY);

        // Header first, then payload, then the commit bit
        self.banks[self.active].program(offset, &bytes[..RECORD_HEADER_SIZE])?;
        // The space is consumed from here on, even if the commit never lands
        self.write_offset = offset + needed;
        if let Err(e) = self.commit_record(offset, &bytes) {
            warn!("Write of {} at offset {} did not complete: {}", key, offset, e);
            self.reclaimable += needed;
            return Err(e);
        }

        debug!("Appended {} ({} bytes) at offset {}", key, needed, offset);
        self.live_bytes += needed;
        self.live.insert(
            offset,
            Slot {
                key: key.clone(),
                header: record.header(state::ADDED),
            },
        );
        self.index.insert(key, offset);
        Ok(())
    }

    fn commit_record(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let bank = &mut self.banks[self.active];
        bank.program(offset + RECORD_HEADER_SIZE, &bytes[RECORD_HEADER_SIZE..])?;
        bank.program(offset + STATE_OFFSET, &[state::ADDED])?;
        bank.flush()
    }

    /// Tombstone a live variable
    pub fn tombstone(&mut self, name: &VariableName, namespace: &Guid) -> Result<()> {
        let key = VariableKey::new(name.clone(), *namespace);
        let offset = *self.index.get(&key).ok_or(VarStoreError::NotFound)?;

        self.mark(offset, state::IN_DELETED_TRANSITION)?;
        self.mark(offset, state::DELETED)?;
        self.banks[self.active].flush()?;
        self.forget(offset);

        debug!("Tombstoned {} at offset {}", key, offset);
        Ok(())
    }

    /// Tombstone a live variable and return its last value
    pub fn remove(&mut self, name: &VariableName, namespace: &Guid) -> Result<VariableRecord> {
        let record = self.find(name, namespace)?;
        self.tombstone(name, namespace)?;
        Ok(record)
    }

    /// Drop a slot from the in-memory index after it has been tombstoned
    fn forget(&mut self, offset: usize) {
        if let Some(slot) = self.live.remove(&offset) {
            let footprint = slot.footprint();
            self.live_bytes -= footprint;
            self.reclaimable += footprint;
            self.index.remove(&slot.key);
        }
    }

    /// Footprint of the live copy of `key`, zero when absent
    fn live_footprint(&self, key: &VariableKey) -> usize {
        self.index
            .get(key)
            .and_then(|offset| self.live.get(offset))
            .map(Slot::footprint)
            .unwrap_or(0)
    }

    /// Whether writing every record in turn would succeed, compacting as needed
    ///
    /// Records must have distinct keys. Each one replaces the live copy of its
    /// key, if any.
    pub fn can_hold(&self, records: &[&VariableRecord]) -> bool {
        let mut live = self.live_bytes;
        for record in records {
            let key = VariableKey::new(record.name.clone(), record.namespace);
            live = live.saturating_sub(self.live_footprint(&key)) + record.footprint();
        }
        live <= self.capacity()
    }

    /// Create or replace a variable
    ///
    /// Runs compaction when the record only fits once tombstones are
    /// reclaimed. On `OutOfResources` the store is unchanged.
    pub fn update(&mut self, record: &VariableRecord) -> Result<()> {
        let key = VariableKey::new(record.name.clone(), record.namespace);
        let needed = record.footprint();
        let existing = self.index.get(&key).copied();
        let replaced = self.live_footprint(&key);

        if self.write_offset + needed > self.size {
            if self.live_bytes - replaced + needed > self.capacity() {
                debug!(
                    "No room for {} ({} bytes, {} live of {})",
                    key,
                    needed,
                    self.live_bytes,
                    self.capacity()
                );
                return Err(VarStoreError::OutOfResources);
            }
            return self.compact_with(existing.map(|_| &key), Some(record));
        }

        match existing {
            None => self.append_unchecked(key, record),
            Some(old) => {
                self.mark(old, state::IN_DELETED_TRANSITION)?;
                if let Some(slot) = self.live.get_mut(&old) {
                    slot.header.state &= state::IN_DELETED_TRANSITION;
                }
                self.index.remove(&key);

                if let Err(e) = self.append_unchecked(key.clone(), record) {
                    // The in-transition copy is still the live one
                    self.index.insert(key, old);
                    return Err(e);
                }

                self.mark(old, state::DELETED)?;
                self.banks[self.active].flush()?;
                if let Some(slot) = self.live.remove(&old) {
                    self.live_bytes -= slot.footprint();
                    self.reclaimable += slot.footprint();
                }
                Ok(())
            }
        }
    }

    /// Reclaim tombstoned space
    pub fn compact(&mut self) -> Result<()> {
        self.compact_with(None, None)
    }
}

/// Program a store header into an erased bank, sentinels last
fn write_header<R: FlashRegion>(bank: &mut R, size: usize) -> Result<()> {
    let bytes = StoreHeader::new(size as u32).to_bytes();
    bank.program(0, &bytes[..FORMAT_OFFSET])?;
    bank.program(FORMAT_OFFSET + 2, &bytes[FORMAT_OFFSET + 2..])?;
    bank.program(FORMAT_OFFSET, &bytes[FORMAT_OFFSET..FORMAT_OFFSET + 2])
}
