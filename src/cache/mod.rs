//! Runtime variable cache
//!
//! A RAM mirror of the runtime-visible variables, built once when the
//! initialization window closes and served without touching the medium.
//!
//! Three fixed buffers, each formatted like a store bank:
//! - boot snapshot: non-volatile variables present when the window closed
//! - runtime NV: non-volatile variables written after the window closed
//! - volatile: volatile variables
//!
//! Readers never wait on the writer lock. A writer raises the pending-update
//! flag, waits for readers already inside to leave, and bumps a sequence
//! counter around its changes; readers that see the flag back off, and
//! readers that see the sequence move retry. Each buffer keeps an offset
//! index, so a lookup decodes only the record it returns.
//!
//! A write that does not fit behind the last record compacts its buffer in
//! place first. This happens inside the update, while no reader is inside.

mod buffer;

use crate::attributes::Attributes;
use crate::error::{Result, VarStoreError};
use crate::guid::Guid;
use crate::name::VariableName;
use crate::record::VariableRecord;
use crate::store::VariableKey;
use buffer::CacheBuffer;
use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

/// Sizes of the three cache buffers, headers included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCapacities {
    pub boot_snapshot: usize,
    pub runtime_nv: usize,
    pub volatile: usize,
}

impl Default for CacheCapacities {
    fn default() -> Self {
        CacheCapacities {
            boot_snapshot: 64 * 1024,
            runtime_nv: 32 * 1024,
            volatile: 32 * 1024,
        }
    }
}

/// Space figures for one cache buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSpace {
    pub capacity: usize,
    pub free: usize,
}

/// Runtime cache
pub struct RuntimeCache {
    boot: CacheBuffer,
    runtime_nv: CacheBuffer,
    volatile: CacheBuffer,
    /// Odd while an update is being applied
    sequence: CachePadded<AtomicU64>,
    pending_update: CachePadded<AtomicBool>,
    readers: CachePadded<AtomicUsize>,
    writer: Mutex<()>,
}

/// Held by a writer for the duration of an update
struct UpdateGuard<'a> {
    cache: &'a RuntimeCache,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.cache.sequence.fetch_add(1, Ordering::Release);
        self.cache.pending_update.store(false, Ordering::SeqCst);
    }
}

impl RuntimeCache {
    /// Build the cache from the runtime-visible variables of both stores
    ///
    /// Variables without `RUNTIME_ACCESS` are left out, since nothing can
    /// observe them once the window is closed.
    pub fn build<N, V>(
        capacities: CacheCapacities,
        nv_records: N,
        volatile_records: V,
    ) -> Result<Self>
    where
        N: IntoIterator<Item = VariableRecord>,
        V: IntoIterator<Item = VariableRecord>,
    {
        let cache = RuntimeCache {
            boot: CacheBuffer::new("boot snapshot", capacities.boot_snapshot)?,
            runtime_nv: CacheBuffer::new("runtime NV", capacities.runtime_nv)?,
            volatile: CacheBuffer::new("volatile", capacities.volatile)?,
            sequence: CachePadded::new(AtomicU64::new(0)),
            pending_update: CachePadded::new(AtomicBool::new(false)),
            readers: CachePadded::new(AtomicUsize::new(0)),
            writer: Mutex::new(()),
        };

        let mut count = 0;
        for (records, buffer) in [
            (nv_records.into_iter().collect::<Vec<_>>(), &cache.boot),
            (volatile_records.into_iter().collect(), &cache.volatile),
        ] {
            for record in records {
                if !record.attributes.contains(Attributes::RUNTIME_ACCESS) {
                    continue;
                }
                buffer.append(&record).map_err(|e| {
                    debug!("{} cache buffer full while building", buffer.label());
                    e
                })?;
                count += 1;
            }
        }

        info!("Runtime cache built with {} variables", count);
        Ok(cache)
    }

    fn buffers(&self) -> [&CacheBuffer; 3] {
        [&self.boot, &self.runtime_nv, &self.volatile]
    }

    /// Run `f` against a consistent view of the buffers
    fn read<T>(&self, f: impl Fn() -> T) -> T {
        let backoff = Backoff::new();
        loop {
            if self.pending_update.load(Ordering::SeqCst) {
                backoff.snooze();
                continue;
            }

            self.readers.fetch_add(1, Ordering::SeqCst);
            if self.pending_update.load(Ordering::SeqCst) {
                self.readers.fetch_sub(1, Ordering::SeqCst);
                backoff.snooze();
                continue;
            }

            let start = self.sequence.load(Ordering::Acquire);
            let value = f();
            fence(Ordering::Acquire);
            let end = self.sequence.load(Ordering::Relaxed);
            self.readers.fetch_sub(1, Ordering::SeqCst);

            if start == end && start % 2 == 0 {
                return value;
            }
            backoff.snooze();
        }
    }

    fn begin_update(&self) -> UpdateGuard<'_> {
        let lock = self.writer.lock();
        self.pending_update.store(true, Ordering::SeqCst);

        let backoff = Backoff::new();
        while self.readers.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }

        self.sequence.fetch_add(1, Ordering::Release);
        UpdateGuard {
            cache: self,
            _lock: lock,
        }
    }

    /// Look up a variable
    pub fn get(&self, name: &VariableName, namespace: &Guid) -> Result<VariableRecord> {
        let key = VariableKey::new(name.clone(), *namespace);
        self.read(|| self.buffers().iter().find_map(|buffer| buffer.get(&key)))
            .ok_or(VarStoreError::NotFound)
    }

    /// Key following `previous` in enumeration order, or the first key for `None`
    ///
    /// Order is boot snapshot, then runtime NV, then volatile, storage order
    /// within each. A `previous` key that is no longer cached is an
    /// `InvalidParameter`.
    pub fn next_name(&self, previous: Option<&VariableKey>) -> Result<Option<VariableKey>> {
        self.read(|| {
            let buffers = self.buffers();
            let (first, mut after) = match previous {
                None => (0, None),
                Some(key) => buffers
                    .iter()
                    .enumerate()
                    .find_map(|(i, buffer)| buffer.offset_of(key).map(|offset| (i, Some(offset))))
                    .ok_or_else(|| {
                        VarStoreError::invalid(format!("{} is not a runtime variable", key))
                    })?,
            };

            for buffer in &buffers[first..] {
                if let Some(key) = buffer.next_key(after.take()) {
                    return Ok(Some(key));
                }
            }
            Ok(None)
        })
    }

    /// Space of the buffer that receives writes with `attributes`
    ///
    /// `free` counts space held by tombstones, which a write reclaims.
    pub fn query(&self, attributes: Attributes) -> CacheSpace {
        let buffer = self.target(attributes);
        CacheSpace {
            capacity: buffer.capacity(),
            free: buffer.remaining(),
        }
    }

    fn target(&self, attributes: Attributes) -> &CacheBuffer {
        if attributes.is_volatile() {
            &self.volatile
        } else {
            &self.runtime_nv
        }
    }

    /// Whether a runtime write of `record` would fit
    pub fn fits(&self, record: &VariableRecord) -> bool {
        let key = VariableKey::new(record.name.clone(), record.namespace);
        let target = self.target(record.attributes);
        self.read(|| Self::room_for(target, &key, record))
    }

    /// Whether `target` can hold `record` once the live copy of its key is gone
    fn room_for(target: &CacheBuffer, key: &VariableKey, record: &VariableRecord) -> bool {
        record.footprint() <= target.remaining() + target.live_footprint(key)
    }

    /// Mirror a committed write; empty data deletes
    ///
    /// Non-empty writes need `RUNTIME_ACCESS`. The cache is unchanged when
    /// this returns an error.
    pub fn runtime_set(
        &self,
        name: &VariableName,
        namespace: &Guid,
        attributes: Attributes,
        data: &[u8],
    ) -> Result<()> {
        let delete = data.is_empty();
        if !delete && !attributes.contains(Attributes::RUNTIME_ACCESS) {
            return Err(VarStoreError::invalid(format!(
                "{}:{} lacks runtime access",
                namespace, name
            )));
        }

        let key = VariableKey::new(name.clone(), *namespace);
        let record = VariableRecord::new(name.clone(), *namespace, attributes, data.to_vec());
        let target = self.target(record.attributes);
        let _guard = self.begin_update();

        let existing = self
            .buffers()
            .into_iter()
            .find(|buffer| buffer.offset_of(&key).is_some());

        if delete {
            return match existing {
                Some(buffer) => {
                    buffer.remove(&key);
                    debug!("Runtime cache removed {}", key);
                    Ok(())
                }
                None => Err(VarStoreError::NotFound),
            };
        }

        if !Self::room_for(target, &key, &record) {
            return Err(VarStoreError::OutOfResources);
        }

        if let Some(buffer) = existing {
            buffer.remove(&key);
        }
        if record.footprint() > target.free() {
            let reclaimed = target.compact()?;
            debug!(
                "Compacted {} cache buffer, reclaimed {} bytes",
                target.label(),
                reclaimed
            );
        }
        target.append(&record)?;

        debug!("Runtime cache updated {}", key);
        Ok(())
    }

    /// Sequence counter; changes by two per completed update
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn readers_in_progress(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    pub fn is_update_pending(&self) -> bool {
        self.pending_update.load(Ordering::SeqCst)
    }
}
