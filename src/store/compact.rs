//! Copy-and-swap compaction

use super::{write_header, RecordStore, VariableKey};
use crate::error::{Result, VarStoreError};
use crate::header::{HEADER_SIZE, HEALTH_OFFSET, VARIABLE_STORE_RETIRED};
use crate::record::{state, VariableRecord};
use crate::region::FlashRegion;
use tracing::info;

impl<R: FlashRegion> RecordStore<R> {
    /// Rewrite the live records into the spare bank and make it active
    ///
    /// `skip` drops one live variable from the copy and `extra` is written
    /// after the copied records, which lets a replacement that only fits after
    /// reclaiming land in the same pass. The spare header sentinels are written
    /// last and the old bank is retired only after the spare is durable, so an
    /// interruption leaves one trusted bank with a consistent view.
    pub(crate) fn compact_with(
        &mut self,
        skip: Option<&VariableKey>,
        extra: Option<&VariableRecord>,
    ) -> Result<()> {
        let mut records = Vec::with_capacity(self.live.len() + 1);
        for (&offset, slot) in &self.live {
            if skip == Some(&slot.key) {
                continue;
            }
            records.push(self.read_at(offset)?);
        }
        if let Some(extra) = extra {
            records.push(extra.clone());
        }

        let total: usize = records.iter().map(VariableRecord::footprint).sum();
        if HEADER_SIZE + total > self.size {
            return Err(VarStoreError::OutOfResources);
        }

        let before = self.usage();
        let spare_index = 1 - self.active;
        let size = self.size;

        let spare = &mut self.banks[spare_index];
        spare.erase()?;
        let mut offset = HEADER_SIZE;
        for record in &records {
            spare.program(offset, &record.encode(state::ADDED))?;
            offset += record.footprint();
        }
        write_header(spare, size)?;
        spare.flush()?;

        let old = &mut self.banks[self.active];
        old.program(HEALTH_OFFSET, &[VARIABLE_STORE_RETIRED])?;
        old.flush()?;

        self.active = spare_index;
        self.rebuild()?;

        info!(
            "Compacted variable store into bank {}: reclaimed {} bytes, {} records",
            spare_index,
            before.reclaimable_bytes,
            self.live.len()
        );
        Ok(())
    }
}
