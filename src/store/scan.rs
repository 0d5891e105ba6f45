//! Bank scanning
//!
//! Walks the records of a trusted bank in storage order. Scanning stops at the
//! first position without a valid start marker (or with sizes that cannot fit)
//! and everything from there to the end of the bank is treated as unused.

use crate::header::HEADER_SIZE;
use crate::name::VariableName;
use crate::record::{
    align_up, footprint, state, RecordHeader, ERASED_BYTE, RECORD_HEADER_SIZE,
};
use tracing::warn;

/// A record found while scanning
#[derive(Debug, Clone)]
pub(crate) struct ScannedRecord {
    pub offset: usize,
    pub header: RecordHeader,
    /// Decoded name, `None` when the stored name is malformed
    pub name: Option<VariableName>,
}

impl ScannedRecord {
    pub fn footprint(&self) -> usize {
        footprint(self.header.name_size as usize, self.header.data_size as usize)
    }

    pub fn is_live(&self) -> bool {
        self.name.is_some() && state::is_live(self.header.state)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScanResult {
    pub records: Vec<ScannedRecord>,
    /// First byte after the last parsed record
    pub end: usize,
    /// Whether bytes after `end` have all been erased
    pub tail_erased: bool,
}

/// Scan the records of a bank image whose header declared `size` bytes
pub(crate) fn scan_bank(image: &[u8], size: usize) -> ScanResult {
    let size = size.min(image.len());
    let mut result = ScanResult::default();
    let mut offset = HEADER_SIZE;

    while offset + RECORD_HEADER_SIZE <= size {
        let Some(header) = RecordHeader::from_bytes(&image[offset..]) else {
            break;
        };

        let name_size = header.name_size as usize;
        let record_end = offset
            .checked_add(RECORD_HEADER_SIZE)
            .and_then(|v| v.checked_add(name_size))
            .and_then(|v| v.checked_add(header.data_size as usize));

        match record_end {
            Some(end) if end <= size && name_size >= 2 && name_size % 2 == 0 => {}
            _ => {
                warn!(
                    "Record at offset {} has impossible sizes (name {}, data {}), stopping scan",
                    offset, header.name_size, header.data_size
                );
                break;
            }
        }

        let name_start = offset + RECORD_HEADER_SIZE;
        let name = match VariableName::from_ucs2_bytes(&image[name_start..name_start + name_size])
        {
            Ok(name) => Some(name),
            Err(e) => {
                if state::is_live(header.state) {
                    warn!("Dropping record at offset {}: {}", offset, e);
                }
                None
            }
        };

        result.records.push(ScannedRecord {
            offset,
            header,
            name,
        });

        offset = align_up(offset + header.record_len());
    }

    result.end = offset.min(size);
    result.tail_erased = image[result.end..size].iter().all(|&b| b == ERASED_BYTE);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use crate::guid::Guid;
    use crate::header::StoreHeader;
    use crate::record::VariableRecord;

    fn image_with(records: &[(&str, u8)], size: usize) -> Vec<u8> {
        let mut image = vec![ERASED_BYTE; size];
        image[..HEADER_SIZE].copy_from_slice(&StoreHeader::new(size as u32).to_bytes());
        let mut offset = HEADER_SIZE;
        for (name, st) in records {
            let record = VariableRecord::new(
                VariableName::new(*name).unwrap(),
                Guid::GLOBAL_VARIABLE,
                Attributes::DEFAULT_NV,
                vec![1, 2, 3],
            );
            let bytes = record.encode(*st);
            image[offset..offset + bytes.len()].copy_from_slice(&bytes);
            offset += record.footprint();
        }
        image
    }

    #[test]
    fn test_scan_empty_bank() {
        let image = image_with(&[], 1024);
        let result = scan_bank(&image, 1024);
        assert!(result.records.is_empty());
        assert_eq!(result.end, HEADER_SIZE);
        assert!(result.tail_erased);
    }

    #[test]
    fn test_scan_mixed_states() {
        let image = image_with(
            &[
                ("A", state::ADDED),
                ("B", state::ADDED & state::IN_DELETED_TRANSITION & state::DELETED),
                ("C", state::HEADER_VALID_ONLY),
                ("D", state::ADDED & state::IN_DELETED_TRANSITION),
            ],
            1024,
        );
        let result = scan_bank(&image, 1024);
        assert_eq!(result.records.len(), 4);

        let live: Vec<_> = result
            .records
            .iter()
            .filter(|r| r.is_live())
            .map(|r| r.name.clone().unwrap().to_string())
            .collect();
        assert_eq!(live, vec!["A", "D"]);
    }

    #[test]
    fn test_scan_stops_at_bad_marker() {
        let mut image = image_with(&[("A", state::ADDED), ("B", state::ADDED)], 1024);
        let second = HEADER_SIZE + footprint(4, 3);
        image[second] = 0x00;

        let result = scan_bank(&image, 1024);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.end, second);
        assert!(!result.tail_erased);
    }

    #[test]
    fn test_scan_stops_at_oversized_record() {
        let mut image = image_with(&[("A", state::ADDED)], 256);
        // data_size far beyond the bank
        image[HEADER_SIZE + 12..HEADER_SIZE + 16].copy_from_slice(&0x10000u32.to_le_bytes());
        let result = scan_bank(&image, 256);
        assert!(result.records.is_empty());
        assert_eq!(result.end, HEADER_SIZE);
    }
}
