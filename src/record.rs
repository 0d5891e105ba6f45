use crate::attributes::Attributes;
use crate::error::{Result, VarStoreError};
use crate::guid::Guid;
use crate::header::{le_u16, le_u32};
use crate::name::VariableName;

/// Size of a record header in bytes
pub const RECORD_HEADER_SIZE: usize = 32;

/// Marker at the start of every valid record
pub const VARIABLE_START_ID: u16 = 0x55AA;

/// Records start on 4-byte boundaries
pub const RECORD_ALIGNMENT: usize = 4;

/// Offset of the state byte inside a record header
pub const STATE_OFFSET: usize = 2;

/// Value of a byte that has never been programmed
pub const ERASED_BYTE: u8 = 0xFF;

/// State byte values and masks
///
/// The medium only allows clearing bits, so each transition is an AND with
/// one of these masks.
pub mod state {
    /// Header programmed, name and data not yet committed
    pub const HEADER_VALID_ONLY: u8 = 0x7F;
    /// Record fully committed
    pub const ADDED: u8 = 0x3F;
    /// Mask: record is being replaced by a newer copy
    pub const IN_DELETED_TRANSITION: u8 = 0xFE;
    /// Mask: record is a tombstone
    pub const DELETED: u8 = 0xFD;

    /// Committed record, possibly mid-replacement
    pub fn is_live(state: u8) -> bool {
        state == ADDED || state == (ADDED & IN_DELETED_TRANSITION)
    }

    pub fn is_in_transition(state: u8) -> bool {
        state == (ADDED & IN_DELETED_TRANSITION)
    }
}

/// Round `offset` up to the record alignment
pub fn align_up(offset: usize) -> usize {
    (offset + RECORD_ALIGNMENT - 1) & !(RECORD_ALIGNMENT - 1)
}

/// Fixed 32-byte header preceding each record's name and data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub start_id: u16,
    pub state: u8,
    pub reserved: u8,
    /// Raw attribute bits as stored
    pub attributes: u32,
    /// Encoded name size in bytes, terminator included
    pub name_size: u32,
    pub data_size: u32,
    pub namespace: Guid,
}

impl RecordHeader {
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.start_id.to_le_bytes());
        bytes[STATE_OFFSET] = self.state;
        bytes[3] = self.reserved;
        bytes[4..8].copy_from_slice(&self.attributes.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.name_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.data_size.to_le_bytes());
        bytes[16..32].copy_from_slice(&self.namespace.to_bytes());
        bytes
    }

    /// Parse a header, returning `None` when the start marker is missing
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return None;
        }

        let start_id = le_u16(bytes, 0);
        if start_id != VARIABLE_START_ID {
            return None;
        }

        Some(RecordHeader {
            start_id,
            state: bytes[STATE_OFFSET],
            reserved: bytes[3],
            attributes: le_u32(bytes, 4),
            name_size: le_u32(bytes, 8),
            data_size: le_u32(bytes, 12),
            namespace: Guid::from_slice(&bytes[16..32])?,
        })
    }

    /// Unaligned size of header + name + data
    pub fn record_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.name_size as usize + self.data_size as usize
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_retain(self.attributes)
    }
}

/// A decoded variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRecord {
    pub name: VariableName,
    pub namespace: Guid,
    pub attributes: Attributes,
    pub data: Vec<u8>,
}

impl VariableRecord {
    pub fn new(
        name: VariableName,
        namespace: Guid,
        attributes: Attributes,
        data: Vec<u8>,
    ) -> Self {
        VariableRecord {
            name,
            namespace,
            attributes: attributes.stored(),
            data,
        }
    }

    /// Bytes this record occupies in a bank, alignment padding included
    pub fn footprint(&self) -> usize {
        footprint(self.name.encoded_len(), self.data.len())
    }

    /// Header for this record in the given state
    pub fn header(&self, state: u8) -> RecordHeader {
        RecordHeader {
            start_id: VARIABLE_START_ID,
            state,
            reserved: 0,
            attributes: self.attributes.bits(),
            name_size: self.name.encoded_len() as u32,
            data_size: self.data.len() as u32,
            namespace: self.namespace,
        }
    }

    /// Encode header, name and data (without trailing padding)
    pub fn encode(&self, state: u8) -> Vec<u8> {
        let name = self.name.to_ucs2_bytes();
        let mut bytes = Vec::with_capacity(RECORD_HEADER_SIZE + name.len() + self.data.len());
        bytes.extend_from_slice(&self.header(state).to_bytes());
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Decode a record from a header and the bytes that follow it
    pub fn decode(header: &RecordHeader, payload: &[u8]) -> Result<Self> {
        let name_size = header.name_size as usize;
        let data_size = header.data_size as usize;
        if payload.len() < name_size + data_size {
            return Err(VarStoreError::Corrupt(format!(
                "record payload truncated: {} < {}",
                payload.len(),
                name_size + data_size
            )));
        }

        let name = VariableName::from_ucs2_bytes(&payload[..name_size])?;
        Ok(VariableRecord {
            name,
            namespace: header.namespace,
            attributes: header.attributes(),
            data: payload[name_size..name_size + data_size].to_vec(),
        })
    }
}

/// Aligned footprint of a record with the given name and data sizes
pub fn footprint(name_size: usize, data_size: usize) -> usize {
    align_up(RECORD_HEADER_SIZE + name_size + data_size)
}
