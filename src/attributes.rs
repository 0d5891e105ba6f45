//! Variable attribute mask

use crate::error::{Result, VarStoreError};
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Attribute bits carried by every variable record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Attributes: u32 {
        const NON_VOLATILE = 0x0000_0001;
        const BOOTSERVICE_ACCESS = 0x0000_0002;
        const RUNTIME_ACCESS = 0x0000_0004;
        const HARDWARE_ERROR_RECORD = 0x0000_0008;
        /// Writes must go through the protected variable layer
        const AUTHENTICATED_WRITE_ACCESS = 0x0000_0010;
        const TIME_BASED_AUTHENTICATED_WRITE_ACCESS = 0x0000_0020;
        /// Write modifier: concatenate to the existing data. Never stored.
        const APPEND_WRITE = 0x0000_0040;
        const ENHANCED_AUTHENTICATED_ACCESS = 0x0000_0080;
    }
}

impl Attributes {
    /// NV + BS + RT
    pub const DEFAULT_NV: Attributes = Attributes::NON_VOLATILE
        .union(Attributes::BOOTSERVICE_ACCESS)
        .union(Attributes::RUNTIME_ACCESS);

    /// BS + RT
    pub const DEFAULT_VOLATILE: Attributes =
        Attributes::BOOTSERVICE_ACCESS.union(Attributes::RUNTIME_ACCESS);

    /// Bits that are persisted in a record
    pub fn stored(self) -> Attributes {
        self.difference(Attributes::APPEND_WRITE)
    }

    pub fn is_volatile(self) -> bool {
        !self.contains(Attributes::NON_VOLATILE)
    }

    /// Reject attribute combinations this store does not accept on a write
    ///
    /// `raw` is the caller-supplied mask, which may carry bits that have no
    /// named flag.
    pub fn check_for_write(raw: u32) -> Result<Attributes> {
        let attrs = Attributes::from_bits(raw).ok_or_else(|| {
            VarStoreError::invalid(format!("unknown attribute bits {:#x}", raw))
        })?;

        if attrs.contains(Attributes::HARDWARE_ERROR_RECORD) {
            return Err(VarStoreError::invalid(
                "hardware error records are not supported",
            ));
        }
        if attrs.intersects(
            Attributes::TIME_BASED_AUTHENTICATED_WRITE_ACCESS
                | Attributes::ENHANCED_AUTHENTICATED_ACCESS,
        ) {
            return Err(VarStoreError::invalid(
                "signature-authenticated writes are not supported",
            ));
        }
        if attrs.contains(Attributes::RUNTIME_ACCESS)
            && !attrs.contains(Attributes::BOOTSERVICE_ACCESS)
        {
            return Err(VarStoreError::invalid(
                "runtime access requires boot service access",
            ));
        }

        Ok(attrs)
    }
}
