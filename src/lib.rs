//! # varstore - Firmware Variable Store
//!
//! `varstore` keeps namespaced configuration variables on a medium that only
//! supports clearing bits, the way platform firmware keeps its non-volatile
//! variables in flash:
//!
//! - **Record store** with tombstoning and copy-and-swap compaction over two banks
//! - **Write policies** that lock, size-limit or attribute-constrain variables
//! - **Protected variables** guarded by a monotonic counter and an HMAC digest
//! - **Runtime cache** serving lock-free reads after initialization
//!
//! ## Quick Start
//!
//! ```rust
//! use varstore::{
//!     Attributes, Guid, MemoryRegion, VariableName, VariableServiceBuilder, VariableServices,
//! };
//!
//! # fn main() -> varstore::Result<()> {
//! let service = VariableServiceBuilder::new()
//!     .bank_size(16 * 1024)
//!     .integrity_key(b"platform secret")
//!     .build([MemoryRegion::new(16 * 1024), MemoryRegion::new(16 * 1024)])?;
//!
//! let lang = VariableName::new("PlatformLang")?;
//! service.set_variable(&lang, &Guid::GLOBAL_VARIABLE, Attributes::DEFAULT_NV, b"en-US")?;
//!
//! let mut buffer = [0u8; 64];
//! let (_, len) = service.get_variable(&lang, &Guid::GLOBAL_VARIABLE, &mut buffer)?;
//! assert_eq!(&buffer[..len], b"en-US");
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistent Store
//!
//! ```rust,no_run
//! use varstore::{FileCounter, FileRegion, StoreConfig, VariableServiceBuilder};
//!
//! # fn main() -> varstore::Result<()> {
//! let config = StoreConfig::from_file("varstore.toml")?;
//! let banks = FileRegion::open_or_create("nvram.img", config.bank_size)?;
//!
//! let service = VariableServiceBuilder::new()
//!     .config(config)
//!     .counter(Box::new(FileCounter::new("nvram.counter")))
//!     .integrity_key(b"platform secret")
//!     .build(banks)?;
//!
//! // policies are registered here, then:
//! service.close_initialization_window()?;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod cache;
pub mod config;
pub mod error;
pub mod guid;
pub mod header;
pub mod name;
pub mod policy;
pub mod protected;
pub mod record;
pub mod region;
pub mod service;
pub mod store;

pub use attributes::Attributes;
pub use cache::{CacheCapacities, CacheSpace, RuntimeCache};
pub use config::{ProtectedVariableConfig, StoreConfig};
pub use error::{Result, VarStoreError};
pub use guid::Guid;
pub use name::VariableName;
pub use policy::{LockPolicy, PolicyEngine, PolicyEntry, VariableLookup, NO_MAX_SIZE};
pub use protected::{
    FileCounter, HmacSha256, InMemoryCounter, IntegrityMac, MonotonicCounter, ProtectedVariables,
};
pub use record::VariableRecord;
pub use region::{FileRegion, FlashRegion, MemoryRegion};
pub use service::{VariableService, VariableServiceBuilder, VariableServices, VariableStorageInfo};
pub use store::{RecordStore, StoreUsage, VariableKey};
