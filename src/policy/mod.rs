//! Variable policy
//!
//! Write restrictions registered during the initialization window:
//! - size bounds and required/forbidden attributes per namespace, name or
//!   `#` name pattern
//! - lock policies that make variables read-only immediately, once created,
//!   or while a state variable holds a given value
//! - one-shot locking of the registered set
//! - LRU caching of policy lookups

mod cache;
mod engine;
mod entry;
mod pattern;

pub use cache::PolicyCache;
pub use engine::{PolicyEngine, VariableLookup};
pub use entry::{LockPolicy, PolicyEntry, NO_MAX_SIZE};
pub use pattern::PatternMatcher;

#[cfg(test)]
mod tests;
