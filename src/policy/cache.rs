//! LRU cache of policy lookups
//!
//! Remembers which registered entry governs a variable so repeated writes to
//! the same variable skip the pattern scan.

use crate::guid::Guid;
use crate::name::VariableName;
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    namespace: Guid,
    name: VariableName,
}

/// LRU cache from variable to the index of its governing policy entry
pub struct PolicyCache {
    cache: LruCache<CacheKey, Option<usize>>,
}

impl PolicyCache {
    /// Create a new policy cache with given capacity
    pub fn new(capacity: usize) -> Self {
        PolicyCache {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Cached lookup result; `Some(None)` means no entry applies
    pub fn get(&mut self, namespace: &Guid, name: &VariableName) -> Option<Option<usize>> {
        let key = CacheKey {
            namespace: *namespace,
            name: name.clone(),
        };
        self.cache.get(&key).copied()
    }

    pub fn put(&mut self, namespace: &Guid, name: &VariableName, entry: Option<usize>) {
        let key = CacheKey {
            namespace: *namespace,
            name: name.clone(),
        };
        self.cache.put(key, entry);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> VariableName {
        VariableName::new(s).unwrap()
    }

    #[test]
    fn test_cache_basic() {
        let mut cache = PolicyCache::new(10);
        assert!(cache.get(&Guid::GLOBAL_VARIABLE, &name("A")).is_none());

        cache.put(&Guid::GLOBAL_VARIABLE, &name("A"), Some(3));
        cache.put(&Guid::GLOBAL_VARIABLE, &name("B"), None);
        assert_eq!(cache.get(&Guid::GLOBAL_VARIABLE, &name("A")), Some(Some(3)));
        assert_eq!(cache.get(&Guid::GLOBAL_VARIABLE, &name("B")), Some(None));
        assert!(cache.get(&Guid::ZERO, &name("A")).is_none());
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = PolicyCache::new(2);
        cache.put(&Guid::ZERO, &name("a"), None);
        cache.put(&Guid::ZERO, &name("b"), None);
        cache.put(&Guid::ZERO, &name("c"), None); // evicts a

        assert!(cache.get(&Guid::ZERO, &name("a")).is_none());
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
