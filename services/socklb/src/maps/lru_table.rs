use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;

use super::{KvMap, MapError};

/// Bounded table that evicts the least-recently-used entry when full.
///
/// Lookups count as use. Updates never fail.
pub struct LruTable<K: Hash + Eq, V> {
    cache: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V> LruTable<K, V> {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }
}

impl<K, V> KvMap<K, V> for LruTable<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    fn lookup(&self, key: &K) -> Option<V> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get(key).cloned()
    }

    fn update(&self, key: K, value: V) -> Result<(), MapError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.put(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> bool {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.pop(key).is_some()
    }

    fn len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let table: LruTable<u32, u32> = LruTable::new(2);
        table.update(1, 10).unwrap();
        table.update(2, 20).unwrap();

        // Touch 1 so that 2 becomes the eviction candidate.
        assert_eq!(table.lookup(&1), Some(10));
        table.update(3, 30).unwrap();

        assert_eq!(table.lookup(&2), None);
        assert_eq!(table.lookup(&1), Some(10));
        assert_eq!(table.lookup(&3), Some(30));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let table: LruTable<u32, u32> = LruTable::new(0);
        table.update(1, 1).unwrap();
        table.update(2, 2).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.delete(&2));
    }
}
