use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

use super::{KvMap, MapError};

/// Bounded hash table. Inserting a new key into a full table fails;
/// replacing an existing key always succeeds.
pub struct HashTable<K, V> {
    entries: RwLock<HashMap<K, V>>,
    max_entries: usize,
}

impl<K, V> HashTable<K, V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }
}

impl<K, V> KvMap<K, V> for HashTable<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn lookup(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn update(&self, key: K, value: V) -> Result<(), MapError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            return Err(MapError::Full {
                max_entries: self.max_entries,
            });
        }
        entries.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_table_rejects_new_keys() {
        let table: HashTable<u32, &str> = HashTable::new(2);
        table.update(1, "a").unwrap();
        table.update(2, "b").unwrap();

        assert_eq!(table.update(3, "c"), Err(MapError::Full { max_entries: 2 }));

        // Replacing an existing key is still fine.
        table.update(2, "bb").unwrap();
        assert_eq!(table.lookup(&2), Some("bb"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_delete() {
        let table: HashTable<u32, u32> = HashTable::new(4);
        table.update(7, 70).unwrap();
        assert!(table.delete(&7));
        assert!(!table.delete(&7));
        assert!(table.is_empty());
    }
}
