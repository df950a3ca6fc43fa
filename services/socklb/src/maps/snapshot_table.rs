use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

use super::{KvMap, MapError};

/// Copy-on-write table for control-plane owned state.
///
/// Readers load the current snapshot without blocking. Writers build a new
/// snapshot and swap it in; concurrent single-key writers are serialized by
/// the swap's compare loop so none of them is lost.
pub struct SnapshotTable<K, V> {
    snapshot: ArcSwap<HashMap<K, V>>,
    max_entries: usize,
}

impl<K, V> SnapshotTable<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            max_entries,
        }
    }

    /// Replace the whole table in a single pointer swap.
    ///
    /// Readers in flight keep the old snapshot until they finish.
    pub fn replace_all(&self, entries: HashMap<K, V>) -> Result<(), MapError> {
        if entries.len() > self.max_entries {
            return Err(MapError::Full {
                max_entries: self.max_entries,
            });
        }
        let count = entries.len();
        self.snapshot.store(Arc::new(entries));
        info!(entry_count = count, "Table snapshot replaced atomically");
        Ok(())
    }
}

impl<K, V> KvMap<K, V> for SnapshotTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn lookup(&self, key: &K) -> Option<V> {
        self.snapshot.load().get(key).cloned()
    }

    fn update(&self, key: K, value: V) -> Result<(), MapError> {
        {
            let current = self.snapshot.load();
            if !current.contains_key(&key) && current.len() >= self.max_entries {
                return Err(MapError::Full {
                    max_entries: self.max_entries,
                });
            }
        }

        self.snapshot.rcu(|current| {
            let mut next: HashMap<K, V> = (**current).clone();
            next.insert(key.clone(), value.clone());
            next
        });
        Ok(())
    }

    fn delete(&self, key: &K) -> bool {
        if !self.snapshot.load().contains_key(key) {
            return false;
        }

        let previous = self.snapshot.rcu(|current| {
            let mut next: HashMap<K, V> = (**current).clone();
            next.remove(key);
            next
        });
        previous.contains_key(key)
    }

    fn apply_batch(&self, updates: Vec<(K, V)>, deletes: &[K]) -> Result<(), MapError> {
        {
            let current = self.snapshot.load();
            let added = updates
                .iter()
                .filter(|(key, _)| !current.contains_key(key))
                .count();
            if current.len() + added > self.max_entries {
                return Err(MapError::Full {
                    max_entries: self.max_entries,
                });
            }
        }

        self.snapshot.rcu(|current| {
            let mut next: HashMap<K, V> = (**current).clone();
            for (key, value) in &updates {
                next.insert(key.clone(), value.clone());
            }
            for key in deletes {
                next.remove(key);
            }
            next
        });
        Ok(())
    }

    fn len(&self) -> usize {
        self.snapshot.load().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_keep_old_snapshot() {
        let table: SnapshotTable<u32, &str> = SnapshotTable::new(8);
        table.update(1, "one").unwrap();

        let before = table.snapshot.load_full();
        table.replace_all(HashMap::from([(2, "two")])).unwrap();

        assert_eq!(before.get(&1), Some(&"one"));
        assert_eq!(table.lookup(&1), None);
        assert_eq!(table.lookup(&2), Some("two"));
    }

    #[test]
    fn test_capacity() {
        let table: SnapshotTable<u32, u32> = SnapshotTable::new(1);
        table.update(1, 1).unwrap();
        assert!(table.update(2, 2).is_err());
        assert!(table
            .replace_all(HashMap::from([(1, 1), (2, 2)]))
            .is_err());
    }

    #[test]
    fn test_batch_is_one_snapshot() {
        let table: SnapshotTable<u32, u32> = SnapshotTable::new(8);
        table.update(1, 1).unwrap();
        table.update(2, 2).unwrap();

        let before = table.snapshot.load_full();
        table.apply_batch(vec![(3, 3), (4, 4)], &[1]).unwrap();
        let after = table.snapshot.load_full();

        assert_eq!(before.len(), 2);
        assert_eq!(after.len(), 3);
        assert!(!after.contains_key(&1));

        // A batch that does not fit leaves the table untouched.
        let batch = (10..20).map(|k| (k, k)).collect();
        assert!(table.apply_batch(batch, &[]).is_err());
        assert!(Arc::ptr_eq(&after, &table.snapshot.load_full()));
    }

    #[test]
    fn test_concurrent_writers_are_not_lost() {
        let table = Arc::new(SnapshotTable::<u32, u32>::new(1024));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        table.update(t * 100 + i, i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.len(), 200);
        assert!(table.delete(&0));
        assert!(!table.delete(&0));
    }
}
