//! Key-value tables shared by every hook invocation.
//!
//! The engine never owns its state directly; it reads and writes through
//! [`KvMap`]. Three in-memory flavours exist:
//!
//! - [`HashTable`]: bounded, fails inserts once full
//! - [`LruTable`]: bounded, evicts the least-recently-used entry instead;
//!   backs the affinity, reverse-NAT and health tables, whose entries are
//!   never cleaned up explicitly
//! - [`SnapshotTable`]: copy-on-write behind an atomic pointer swap, for
//!   tables the control plane owns and the engine only reads
//!
//! Engine writes are single-key atomic replaces. Only control-plane batches
//! on a [`SnapshotTable`] become visible all at once.

mod hash_table;
mod lru_table;
mod snapshot_table;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use thiserror::Error;

use crate::lb::{
    AffinityKey, AffinityValue, Backend, BackendId, HealthEntry, LbAddr, RevNatKey, RevNatValue,
    ServiceEntry, ServiceKey, SockCookie,
};

pub use self::hash_table::HashTable;
pub use self::lru_table::LruTable;
pub use self::snapshot_table::SnapshotTable;

/// Default capacity of the service table.
pub const SERVICE_MAP_SIZE: usize = 65536;
/// Default capacity of the backend table.
pub const BACKEND_MAP_SIZE: usize = 65536;
/// Default capacity of the affinity table.
pub const AFFINITY_MAP_SIZE: usize = 65536;
/// Default capacity of the reverse-NAT socket table.
pub const REVNAT_SK_MAP_SIZE: usize = 262144;
/// Default capacity of the health-check table.
pub const HEALTH_MAP_SIZE: usize = 65536;

/// Errors from table operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The table reached its maximum number of entries.
    #[error("map full ({max_entries} entries)")]
    Full { max_entries: usize },
}

/// A shared key-value table.
pub trait KvMap<K, V>: Send + Sync {
    /// Look up a key, returning a copy of its value.
    fn lookup(&self, key: &K) -> Option<V>;

    /// Insert or atomically replace the value for a key.
    fn update(&self, key: K, value: V) -> Result<(), MapError>;

    /// Delete a key. Returns whether it was present.
    fn delete(&self, key: &K) -> bool;

    /// Apply `updates` in order, then `deletes`.
    ///
    /// Copy-on-write tables publish the whole batch in one snapshot swap.
    /// Others fall back to single-key operations, which readers may observe
    /// one at a time.
    fn apply_batch(&self, updates: Vec<(K, V)>, deletes: &[K]) -> Result<(), MapError> {
        for (key, value) in updates {
            self.update(key, value)?;
        }
        for key in deletes {
            self.delete(key);
        }
        Ok(())
    }

    /// Number of entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tables for one address family.
#[derive(Clone)]
pub struct FamilyMaps<A: LbAddr> {
    /// Services (slot 0) and their backend slots (slot 1..=count).
    pub services: Arc<dyn KvMap<ServiceKey<A>, ServiceEntry>>,
    pub backends: Arc<dyn KvMap<BackendId, Backend<A>>>,
    pub affinity: Arc<dyn KvMap<AffinityKey, AffinityValue>>,
    pub revnat: Arc<dyn KvMap<RevNatKey<A>, RevNatValue<A>>>,
    pub health: Arc<dyn KvMap<SockCookie, HealthEntry<A>>>,
}

impl<A: LbAddr> FamilyMaps<A> {
    /// In-memory tables with the default capacities.
    pub fn in_memory() -> Self {
        Self {
            services: Arc::new(SnapshotTable::new(SERVICE_MAP_SIZE)),
            backends: Arc::new(SnapshotTable::new(BACKEND_MAP_SIZE)),
            affinity: Arc::new(LruTable::new(AFFINITY_MAP_SIZE)),
            revnat: Arc::new(LruTable::new(REVNAT_SK_MAP_SIZE)),
            health: Arc::new(LruTable::new(HEALTH_MAP_SIZE)),
        }
    }
}

impl<A: LbAddr> Default for FamilyMaps<A> {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Tables for both address families.
#[derive(Clone, Default)]
pub struct LbMaps {
    pub v4: FamilyMaps<Ipv4Addr>,
    pub v6: FamilyMaps<Ipv6Addr>,
}

impl LbMaps {
    pub fn in_memory() -> Self {
        Self::default()
    }
}
