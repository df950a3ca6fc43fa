//! Control-plane writes to the service and backend tables.
//!
//! The engine only reads these tables. Each operation issues at most one
//! batch per table, backends before services. On snapshot tables a batch is
//! a single pointer swap; on other tables it degrades to ordered single-key
//! writes (slots before the service record, stale slots last) so a
//! concurrent reader never sees a service whose slots point at nothing.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::lb::{
    Backend, BackendId, BackendSlot, LbAddr, ServiceEntry, ServiceKey, ServiceRecord, SockAddr,
};
use crate::maps::{FamilyMaps, MapError};

/// Install or replace a service and its backend set.
///
/// `svc.count` is ignored and set from `backends`. Returns the stored record.
pub fn upsert_service<A: LbAddr>(
    maps: &FamilyMaps<A>,
    frontend: SockAddr<A>,
    svc: ServiceRecord,
    backends: &[(BackendId, Backend<A>)],
) -> Result<ServiceRecord, MapError> {
    let count = u16::try_from(backends.len()).map_err(|_| MapError::Full {
        max_entries: usize::from(u16::MAX),
    })?;
    let key = ServiceKey::new(frontend.address, frontend.port);

    let previous = match maps.services.lookup(&key) {
        Some(ServiceEntry::Service(prev)) => prev.count,
        _ => 0,
    };

    maps.backends.apply_batch(backends.to_vec(), &[])?;

    let record = ServiceRecord { count, ..svc };
    let mut entries: Vec<_> = (1..=count)
        .zip(backends)
        .map(|(slot, (id, _))| {
            (
                key.with_slot(slot),
                ServiceEntry::Slot(BackendSlot { backend_id: *id }),
            )
        })
        .collect();
    entries.push((key, ServiceEntry::Service(record)));
    let stale: Vec<_> = (count.saturating_add(1)..=previous)
        .map(|slot| key.with_slot(slot))
        .collect();
    maps.services.apply_batch(entries, &stale)?;

    info!(
        service = %frontend,
        backends = count,
        stale_slots = stale.len(),
        rev_nat_index = record.rev_nat_index,
        "Upserted service"
    );
    Ok(record)
}

/// Remove a service and its slots. Backend records are left in place since
/// other services may share them.
pub fn delete_service<A: LbAddr>(maps: &FamilyMaps<A>, frontend: SockAddr<A>) -> bool {
    let key = ServiceKey::new(frontend.address, frontend.port);
    let Some(ServiceEntry::Service(svc)) = maps.services.lookup(&key) else {
        return false;
    };

    // Record first, so readers stop resolving before the slots go.
    let doomed: Vec<_> = std::iter::once(key)
        .chain((1..=svc.count).map(|slot| key.with_slot(slot)))
        .collect();
    if let Err(e) = maps.services.apply_batch(Vec::new(), &doomed) {
        debug!(service = %frontend, error = %e, "Failed to delete service");
        return false;
    }

    debug!(service = %frontend, "Deleted service");
    true
}

/// One service with its ordered backend set.
pub type ServiceSpec<A> = (SockAddr<A>, ServiceRecord, Vec<(BackendId, Backend<A>)>);

/// Service and backend table contents for a full snapshot swap.
pub type Tables<A> = (
    HashMap<ServiceKey<A>, ServiceEntry>,
    HashMap<BackendId, Backend<A>>,
);

/// Build complete table contents from scratch, for loading into fresh
/// snapshot tables in one swap each.
pub fn build_tables<A: LbAddr>(services: &[ServiceSpec<A>]) -> Result<Tables<A>, MapError> {
    let mut entries = HashMap::new();
    let mut backends = HashMap::new();

    for (frontend, svc, set) in services {
        let count = u16::try_from(set.len()).map_err(|_| MapError::Full {
            max_entries: usize::from(u16::MAX),
        })?;
        let key = ServiceKey::new(frontend.address, frontend.port);

        entries.insert(key, ServiceEntry::Service(ServiceRecord { count, ..*svc }));
        for (slot, (id, backend)) in (1..=count).zip(set) {
            entries.insert(
                key.with_slot(slot),
                ServiceEntry::Slot(BackendSlot { backend_id: *id }),
            );
            backends.insert(*id, *backend);
        }
    }

    Ok((entries, backends))
}

pub fn delete_backend<A: LbAddr>(maps: &FamilyMaps<A>, id: BackendId) -> bool {
    maps.backends.delete(&id)
}

#[cfg(test)]
mod tests {
    use std::hash::Hash;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use socklb_networking::Protocol;

    use super::*;
    use crate::lb::ServiceFlags;
    use crate::maps::{KvMap, SnapshotTable};

    /// Snapshot table that counts how it is written to.
    struct CountingTable<K, V> {
        inner: SnapshotTable<K, V>,
        single_writes: AtomicUsize,
        batches: AtomicUsize,
    }

    impl<K: Eq + Hash + Clone, V: Clone> CountingTable<K, V> {
        fn new() -> Self {
            Self {
                inner: SnapshotTable::new(1024),
                single_writes: AtomicUsize::new(0),
                batches: AtomicUsize::new(0),
            }
        }
    }

    impl<K, V> KvMap<K, V> for CountingTable<K, V>
    where
        K: Eq + Hash + Clone + Send + Sync,
        V: Clone + Send + Sync,
    {
        fn lookup(&self, key: &K) -> Option<V> {
            self.inner.lookup(key)
        }

        fn update(&self, key: K, value: V) -> Result<(), MapError> {
            self.single_writes.fetch_add(1, Ordering::Relaxed);
            self.inner.update(key, value)
        }

        fn delete(&self, key: &K) -> bool {
            self.single_writes.fetch_add(1, Ordering::Relaxed);
            self.inner.delete(key)
        }

        fn apply_batch(&self, updates: Vec<(K, V)>, deletes: &[K]) -> Result<(), MapError> {
            self.batches.fetch_add(1, Ordering::Relaxed);
            self.inner.apply_batch(updates, deletes)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    fn record(rev_nat_index: u16) -> ServiceRecord {
        ServiceRecord {
            count: 0,
            rev_nat_index,
            flags: ServiceFlags::default(),
            affinity_timeout: 0,
        }
    }

    fn backends(n: u32) -> Vec<(BackendId, Backend<Ipv4Addr>)> {
        (1..=n)
            .map(|i| {
                (
                    BackendId(i),
                    Backend::new(Ipv4Addr::new(10, 0, 1, i as u8), 8080, Protocol::Tcp),
                )
            })
            .collect()
    }

    #[test]
    fn test_shrinking_removes_stale_slots() {
        let maps = FamilyMaps::<Ipv4Addr>::in_memory();
        let frontend = SockAddr::new(Ipv4Addr::new(10, 96, 0, 1), 80);

        let svc = upsert_service(&maps, frontend, record(1), &backends(3)).unwrap();
        assert_eq!(svc.count, 3);
        assert_eq!(maps.services.len(), 4);

        let svc = upsert_service(&maps, frontend, record(2), &backends(1)).unwrap();
        assert_eq!(svc.count, 1);
        assert_eq!(maps.services.len(), 2);
        assert_eq!(maps.backends.len(), 3);
    }

    #[test]
    fn test_build_tables_matches_upserts() {
        let frontend = SockAddr::new(Ipv4Addr::new(10, 96, 0, 1), 80);
        let (entries, backend_map) =
            build_tables(&[(frontend, record(7), backends(2))]).unwrap();

        let maps = FamilyMaps::<Ipv4Addr>::in_memory();
        let stored = upsert_service(&maps, frontend, record(7), &backends(2)).unwrap();

        let key = ServiceKey::new(frontend.address, frontend.port);
        assert_eq!(entries.len(), maps.services.len());
        assert_eq!(entries.get(&key), Some(&ServiceEntry::Service(stored)));
        assert_eq!(entries.get(&key.with_slot(2)), maps.services.lookup(&key.with_slot(2)).as_ref());
        assert_eq!(backend_map.len(), 2);
    }

    #[test]
    fn test_delete_service_keeps_backends() {
        let maps = FamilyMaps::<Ipv4Addr>::in_memory();
        let frontend = SockAddr::new(Ipv4Addr::new(10, 96, 0, 1), 80);
        upsert_service(&maps, frontend, record(1), &backends(2)).unwrap();

        assert!(delete_service(&maps, frontend));
        assert!(!delete_service(&maps, frontend));
        assert!(maps.services.is_empty());
        assert_eq!(maps.backends.len(), 2);

        assert!(delete_backend(&maps, BackendId(1)));
        assert_eq!(maps.backends.len(), 1);
    }

    #[test]
    fn test_upsert_swaps_each_table_once() {
        let services = Arc::new(CountingTable::<ServiceKey<Ipv4Addr>, ServiceEntry>::new());
        let backend_table = Arc::new(CountingTable::<BackendId, Backend<Ipv4Addr>>::new());
        let maps = FamilyMaps::<Ipv4Addr> {
            services: services.clone(),
            backends: backend_table.clone(),
            ..FamilyMaps::in_memory()
        };
        let frontend = SockAddr::new(Ipv4Addr::new(10, 96, 0, 1), 80);

        upsert_service(&maps, frontend, record(1), &backends(200)).unwrap();
        upsert_service(&maps, frontend, record(2), &backends(3)).unwrap();
        assert!(delete_service(&maps, frontend));

        assert_eq!(services.batches.load(Ordering::Relaxed), 3);
        assert_eq!(backend_table.batches.load(Ordering::Relaxed), 2);
        assert_eq!(services.single_writes.load(Ordering::Relaxed), 0);
        assert_eq!(backend_table.single_writes.load(Ordering::Relaxed), 0);
        assert!(services.is_empty());
        assert_eq!(backend_table.len(), 200);
    }
}
