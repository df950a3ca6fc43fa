//! Backend selection: session affinity first, then slot hashing.

use tracing::{debug, trace, warn};

use super::error::XlateError;
use super::resolver::Resolved;
use super::types::{
    AffinityKey, AffinityValue, Backend, BackendId, LbAddr, ServiceEntry, ServiceRecord, SockCtx,
};
use super::SockLb;
use crate::metrics::{Direction, Reason};

/// Source of per-attempt selection indices for TCP.
pub trait SlotRng: Send + Sync {
    fn next_u32(&self) -> u32;
}

/// Draws from the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSlotRng;

impl SlotRng for ThreadSlotRng {
    fn next_u32(&self) -> u32 {
        rand::random::<u32>()
    }
}

/// Backend slot for a selection index. `count` must be nonzero.
pub fn backend_slot(index: u64, count: u16) -> u16 {
    debug_assert!(count > 0);
    (index % u64::from(count.max(1))) as u16 + 1
}

/// A backend picked for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Selection<A> {
    pub backend_id: BackendId,
    pub backend: Backend<A>,
    pub from_affinity: bool,
}

impl SockLb {
    /// TCP gets a fresh random index per attempt; datagram sockets use their
    /// cookie so every datagram of a flow lands on the same backend.
    pub(crate) fn select_index(&self, ctx: &SockCtx) -> u64 {
        if ctx.protocol.is_datagram() {
            ctx.cookie.0
        } else {
            u64::from(self.rng.next_u32())
        }
    }

    fn affinity_active(&self, svc: &ServiceRecord) -> bool {
        self.config.enable_affinity && svc.flags.affinity
    }

    fn affinity_key(svc: &ServiceRecord, ctx: &SockCtx) -> AffinityKey {
        AffinityKey {
            rev_nat_index: svc.rev_nat_index,
            client_id: ctx.netns,
        }
    }

    /// Backend remembered for this client, if the entry has not expired.
    ///
    /// Expired entries are deleted. A hit refreshes `last_used`.
    pub(crate) fn affinity_backend<A: LbAddr>(
        &self,
        svc: &ServiceRecord,
        ctx: &SockCtx,
    ) -> Option<BackendId> {
        let affinity = &A::maps(&self.maps).affinity;
        let key = Self::affinity_key(svc, ctx);
        let mut value = affinity.lookup(&key)?;

        let now = self.clock.now_secs();
        if value.last_used + u64::from(svc.affinity_timeout) <= now {
            trace!(rev_nat_index = svc.rev_nat_index, client = ctx.netns.0, "Affinity expired");
            affinity.delete(&key);
            return None;
        }

        value.last_used = now;
        // Refresh is advisory; a failure just shortens the entry's life.
        let _ = affinity.update(key, value);
        Some(value.backend_id)
    }

    /// Remember `backend_id` for this client. Last writer wins.
    pub(crate) fn update_affinity<A: LbAddr>(
        &self,
        svc: &ServiceRecord,
        ctx: &SockCtx,
        backend_id: BackendId,
    ) {
        let affinity = &A::maps(&self.maps).affinity;
        let key = Self::affinity_key(svc, ctx);
        let value = AffinityValue {
            backend_id,
            last_used: self.clock.now_secs(),
        };

        if let Some(prev) = affinity.lookup(&key) {
            if prev.backend_id != backend_id {
                debug!(
                    rev_nat_index = svc.rev_nat_index,
                    client = ctx.netns.0,
                    previous = %prev.backend_id,
                    backend = %backend_id,
                    "Overwriting affinity entry"
                );
            }
        }

        if let Err(e) = affinity.update(key, value) {
            warn!(error = %e, rev_nat_index = svc.rev_nat_index, "Failed to record affinity");
        }
    }

    /// Pick a backend for `resolved`.
    ///
    /// A remembered backend that no longer exists falls through to slot
    /// hashing. Slot and backend misses are reported as egress drops.
    pub(crate) fn select_backend<A: LbAddr>(
        &self,
        ctx: &SockCtx,
        resolved: &Resolved<A>,
    ) -> Result<Selection<A>, XlateError> {
        let maps = A::maps(&self.maps);
        let svc = &resolved.svc;

        if self.affinity_active(svc) {
            if let Some(backend_id) = self.affinity_backend::<A>(svc, ctx) {
                match maps.backends.lookup(&backend_id) {
                    Some(backend) => {
                        return Ok(Selection {
                            backend_id,
                            backend,
                            from_affinity: true,
                        })
                    }
                    None => {
                        trace!(backend = %backend_id, "Affinity backend gone, reselecting");
                        maps.affinity.delete(&Self::affinity_key(svc, ctx));
                    }
                }
            }
        }

        let slot = backend_slot(self.select_index(ctx), svc.count);
        let backend_id = match maps.services.lookup(&resolved.key.with_slot(slot)) {
            Some(ServiceEntry::Slot(slot)) => slot.backend_id,
            _ => {
                self.metrics.update(Direction::Egress, Reason::NoBackendSlot);
                return Err(XlateError::NoBackendSlot);
            }
        };

        let Some(backend) = maps.backends.lookup(&backend_id) else {
            self.metrics.update(Direction::Egress, Reason::NoBackend);
            return Err(XlateError::NoBackend);
        };

        Ok(Selection {
            backend_id,
            backend,
            from_affinity: false,
        })
    }

    /// Whether a fresh choice should be remembered.
    pub(crate) fn should_remember<A: LbAddr>(
        &self,
        svc: &ServiceRecord,
        selection: &Selection<A>,
    ) -> bool {
        self.affinity_active(svc) && !selection.from_affinity
    }
}
