//! Reverse translation: answering peer queries with the service identity.

use tracing::{debug, warn};

use super::error::XlateError;
use super::types::{Backend, LbAddr, RevNatKey, RevNatValue, ServiceKey, SockAddr, SockCtx};
use super::SockLb;
use crate::metrics::{Direction, Reason};

impl SockLb {
    /// Record that `ctx`'s connection to `backend` was addressed to
    /// `frontend`. Skips the write when the stored value is already equal.
    pub(crate) fn update_revnat<A: LbAddr>(
        &self,
        ctx: &SockCtx,
        backend: &Backend<A>,
        frontend: SockAddr<A>,
        rev_nat_index: u16,
    ) -> Result<(), XlateError> {
        let revnat = &A::maps(&self.maps).revnat;
        let key = RevNatKey {
            cookie: ctx.cookie,
            address: backend.address,
            port: backend.port,
        };
        let value = RevNatValue {
            address: frontend.address,
            port: frontend.port,
            rev_nat_index,
        };

        if revnat.lookup(&key) == Some(value) {
            return Ok(());
        }

        revnat.update(key, value).map_err(|e| {
            warn!(
                error = %e,
                cookie = ctx.cookie.0,
                backend = %SockAddr::new(backend.address, backend.port),
                "Failed to record reverse NAT entry"
            );
            XlateError::RevNatWriteFailed
        })
    }

    /// Translate a backend-facing peer back to the service it was reached
    /// through.
    ///
    /// The service is re-resolved (wildcard included); if it is gone or its
    /// version moved on, the entry is deleted and `Stale` returned.
    pub fn xlate_rev<A: LbAddr>(
        &self,
        ctx: &SockCtx,
        peer: SockAddr<A>,
    ) -> Result<SockAddr<A>, XlateError> {
        let revnat = &A::maps(&self.maps).revnat;
        let key = RevNatKey {
            cookie: ctx.cookie,
            address: peer.address,
            port: peer.port,
        };
        let value = revnat.lookup(&key).ok_or(XlateError::NotFound)?;

        let svc_key = ServiceKey::new(value.address, value.port);
        let current = self
            .resolve(&svc_key, self.in_hostns(ctx))
            .map(|resolved| resolved.svc.rev_nat_index);

        if current != Some(value.rev_nat_index) {
            revnat.delete(&key);
            self.metrics.update(Direction::Ingress, Reason::RevNatStale);
            debug!(
                cookie = ctx.cookie.0,
                service = %SockAddr::new(value.address, value.port),
                recorded = value.rev_nat_index,
                current = ?current,
                "Dropped stale reverse NAT entry"
            );
            return Err(XlateError::Stale);
        }

        Ok(SockAddr::new(value.address, value.port))
    }
}
