//! Forward translation: service address to backend address.

use tracing::{debug, trace};

use super::error::XlateError;
use super::types::{LbAddr, ServiceKey, SockAddr, SockCtx, Translation};
use super::SockLb;
use crate::metrics::{Direction, Reason};

impl SockLb {
    /// Translate `dst` to a backend of the service it addresses.
    ///
    /// `udp_only` is set on the datagram send path, which never sees
    /// stream sockets and so skips the protocol check.
    ///
    /// A failed reverse-NAT write does not undo the translation; it is
    /// reported in [`Translation::revnat_error`] and through metrics.
    pub fn xlate_fwd<A: LbAddr>(
        &self,
        ctx: &SockCtx,
        dst: SockAddr<A>,
        udp_only: bool,
    ) -> Result<Translation<A>, XlateError> {
        let in_hostns = self.in_hostns(ctx);
        if self.config.host_only && !in_hostns {
            return Err(XlateError::NotFound);
        }
        if !udp_only && !self.config.proto_enabled(ctx.protocol) {
            return Err(XlateError::NotSupported);
        }

        let key = ServiceKey::new(dst.address, dst.port);
        let resolved = self
            .resolve(&key, in_hostns)
            .ok_or(XlateError::NotFound)?;
        let svc = resolved.svc;

        if self.skip_xlate(&svc, dst.address) {
            return Err(XlateError::PermissionDenied);
        }

        let selection = self.select_backend(ctx, &resolved)?;
        let backend = selection.backend;

        if svc.flags.local_redirect && self.skip_xlate_if_same_netns(ctx, &backend) {
            trace!(
                netns = ctx.netns.0,
                backend = %SockAddr::new(backend.address, backend.port),
                "Backend is the caller's own listener"
            );
            return Err(XlateError::LocalRedirectLoop);
        }

        if self.should_remember(&svc, &selection) {
            self.update_affinity::<A>(&svc, ctx, selection.backend_id);
        }

        let mut revnat_error = None;
        if self.config.revnat_enabled() {
            if let Err(e) = self.update_revnat(ctx, &backend, dst, svc.rev_nat_index) {
                self.metrics.update(Direction::Egress, Reason::RevNatUpdate);
                revnat_error = Some(e);
            }
        }

        let target = SockAddr::new(backend.address, backend.port);
        debug!(
            cookie = ctx.cookie.0,
            service = %dst,
            backend = %target,
            backend_id = %selection.backend_id,
            from_affinity = selection.from_affinity,
            "Translated socket destination"
        );

        Ok(Translation {
            target,
            backend_id: selection.backend_id,
            from_affinity: selection.from_affinity,
            revnat_error,
        })
    }
}
