//! Bind guard: keep host processes off ports that exposed services own.

use tracing::debug;

use super::error::XlateError;
use super::types::{LbAddr, ServiceKey, SockAddr, SockCtx};
use super::SockLb;

impl SockLb {
    /// Check a completed bind of a host-namespace socket.
    ///
    /// Fails with `AddressInUse` when `local` resolves, directly or through
    /// a host-only wildcard lookup, to a node-port, external-IP or
    /// load-balancer service.
    pub(crate) fn post_bind<A: LbAddr>(
        &self,
        ctx: &SockCtx,
        local: SockAddr<A>,
    ) -> Result<(), XlateError> {
        if !self.config.enable_nodeport
            || !self.config.proto_enabled(ctx.protocol)
            || !self.in_hostns(ctx)
        {
            return Ok(());
        }

        let key = ServiceKey::new(local.address, local.port);
        let svc = self
            .lookup_service(&key)
            .or_else(|| self.wildcard_lookup(&key, false, false, true).map(|r| r.svc));

        match svc {
            Some(svc)
                if svc.flags.nodeport || svc.flags.external_ip || svc.flags.loadbalancer =>
            {
                debug!(
                    %local,
                    netns = ctx.netns.0,
                    rev_nat_index = svc.rev_nat_index,
                    "Rejected bind to exposed service port"
                );
                Err(XlateError::AddressInUse)
            }
            _ => Ok(()),
        }
    }
}
