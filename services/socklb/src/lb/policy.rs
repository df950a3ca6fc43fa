//! Checks that forbid translation even though a service matched.

use socklb_networking::Protocol;
use tracing::debug;

use super::types::{Backend, LbAddr, ServiceRecord, SockCtx};
use super::SockLb;

impl SockLb {
    /// External-IP services, and host-port services reached through a
    /// non-loopback address, may only be translated when `address` belongs
    /// to this host.
    ///
    /// `address` is the destination as the caller gave it, never the
    /// zeroed wildcard key.
    pub(crate) fn skip_xlate<A: LbAddr>(&self, svc: &ServiceRecord, address: A) -> bool {
        let restricted =
            svc.flags.external_ip || (svc.flags.hostport && !address.is_loopback());
        if !restricted {
            return false;
        }

        let skip = !self.ipcache.is_host(address.to_ip());
        if skip {
            debug!(%address, rev_nat_index = svc.rev_nat_index, "Destination not owned by host");
        }
        skip
    }

    /// True when `backend` is already bound in the caller's own namespace,
    /// so translating would loop the socket back to itself.
    pub(crate) fn skip_xlate_if_same_netns<A: LbAddr>(
        &self,
        ctx: &SockCtx,
        backend: &Backend<A>,
    ) -> bool {
        let protocol = match ctx.protocol {
            Protocol::Tcp | Protocol::Udp => ctx.protocol,
            Protocol::UdpLite => return false,
        };
        self.sockets
            .has_listener(ctx.netns, protocol, backend.address.to_ip(), backend.port)
    }
}
