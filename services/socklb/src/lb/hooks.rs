//! Socket lifecycle hooks, one pair per address family.
//!
//! IPv6 hooks hand IPv4-mapped addresses to the IPv4 hook and re-wrap the
//! result, so a dual-stack socket talking to `::ffff:a.b.c.d` is treated
//! exactly like an IPv4 socket talking to `a.b.c.d`.

use std::net::{Ipv4Addr, Ipv6Addr};

use socklb_networking::{build_v4_in_v6, v4_from_mapped};

use super::error::XlateError;
use super::types::{Action, LbAddr, SockAddr, SockCtx};
use super::SockLb;

/// Run `v4` on the embedded address if `addr` is IPv4-mapped, else `v6`.
fn dual_stack(
    addr: SockAddr<Ipv6Addr>,
    v4: impl FnOnce(SockAddr<Ipv4Addr>) -> Action<Ipv4Addr>,
    v6: impl FnOnce(SockAddr<Ipv6Addr>) -> Action<Ipv6Addr>,
) -> Action<Ipv6Addr> {
    match v4_from_mapped(&addr.address) {
        Some(inner) => v4(SockAddr::new(inner, addr.port)).map(build_v4_in_v6),
        None => v6(addr),
    }
}

fn from_result<A>(result: Result<SockAddr<A>, XlateError>) -> Action<A> {
    match result {
        Ok(addr) => Action::Rewrite(addr),
        Err(e) => Action::Passthrough(Some(e)),
    }
}

impl SockLb {
    fn connect<A: LbAddr>(&self, ctx: &SockCtx, dst: SockAddr<A>) -> Action<A> {
        if !A::enabled(&self.config) {
            return Action::Passthrough(Some(XlateError::NotSupported));
        }
        if self.is_health_check(ctx) {
            return self.health_fwd(ctx, dst);
        }
        from_result(self.xlate_fwd(ctx, dst, false).map(|t| t.target))
    }

    fn sendmsg<A: LbAddr>(&self, ctx: &SockCtx, dst: SockAddr<A>) -> Action<A> {
        if !A::enabled(&self.config) || !self.config.enable_udp {
            return Action::Passthrough(Some(XlateError::NotSupported));
        }
        from_result(self.xlate_fwd(ctx, dst, true).map(|t| t.target))
    }

    fn reverse<A: LbAddr>(&self, ctx: &SockCtx, peer: SockAddr<A>, active: bool) -> Action<A> {
        if !A::enabled(&self.config) || !active {
            return Action::Passthrough(None);
        }
        from_result(self.xlate_rev(ctx, peer))
    }

    fn pre_bind<A: LbAddr>(&self, ctx: &SockCtx, addr: SockAddr<A>) -> Action<A> {
        if !A::enabled(&self.config)
            || !self.config.enable_health_check
            || !self.config.proto_enabled(ctx.protocol)
            || !self.in_hostns(ctx)
            || !self.is_health_check(ctx)
        {
            return Action::Passthrough(None);
        }
        match self.health_register(ctx, addr) {
            Ok(bound) => Action::Rewrite(bound),
            Err(e) => Action::Reject(e),
        }
    }

    fn post_bind_hook<A: LbAddr>(&self, ctx: &SockCtx, local: SockAddr<A>) -> Action<A> {
        if !A::enabled(&self.config) {
            return Action::Passthrough(None);
        }
        match self.post_bind(ctx, local) {
            Ok(()) => Action::Passthrough(None),
            Err(e) => Action::Reject(e),
        }
    }

    /// Stream or datagram connect.
    pub fn connect4(&self, ctx: &SockCtx, dst: SockAddr<Ipv4Addr>) -> Action<Ipv4Addr> {
        self.connect(ctx, dst)
    }

    pub fn connect6(&self, ctx: &SockCtx, dst: SockAddr<Ipv6Addr>) -> Action<Ipv6Addr> {
        dual_stack(dst, |v4| self.connect(ctx, v4), |v6| self.connect(ctx, v6))
    }

    /// Unconnected datagram send.
    pub fn sendmsg4(&self, ctx: &SockCtx, dst: SockAddr<Ipv4Addr>) -> Action<Ipv4Addr> {
        self.sendmsg(ctx, dst)
    }

    pub fn sendmsg6(&self, ctx: &SockCtx, dst: SockAddr<Ipv6Addr>) -> Action<Ipv6Addr> {
        dual_stack(dst, |v4| self.sendmsg(ctx, v4), |v6| self.sendmsg(ctx, v6))
    }

    /// Datagram receive: `src` is the sender as seen on the wire.
    pub fn recvmsg4(&self, ctx: &SockCtx, src: SockAddr<Ipv4Addr>) -> Action<Ipv4Addr> {
        self.reverse(ctx, src, self.config.enable_udp)
    }

    pub fn recvmsg6(&self, ctx: &SockCtx, src: SockAddr<Ipv6Addr>) -> Action<Ipv6Addr> {
        let active = self.config.enable_udp;
        dual_stack(
            src,
            |v4| self.reverse(ctx, v4, active),
            |v6| self.reverse(ctx, v6, active),
        )
    }

    /// Peer-address query of a connected socket.
    pub fn getpeername4(&self, ctx: &SockCtx, peer: SockAddr<Ipv4Addr>) -> Action<Ipv4Addr> {
        self.reverse(ctx, peer, self.config.enable_peer)
    }

    pub fn getpeername6(&self, ctx: &SockCtx, peer: SockAddr<Ipv6Addr>) -> Action<Ipv6Addr> {
        let active = self.config.enable_peer;
        dual_stack(
            peer,
            |v4| self.reverse(ctx, v4, active),
            |v6| self.reverse(ctx, v6, active),
        )
    }

    /// Bind before it takes effect. Only health-check sockets are touched:
    /// their requested address becomes the health-check target and they are
    /// rebound to the wildcard address.
    pub fn pre_bind4(&self, ctx: &SockCtx, addr: SockAddr<Ipv4Addr>) -> Action<Ipv4Addr> {
        self.pre_bind(ctx, addr)
    }

    pub fn pre_bind6(&self, ctx: &SockCtx, addr: SockAddr<Ipv6Addr>) -> Action<Ipv6Addr> {
        dual_stack(addr, |v4| self.pre_bind(ctx, v4), |v6| self.pre_bind(ctx, v6))
    }

    /// Bind after it took effect; `local` is the bound address.
    pub fn post_bind4(&self, ctx: &SockCtx, local: SockAddr<Ipv4Addr>) -> Action<Ipv4Addr> {
        self.post_bind_hook(ctx, local)
    }

    pub fn post_bind6(&self, ctx: &SockCtx, local: SockAddr<Ipv6Addr>) -> Action<Ipv6Addr> {
        dual_stack(
            local,
            |v4| self.post_bind_hook(ctx, v4),
            |v6| self.post_bind_hook(ctx, v6),
        )
    }
}
