//! Health-check redirection.
//!
//! A health checker marks its socket, registers the backend it wants to
//! check at bind time, and then dials the service address. The connect is
//! steered to the registered port without going through selection.

use tracing::{debug, warn};

use super::error::XlateError;
use super::types::{Action, Backend, HealthEntry, LbAddr, SockAddr, SockCtx};
use super::SockLb;

/// Socket mark identifying health-check sockets.
pub const MARK_MAGIC_HEALTH: u32 = 0x0D00;

impl SockLb {
    /// Whether `ctx` belongs to the health checker.
    ///
    /// The mark is only settable by privileged processes, so it is trusted
    /// as-is.
    pub fn is_health_check(&self, ctx: &SockCtx) -> bool {
        ctx.mark == Some(MARK_MAGIC_HEALTH)
    }

    /// Register the health-check target and auto-bind to the wildcard address.
    pub(crate) fn health_register<A: LbAddr>(
        &self,
        ctx: &SockCtx,
        target: SockAddr<A>,
    ) -> Result<SockAddr<A>, XlateError> {
        let entry = HealthEntry {
            peer: Backend::new(target.address, target.port, ctx.protocol),
        };
        A::maps(&self.maps)
            .health
            .update(ctx.cookie, entry)
            .map_err(|e| {
                warn!(error = %e, cookie = ctx.cookie.0, "Failed to register health-check target");
                XlateError::HealthRegisterFailed
            })?;

        debug!(cookie = ctx.cookie.0, target = %target, "Registered health-check target");
        Ok(SockAddr::new(A::UNSPECIFIED, 0))
    }

    /// Connect of a health-check socket: only the port is rewritten.
    ///
    /// Without a registration (or with health checking off) the socket
    /// connects to its literal destination.
    pub(crate) fn health_fwd<A: LbAddr>(&self, ctx: &SockCtx, dst: SockAddr<A>) -> Action<A> {
        if !self.config.enable_health_check {
            return Action::Passthrough(None);
        }
        match A::maps(&self.maps).health.lookup(&ctx.cookie) {
            Some(entry) => Action::Rewrite(SockAddr::new(dst.address, entry.peer.port)),
            None => Action::Passthrough(None),
        }
    }
}
