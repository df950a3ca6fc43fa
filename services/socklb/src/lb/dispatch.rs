//! Wire-level entry point for hook transports.
//!
//! Decodes the raw context fields, runs the typed hook for the context's
//! family and writes any rewrite back in place.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use socklb_networking::{RawSock, RawSockAddr};
use tracing::warn;

use super::types::{Action, SockAddr, SockCtx};
use super::SockLb;

/// Socket lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    Connect,
    SendMsg,
    RecvMsg,
    GetPeerName,
    PreBind,
    PostBind,
}

impl Hook {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::SendMsg => "send_msg",
            Self::RecvMsg => "recv_msg",
            Self::GetPeerName => "get_peer_name",
            Self::PreBind => "pre_bind",
            Self::PostBind => "post_bind",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the transport returns to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    /// Fail the syscall with this errno.
    Reject(i32),
}

fn verdict<A>(action: &Action<A>) -> Verdict {
    match action {
        Action::Reject(e) => Verdict::Reject(e.errno()),
        Action::Rewrite(_) | Action::Passthrough(_) => Verdict::Proceed,
    }
}

impl SockLb {
    /// Run `hook` over raw context fields.
    ///
    /// For [`Hook::PostBind`] the fields carry the bound local address.
    pub fn dispatch(&self, hook: Hook, ctx: &SockCtx, addr: &mut RawSockAddr) -> Verdict {
        match addr.socket_addr() {
            SocketAddr::V4(v4) => {
                let input = SockAddr::new(*v4.ip(), v4.port());
                let action = match hook {
                    Hook::Connect => self.connect4(ctx, input),
                    Hook::SendMsg => self.sendmsg4(ctx, input),
                    Hook::RecvMsg => self.recvmsg4(ctx, input),
                    Hook::GetPeerName => self.getpeername4(ctx, input),
                    Hook::PreBind => self.pre_bind4(ctx, input),
                    Hook::PostBind => self.post_bind4(ctx, input),
                };
                if let Some(out) = action.rewritten() {
                    if let Err(e) = addr.set_v4(out.address, out.port) {
                        warn!(error = %e, %hook, "Failed to write back rewritten address");
                    }
                }
                verdict(&action)
            }
            SocketAddr::V6(v6) => {
                let input = SockAddr::new(*v6.ip(), v6.port());
                let action = match hook {
                    Hook::Connect => self.connect6(ctx, input),
                    Hook::SendMsg => self.sendmsg6(ctx, input),
                    Hook::RecvMsg => self.recvmsg6(ctx, input),
                    Hook::GetPeerName => self.getpeername6(ctx, input),
                    Hook::PreBind => self.pre_bind6(ctx, input),
                    Hook::PostBind => self.post_bind6(ctx, input),
                };
                if let Some(out) = action.rewritten() {
                    if let Err(e) = addr.set_v6(out.address, out.port) {
                        warn!(error = %e, %hook, "Failed to write back rewritten address");
                    }
                }
                verdict(&action)
            }
        }
    }

    /// Post-bind over the fields of a bound socket.
    pub fn dispatch_post_bind(&self, ctx: &SockCtx, sock: &RawSock) -> Verdict {
        match sock.local_addr() {
            SocketAddr::V4(v4) => {
                verdict(&self.post_bind4(ctx, SockAddr::new(*v4.ip(), v4.port())))
            }
            SocketAddr::V6(v6) => {
                verdict(&self.post_bind6(ctx, SockAddr::new(*v6.ip(), v6.port())))
            }
        }
    }
}
