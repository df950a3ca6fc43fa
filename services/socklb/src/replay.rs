//! Replay of recorded socket events through the engine.
//!
//! One JSON event per line in, one JSON decision per line out. Events go
//! through the same wire-level dispatch a hook transport would use.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use socklb_networking::{Protocol, RawSockAddr};

use crate::lb::{Hook, SockCtx, SockLb, Verdict};

/// A socket event as recorded by a hook transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SockEvent {
    pub hook: Hook,
    pub cookie: u64,
    pub netns: u64,
    pub protocol: String,
    #[serde(default)]
    pub mark: Option<u32>,
    /// Destination for connect/send, peer for receive/peer queries, local
    /// address for binds.
    pub address: SocketAddr,
}

/// Outcome of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub hook: Hook,
    pub cookie: u64,
    pub verdict: DecisionKind,
    /// Address after the hook ran.
    pub address: SocketAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Rewrite,
    Passthrough,
    Reject,
}

impl SockEvent {
    pub fn ctx(&self) -> Result<SockCtx> {
        let protocol = self
            .protocol
            .parse::<Protocol>()
            .with_context(|| format!("Invalid protocol in event for cookie {}", self.cookie))?;
        let ctx = SockCtx::new(self.cookie, self.netns, protocol);
        Ok(match self.mark {
            Some(mark) => ctx.with_mark(mark),
            None => ctx,
        })
    }
}

/// Run one event through `lb`.
pub fn evaluate(lb: &SockLb, event: &SockEvent) -> Result<Decision> {
    let ctx = event.ctx()?;
    let mut raw = RawSockAddr::from_socket_addr(event.address);
    let verdict = lb.dispatch(event.hook, &ctx, &mut raw);
    let address = raw.socket_addr();

    let (verdict, errno) = match verdict {
        Verdict::Reject(errno) => (DecisionKind::Reject, Some(errno)),
        Verdict::Proceed if address != event.address => (DecisionKind::Rewrite, None),
        Verdict::Proceed => (DecisionKind::Passthrough, None),
    };

    Ok(Decision {
        hook: event.hook,
        cookie: event.cookie,
        verdict,
        address,
        errno,
    })
}

/// Parse and evaluate one input line.
pub fn evaluate_line(lb: &SockLb, line: &str) -> Result<Decision> {
    let event: SockEvent = serde_json::from_str(line).context("Failed to parse socket event")?;
    evaluate(lb, &event)
}
