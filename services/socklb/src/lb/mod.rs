//! Socket-level service translation.
//!
//! Instead of rewriting every packet of a service connection, the engine
//! rewrites the destination of a socket exactly once, when it connects or
//! sends, and answers peer-address queries with the service address.
//!
//! ## Architecture
//!
//! ```text
//! hook -> dual-stack adapter -> health-check redirect?
//!                            -> resolver (direct, wildcard) -> policy
//!                            -> selector (affinity, slot hash) -> loop check
//!                            -> reverse-NAT record -> rewrite
//! ```
//!
//! Every hook is a non-blocking function over the injected tables: it returns
//! an [`Action`] and its only side effects are table writes and metrics.
//!
//! ## Usage
//!
//! ```ignore
//! let lb = SockLb::new(LbConfig::default(), LbMaps::in_memory())
//!     .with_ipcache(ipcache);
//!
//! let ctx = SockCtx::new(cookie, netns, Protocol::Tcp);
//! match lb.connect4(&ctx, SockAddr::new(service_ip, 80)) {
//!     Action::Rewrite(backend) => { /* write back */ }
//!     Action::Passthrough(_) => {}
//!     Action::Reject(err) => return Err(err.errno()),
//! }
//! ```

mod bind;
mod dispatch;
mod error;
mod forward;
mod health;
mod hooks;
mod policy;
mod resolver;
mod revnat;
mod selector;
mod types;

use std::sync::Arc;

use crate::clock::{Clock, MonotonicClock};
use crate::config::LbConfig;
use crate::ipcache::{IpCache, StaticIpCache};
use crate::maps::LbMaps;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::sockets::{ListenerRegistry, SocketLookup};

pub use dispatch::{Hook, Verdict};
pub use error::XlateError;
pub use health::MARK_MAGIC_HEALTH;
pub use resolver::Resolved;
pub use selector::{backend_slot, SlotRng, ThreadSlotRng};
pub use types::{
    Action, AffinityKey, AffinityValue, Backend, BackendId, BackendSlot, HealthEntry, LbAddr,
    NetnsCookie, RevNatKey, RevNatValue, ServiceEntry, ServiceFlags, ServiceKey, ServiceRecord,
    SockAddr, SockCookie, SockCtx, Translation,
};

/// The socket load balancer.
///
/// Cheap to share: all state lives in the injected tables and collaborators.
pub struct SockLb {
    config: LbConfig,
    maps: LbMaps,
    ipcache: Arc<dyn IpCache>,
    sockets: Arc<dyn SocketLookup>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn SlotRng>,
}

impl SockLb {
    /// Create an engine over the given tables with empty collaborators.
    pub fn new(config: LbConfig, maps: LbMaps) -> Self {
        Self {
            config,
            maps,
            ipcache: Arc::new(StaticIpCache::new()),
            sockets: Arc::new(ListenerRegistry::new()),
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(MonotonicClock::new()),
            rng: Arc::new(ThreadSlotRng),
        }
    }

    pub fn with_ipcache(mut self, ipcache: Arc<dyn IpCache>) -> Self {
        self.ipcache = ipcache;
        self
    }

    pub fn with_sockets(mut self, sockets: Arc<dyn SocketLookup>) -> Self {
        self.sockets = sockets;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rng(mut self, rng: Arc<dyn SlotRng>) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> &LbConfig {
        &self.config
    }

    pub fn maps(&self) -> &LbMaps {
        &self.maps
    }

    fn in_hostns(&self, ctx: &SockCtx) -> bool {
        ctx.netns == self.config.host_netns
    }
}
