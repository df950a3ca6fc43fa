//! Table schemas and hook inputs/outputs.

use std::fmt;
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use socklb_networking::{is_v4_loopback, is_v6_loopback, Protocol};

use super::error::XlateError;
use crate::config::LbConfig;
use crate::maps::{FamilyMaps, LbMaps};

/// An address family the engine can translate.
///
/// Both families run the same algorithms; this trait supplies the few
/// places where they differ.
pub trait LbAddr: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// The all-zero address used for wildcard keys and auto-bind.
    const UNSPECIFIED: Self;

    fn is_loopback(&self) -> bool;

    fn to_ip(self) -> IpAddr;

    /// Whether this family is enabled.
    fn enabled(config: &LbConfig) -> bool;

    /// This family's tables.
    fn maps(maps: &LbMaps) -> &FamilyMaps<Self>;
}

impl LbAddr for Ipv4Addr {
    const UNSPECIFIED: Self = Ipv4Addr::UNSPECIFIED;

    fn is_loopback(&self) -> bool {
        is_v4_loopback(*self)
    }

    fn to_ip(self) -> IpAddr {
        IpAddr::V4(self)
    }

    fn enabled(config: &LbConfig) -> bool {
        config.enable_ipv4
    }

    fn maps(maps: &LbMaps) -> &FamilyMaps<Self> {
        &maps.v4
    }
}

impl LbAddr for Ipv6Addr {
    const UNSPECIFIED: Self = Ipv6Addr::UNSPECIFIED;

    fn is_loopback(&self) -> bool {
        is_v6_loopback(*self)
    }

    fn to_ip(self) -> IpAddr {
        IpAddr::V6(self)
    }

    fn enabled(config: &LbConfig) -> bool {
        config.enable_ipv6
    }

    fn maps(maps: &LbMaps) -> &FamilyMaps<Self> {
        &maps.v6
    }
}

/// Kernel-assigned socket identifier, unique for the socket's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SockCookie(pub u64);

/// Network namespace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetnsCookie(pub u64);

/// Backend identifier, unique across services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub u32);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An address/port pair in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockAddr<A> {
    pub address: A,
    pub port: u16,
}

impl<A> SockAddr<A> {
    pub fn new(address: A, port: u16) -> Self {
        Self { address, port }
    }
}

impl<A: fmt::Display> fmt::Display for SockAddr<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Per-invocation socket context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockCtx {
    pub cookie: SockCookie,
    pub netns: NetnsCookie,
    pub protocol: Protocol,
    /// Value of the privileged socket mark option, if set.
    pub mark: Option<u32>,
}

impl SockCtx {
    pub fn new(cookie: u64, netns: u64, protocol: Protocol) -> Self {
        Self {
            cookie: SockCookie(cookie),
            netns: NetnsCookie(netns),
            protocol,
            mark: None,
        }
    }

    pub fn with_mark(mut self, mark: u32) -> Self {
        self.mark = Some(mark);
        self
    }
}

// ============================================================================
// Service and backend tables
// ============================================================================

/// Key of the service table.
///
/// Slot 0 addresses the service itself; slots `1..=count` address its
/// backend pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey<A> {
    pub address: A,
    pub port: u16,
    pub backend_slot: u16,
}

impl<A: LbAddr> ServiceKey<A> {
    pub fn new(address: A, port: u16) -> Self {
        Self {
            address,
            port,
            backend_slot: 0,
        }
    }

    pub fn with_slot(self, backend_slot: u16) -> Self {
        Self {
            backend_slot,
            ..self
        }
    }

    /// A copy with the address zeroed.
    pub fn wildcard(self) -> Self {
        Self {
            address: A::UNSPECIFIED,
            ..self
        }
    }
}

/// Service classification flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceFlags {
    pub external_ip: bool,
    pub hostport: bool,
    pub nodeport: bool,
    pub loadbalancer: bool,
    pub local_redirect: bool,
    pub affinity: bool,
}

/// The slot-0 record of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Number of backend slots.
    pub count: u16,
    /// Reverse-NAT index. Reassigned whenever the backend set changes, so it
    /// doubles as the service version.
    pub rev_nat_index: u16,
    pub flags: ServiceFlags,
    /// Seconds an idle affinity entry stays valid.
    pub affinity_timeout: u32,
}

/// A backend pointer stored at a nonzero slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSlot {
    pub backend_id: BackendId,
}

/// Value of the service table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEntry {
    Service(ServiceRecord),
    Slot(BackendSlot),
}

/// A concrete backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Backend<A> {
    pub address: A,
    pub port: u16,
    pub protocol: Protocol,
}

impl<A> Backend<A> {
    pub fn new(address: A, port: u16, protocol: Protocol) -> Self {
        Self {
            address,
            port,
            protocol,
        }
    }
}

// ============================================================================
// Engine-owned tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffinityKey {
    pub rev_nat_index: u16,
    pub client_id: NetnsCookie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinityValue {
    pub backend_id: BackendId,
    /// Monotonic seconds.
    pub last_used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevNatKey<A> {
    pub cookie: SockCookie,
    pub address: A,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevNatValue<A> {
    pub address: A,
    pub port: u16,
    pub rev_nat_index: u16,
}

/// Target registered by a health-check socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthEntry<A> {
    pub peer: Backend<A>,
}

// ============================================================================
// Hook results
// ============================================================================

/// What the hook transport should do with the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<A> {
    /// Write this address/port back into the socket and proceed.
    Rewrite(SockAddr<A>),
    /// Proceed with the caller's own address; the error says why, if any.
    Passthrough(Option<XlateError>),
    /// Fail the syscall.
    Reject(XlateError),
}

impl<A> Action<A> {
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Action<B> {
        match self {
            Self::Rewrite(addr) => Action::Rewrite(SockAddr::new(f(addr.address), addr.port)),
            Self::Passthrough(reason) => Action::Passthrough(reason),
            Self::Reject(err) => Action::Reject(err),
        }
    }

    pub fn rewritten(&self) -> Option<&SockAddr<A>> {
        match self {
            Self::Rewrite(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject(_))
    }
}

/// Result of a successful forward translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation<A> {
    pub target: SockAddr<A>,
    pub backend_id: BackendId,
    pub from_affinity: bool,
    /// Set when the reverse entry could not be recorded.
    pub revnat_error: Option<XlateError>,
}
