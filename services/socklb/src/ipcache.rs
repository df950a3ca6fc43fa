//! Read-only identity cache (address → owning identity).
//!
//! The engine uses it to decide whether a destination belongs to this host,
//! to another cluster node, or to something else entirely.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use socklb_networking::canonical_ip;

/// Numeric security identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(pub u32);

impl Identity {
    /// The local host.
    pub const HOST: Identity = Identity(1);
    /// Anything outside the cluster.
    pub const WORLD: Identity = Identity(2);
    /// Another node of the cluster.
    pub const REMOTE_NODE: Identity = Identity(6);
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteEndpointInfo {
    pub sec_label: Identity,
}

/// Address → identity lookups.
pub trait IpCache: Send + Sync {
    fn lookup(&self, addr: IpAddr) -> Option<RemoteEndpointInfo>;

    /// Whether the address is owned by the local host.
    fn is_host(&self, addr: IpAddr) -> bool {
        self.lookup(addr)
            .is_some_and(|info| info.sec_label == Identity::HOST)
    }
}

/// In-memory identity cache, replaced wholesale by its owner.
#[derive(Default)]
pub struct StaticIpCache {
    entries: ArcSwap<HashMap<IpAddr, RemoteEndpointInfo>>,
}

impl StaticIpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (IpAddr, Identity)>) -> Self {
        let cache = Self::new();
        cache.replace_all(entries);
        cache
    }

    /// Atomically replace every entry.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (IpAddr, Identity)>) {
        let map = entries
            .into_iter()
            .map(|(addr, sec_label)| (canonical_ip(addr), RemoteEndpointInfo { sec_label }))
            .collect();
        self.entries.store(Arc::new(map));
    }

    pub fn insert(&self, addr: IpAddr, sec_label: Identity) {
        self.entries.rcu(|current| {
            let mut next: HashMap<IpAddr, RemoteEndpointInfo> = (**current).clone();
            next.insert(canonical_ip(addr), RemoteEndpointInfo { sec_label });
            next
        });
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IpCache for StaticIpCache {
    fn lookup(&self, addr: IpAddr) -> Option<RemoteEndpointInfo> {
        self.entries.load().get(&canonical_ip(addr)).copied()
    }
}
