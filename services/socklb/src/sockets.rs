//! Namespace-scoped socket existence check.
//!
//! Used only for local-redirect loop prevention: "is something in this
//! namespace already bound to the backend's address and port?"

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{PoisonError, RwLock};

use socklb_networking::{canonical_ip, Protocol};
use tracing::debug;

use crate::lb::NetnsCookie;

/// Targeted socket lookup in one network namespace.
pub trait SocketLookup: Send + Sync {
    fn has_listener(&self, netns: NetnsCookie, protocol: Protocol, addr: IpAddr, port: u16) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ListenerKey {
    netns: NetnsCookie,
    protocol: Protocol,
    addr: IpAddr,
    port: u16,
}

/// In-memory registry of bound sockets per namespace.
///
/// A socket bound to the unspecified address matches any destination
/// address of its family on the same port.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashSet<ListenerKey>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, netns: NetnsCookie, protocol: Protocol, addr: SocketAddr) {
        let key = ListenerKey {
            netns,
            protocol,
            addr: canonical_ip(addr.ip()),
            port: addr.port(),
        };
        debug!(netns = netns.0, %protocol, %addr, "Registered listener");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }

    pub fn unbind(&self, netns: NetnsCookie, protocol: Protocol, addr: SocketAddr) -> bool {
        let key = ListenerKey {
            netns,
            protocol,
            addr: canonical_ip(addr.ip()),
            port: addr.port(),
        };
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SocketLookup for ListenerRegistry {
    fn has_listener(&self, netns: NetnsCookie, protocol: Protocol, addr: IpAddr, port: u16) -> bool {
        let addr = canonical_ip(addr);
        let unspecified = match addr {
            IpAddr::V4(_) => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
        };

        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        [addr, unspecified].into_iter().any(|addr| {
            listeners.contains(&ListenerKey {
                netns,
                protocol,
                addr,
                port,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_namespace_scoped() {
        let registry = ListenerRegistry::new();
        let ns1 = NetnsCookie(10);
        let ns2 = NetnsCookie(20);
        registry.bind(ns1, Protocol::Tcp, "10.0.1.5:8080".parse().unwrap());

        let addr: IpAddr = "10.0.1.5".parse().unwrap();
        assert!(registry.has_listener(ns1, Protocol::Tcp, addr, 8080));
        assert!(!registry.has_listener(ns2, Protocol::Tcp, addr, 8080));
        assert!(!registry.has_listener(ns1, Protocol::Udp, addr, 8080));
        assert!(!registry.has_listener(ns1, Protocol::Tcp, addr, 8081));
    }

    #[test]
    fn test_unspecified_bind_matches_any_address() {
        let registry = ListenerRegistry::new();
        let ns = NetnsCookie(1);
        registry.bind(ns, Protocol::Udp, "0.0.0.0:53".parse().unwrap());

        assert!(registry.has_listener(ns, Protocol::Udp, "10.0.0.9".parse().unwrap(), 53));
        assert!(registry.unbind(ns, Protocol::Udp, "0.0.0.0:53".parse().unwrap()));
        assert!(registry.is_empty());
    }
}
