//! Service lookup, including the wildcard fallback for node-exposed ports.

use tracing::trace;

use super::types::{LbAddr, ServiceEntry, ServiceKey, ServiceRecord};
use super::SockLb;
use crate::ipcache::Identity;

/// A service together with the key it was found under.
///
/// Backend slots hang off the canonical key, which is the wildcard key when
/// the service was found through a wildcard lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<A> {
    pub key: ServiceKey<A>,
    pub svc: ServiceRecord,
}

impl SockLb {
    /// Exact lookup of a service (slot 0). Services without backends are
    /// treated as absent.
    pub fn lookup_service<A: LbAddr>(&self, key: &ServiceKey<A>) -> Option<ServiceRecord> {
        let key = key.with_slot(0);
        match A::maps(&self.maps).services.lookup(&key)? {
            ServiceEntry::Service(svc) if svc.count > 0 => Some(svc),
            _ => None,
        }
    }

    /// Retry `key` with the address zeroed if the destination qualifies.
    ///
    /// The port must be inside the node-port range (or outside it, with
    /// `inv_match`). The address must be loopback from the host namespace,
    /// or owned by this host, or by a remote node if `include_remote_hosts`.
    /// `key` itself is never modified.
    pub(crate) fn wildcard_lookup<A: LbAddr>(
        &self,
        key: &ServiceKey<A>,
        include_remote_hosts: bool,
        inv_match: bool,
        in_hostns: bool,
    ) -> Option<Resolved<A>> {
        if !self.config.enable_nodeport {
            return None;
        }

        let out_of_range = !self.config.nodeport_range.contains(key.port);
        if out_of_range ^ inv_match {
            return None;
        }

        let eligible = (in_hostns && key.address.is_loopback())
            || self
                .ipcache
                .lookup(key.address.to_ip())
                .is_some_and(|info| {
                    info.sec_label == Identity::HOST
                        || (include_remote_hosts && info.sec_label == Identity::REMOTE_NODE)
                });
        if !eligible {
            return None;
        }

        let wildcard = key.wildcard();
        trace!(address = %key.address, port = key.port, "Trying wildcard service lookup");
        self.lookup_service(&wildcard).map(|svc| Resolved { key: wildcard, svc })
    }

    /// Wildcard lookup for both node-exposed service kinds.
    ///
    /// NodePort-like services are looked up inside the port range and must be
    /// flagged nodeport; HostPort-like services are looked up outside it and
    /// must be flagged hostport.
    pub(crate) fn wildcard_lookup_full<A: LbAddr>(
        &self,
        key: &ServiceKey<A>,
        in_hostns: bool,
    ) -> Option<Resolved<A>> {
        self.wildcard_lookup(key, true, false, in_hostns)
            .filter(|r| r.svc.flags.nodeport)
            .or_else(|| {
                self.wildcard_lookup(key, false, true, in_hostns)
                    .filter(|r| r.svc.flags.hostport)
            })
    }

    /// Direct lookup, falling back to the wildcard protocol.
    pub fn resolve<A: LbAddr>(&self, key: &ServiceKey<A>, in_hostns: bool) -> Option<Resolved<A>> {
        let key = key.with_slot(0);
        match self.lookup_service(&key) {
            Some(svc) => Some(Resolved { key, svc }),
            None => self.wildcard_lookup_full(&key, in_hostns),
        }
    }
}
