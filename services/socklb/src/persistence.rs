//! Load-balancer state persistence.
//!
//! The state file carries everything the control plane would otherwise
//! push: services with their backends, the identity cache and the bound
//! listeners used for loop prevention.
//!
//! - Saving writes to a temp file and renames it into place
//! - A missing file or a version mismatch starts with empty tables
//! - A file whose records contradict each other is rejected, both when
//!   saving and when loading, before any table is built

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use socklb_networking::{canonical_ip, Protocol};
use tracing::{debug, info, warn};

use crate::control::{build_tables, ServiceSpec};
use crate::ipcache::{Identity, StaticIpCache};
use crate::lb::{Backend, BackendId, LbAddr, NetnsCookie, ServiceFlags, ServiceRecord, SockAddr};
use crate::maps::{FamilyMaps, LbMaps, SnapshotTable, BACKEND_MAP_SIZE, SERVICE_MAP_SIZE};
use crate::sockets::ListenerRegistry;

/// Persisted state file format version.
const STATE_VERSION: u32 = 1;

/// Persisted load-balancer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    /// Format version.
    pub version: u32,
    #[serde(default)]
    pub services: Vec<PersistedService>,
    #[serde(default)]
    pub identities: Vec<PersistedIdentity>,
    #[serde(default)]
    pub listeners: Vec<PersistedListener>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            services: Vec::new(),
            identities: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedService {
    pub frontend: SocketAddr,
    pub rev_nat_index: u16,
    #[serde(default)]
    pub external_ip: bool,
    #[serde(default)]
    pub hostport: bool,
    #[serde(default)]
    pub nodeport: bool,
    #[serde(default)]
    pub loadbalancer: bool,
    #[serde(default)]
    pub local_redirect: bool,
    /// Affinity timeout in seconds; zero disables affinity.
    #[serde(default)]
    pub affinity_timeout: u32,
    pub backends: Vec<PersistedBackend>,
}

impl PersistedService {
    fn record(&self) -> ServiceRecord {
        ServiceRecord {
            count: 0,
            rev_nat_index: self.rev_nat_index,
            flags: ServiceFlags {
                external_ip: self.external_ip,
                hostport: self.hostport,
                nodeport: self.nodeport,
                loadbalancer: self.loadbalancer,
                local_redirect: self.local_redirect,
                affinity: self.affinity_timeout > 0,
            },
            affinity_timeout: self.affinity_timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBackend {
    pub id: u32,
    pub address: SocketAddr,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedIdentity {
    pub address: IpAddr,
    pub identity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedListener {
    pub netns: u64,
    pub protocol: String,
    pub address: SocketAddr,
}

/// Tables and collaborators built from a persisted state.
pub struct LoadedState {
    pub maps: LbMaps,
    pub ipcache: Arc<StaticIpCache>,
    pub listeners: Arc<ListenerRegistry>,
}

type FamilySpecs = (Vec<ServiceSpec<Ipv4Addr>>, Vec<ServiceSpec<Ipv6Addr>>);

/// Split `services` by family. Mapped IPv6 frontends land in the IPv4
/// tables, the same ones dual-stack sockets are resolved against.
fn split_services(services: &[PersistedService]) -> Result<FamilySpecs> {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();

    for service in services {
        let record = service.record();
        let port = service.frontend.port();
        match canonical_ip(service.frontend.ip()) {
            IpAddr::V4(address) => {
                let backends = backends_for(service, as_v4)?;
                v4.push((SockAddr::new(address, port), record, backends));
            }
            IpAddr::V6(address) => {
                let backends = backends_for(service, as_v6)?;
                v6.push((SockAddr::new(address, port), record, backends));
            }
        }
    }

    Ok((v4, v6))
}

fn canonical(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(canonical_ip(addr.ip()), addr.port())
}

fn as_v4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(a) => Some(a),
        IpAddr::V6(_) => None,
    }
}

fn as_v6(ip: IpAddr) -> Option<Ipv6Addr> {
    match ip {
        IpAddr::V6(a) => Some(a),
        IpAddr::V4(_) => None,
    }
}

fn backends_for<A: LbAddr>(
    service: &PersistedService,
    family: impl Fn(IpAddr) -> Option<A>,
) -> Result<Vec<(BackendId, Backend<A>)>> {
    service
        .backends
        .iter()
        .map(|b| {
            let protocol = b
                .protocol
                .parse::<Protocol>()
                .with_context(|| format!("Invalid protocol for backend {}", b.id))?;
            let Some(address) = family(canonical_ip(b.address.ip())) else {
                bail!(
                    "Backend {} ({}) does not match the family of service {}",
                    b.id,
                    b.address,
                    service.frontend
                );
            };
            Ok((BackendId(b.id), Backend::new(address, b.address.port(), protocol)))
        })
        .collect()
}

fn family_maps<A: LbAddr>(services: &[ServiceSpec<A>]) -> Result<FamilyMaps<A>> {
    let (entries, backends) = build_tables(services).context("Failed to build service tables")?;

    let service_table = SnapshotTable::new(SERVICE_MAP_SIZE);
    service_table
        .replace_all(entries)
        .context("Service table capacity exceeded")?;
    let backend_table = SnapshotTable::new(BACKEND_MAP_SIZE);
    backend_table
        .replace_all(backends)
        .context("Backend table capacity exceeded")?;

    Ok(FamilyMaps {
        services: Arc::new(service_table),
        backends: Arc::new(backend_table),
        ..FamilyMaps::in_memory()
    })
}

impl PersistedState {
    /// Check the cross-record invariants the tables rely on.
    ///
    /// Frontends must be unique once IPv4-mapped addresses are folded into
    /// IPv4. Reverse-NAT indices must be nonzero and unique, since they key
    /// affinity and reverse entries. A backend id must name one endpoint in
    /// every service that lists it, because the backend table is shared.
    pub fn validate(&self) -> Result<()> {
        let mut frontends = HashSet::new();
        let mut rev_nat: HashMap<u16, SocketAddr> = HashMap::new();
        let mut endpoints: HashMap<u32, (SocketAddr, Protocol)> = HashMap::new();

        for service in &self.services {
            let frontend = canonical(service.frontend);
            if !frontends.insert(frontend) {
                bail!("Duplicate service frontend {}", frontend);
            }

            if service.rev_nat_index == 0 {
                bail!("Service {} has reverse-NAT index 0", frontend);
            }
            if let Some(other) = rev_nat.insert(service.rev_nat_index, frontend) {
                bail!(
                    "Services {} and {} share reverse-NAT index {}",
                    other,
                    frontend,
                    service.rev_nat_index
                );
            }

            for b in &service.backends {
                let protocol = b
                    .protocol
                    .parse::<Protocol>()
                    .with_context(|| format!("Invalid protocol for backend {}", b.id))?;
                let endpoint = (canonical(b.address), protocol);
                match endpoints.get(&b.id) {
                    Some(seen) if *seen != endpoint => bail!(
                        "Backend {} is {} {} in one service and {} {} in {}",
                        b.id,
                        seen.1,
                        seen.0,
                        endpoint.1,
                        endpoint.0,
                        frontend
                    ),
                    Some(_) => {}
                    None => {
                        endpoints.insert(b.id, endpoint);
                    }
                }
            }
        }

        Ok(())
    }

    /// Build fresh tables and collaborators from this state.
    pub fn load_tables(&self) -> Result<LoadedState> {
        self.validate()?;
        let (v4, v6) = split_services(&self.services)?;
        let maps = LbMaps {
            v4: family_maps(&v4)?,
            v6: family_maps(&v6)?,
        };

        let ipcache = StaticIpCache::from_entries(
            self.identities
                .iter()
                .map(|i| (i.address, Identity(i.identity))),
        );

        let listeners = ListenerRegistry::new();
        for l in &self.listeners {
            let protocol = l
                .protocol
                .parse::<Protocol>()
                .with_context(|| format!("Invalid protocol for listener {}", l.address))?;
            listeners.bind(NetnsCookie(l.netns), protocol, l.address);
        }

        Ok(LoadedState {
            maps,
            ipcache: Arc::new(ipcache),
            listeners: Arc::new(listeners),
        })
    }
}

/// State persistence manager.
pub struct StatePersistence {
    /// Path to the state file.
    state_path: PathBuf,
}

impl StatePersistence {
    pub fn new(state_path: PathBuf) -> Self {
        Self { state_path }
    }

    /// Load state from disk.
    ///
    /// Returns default state if the file doesn't exist or has another
    /// version. Returns error if the file exists but is invalid.
    pub fn load(&self) -> Result<PersistedState> {
        if !self.state_path.exists() {
            debug!(path = %self.state_path.display(), "No state file, starting fresh");
            return Ok(PersistedState::default());
        }

        let content = fs::read_to_string(&self.state_path)
            .with_context(|| format!("Failed to read state file: {}", self.state_path.display()))?;

        let state: PersistedState = serde_json::from_str(&content).with_context(|| {
            format!("Failed to parse state file: {}", self.state_path.display())
        })?;

        if state.version != STATE_VERSION {
            warn!(
                file_version = state.version,
                current_version = STATE_VERSION,
                "State file version mismatch, starting fresh"
            );
            return Ok(PersistedState::default());
        }

        state.validate().with_context(|| {
            format!("Inconsistent state file: {}", self.state_path.display())
        })?;

        info!(
            path = %self.state_path.display(),
            service_count = state.services.len(),
            identity_count = state.identities.len(),
            listener_count = state.listeners.len(),
            "Loaded state from disk"
        );

        Ok(state)
    }

    /// Save state to disk atomically (write to temp, then rename).
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        state
            .validate()
            .context("Refusing to save inconsistent state")?;

        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let tmp_path = self.state_path.with_extension("tmp");
        let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

        fs::write(&tmp_path, &content)
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;

        fs::rename(&tmp_path, &self.state_path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                tmp_path.display(),
                self.state_path.display()
            )
        })?;

        debug!(
            path = %self.state_path.display(),
            service_count = state.services.len(),
            "Saved state to disk"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcache::IpCache;
    use crate::lb::ServiceKey;
    use crate::sockets::SocketLookup;

    fn sample() -> PersistedState {
        PersistedState {
            services: vec![
                PersistedService {
                    frontend: "10.96.0.10:53".parse().unwrap(),
                    rev_nat_index: 1,
                    external_ip: false,
                    hostport: false,
                    nodeport: false,
                    loadbalancer: false,
                    local_redirect: false,
                    affinity_timeout: 0,
                    backends: vec![
                        PersistedBackend {
                            id: 1,
                            address: "10.0.1.1:5353".parse().unwrap(),
                            protocol: "udp".to_string(),
                        },
                        PersistedBackend {
                            id: 2,
                            address: "10.0.1.2:5353".parse().unwrap(),
                            protocol: "udp".to_string(),
                        },
                    ],
                },
                PersistedService {
                    frontend: "[fd00::10]:443".parse().unwrap(),
                    rev_nat_index: 2,
                    external_ip: false,
                    hostport: false,
                    nodeport: false,
                    loadbalancer: false,
                    local_redirect: false,
                    affinity_timeout: 300,
                    backends: vec![PersistedBackend {
                        id: 3,
                        address: "[fd00::1:1]:8443".parse().unwrap(),
                        protocol: "tcp".to_string(),
                    }],
                },
            ],
            identities: vec![PersistedIdentity {
                address: "192.168.1.10".parse().unwrap(),
                identity: 1,
            }],
            listeners: vec![PersistedListener {
                netns: 7,
                protocol: "tcp".to_string(),
                address: "0.0.0.0:8080".parse().unwrap(),
            }],
            ..PersistedState::default()
        }
    }

    #[test]
    fn test_state_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = StatePersistence::new(dir.path().join("state.json"));

        let initial = persistence.load().unwrap();
        assert!(initial.services.is_empty());

        persistence.save(&sample()).unwrap();
        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.services.len(), 2);
        assert_eq!(loaded.services[1].affinity_timeout, 300);
        assert!(!dir.path().join("state.tmp").exists());
    }

    #[test]
    fn test_version_mismatch_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 99, "services": []}"#).unwrap();

        let state = StatePersistence::new(path).load().unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert!(state.services.is_empty());
    }

    #[test]
    fn test_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();

        assert!(StatePersistence::new(path).load().is_err());
    }

    #[test]
    fn test_load_tables_populates_both_families() {
        let loaded = sample().load_tables().unwrap();

        let v4 = loaded
            .maps
            .v4
            .services
            .lookup(&ServiceKey::new(Ipv4Addr::new(10, 96, 0, 10), 53));
        assert!(v4.is_some());
        assert_eq!(loaded.maps.v4.backends.len(), 2);
        assert_eq!(loaded.maps.v6.services.len(), 2);

        assert!(loaded.ipcache.is_host("192.168.1.10".parse().unwrap()));
        assert!(loaded.listeners.has_listener(
            NetnsCookie(7),
            Protocol::Tcp,
            "10.0.1.1".parse().unwrap(),
            8080
        ));
    }

    #[test]
    fn test_family_mismatch_is_rejected() {
        let mut state = sample();
        state.services[0].backends[0].address = "[fd00::1]:53".parse().unwrap();
        assert!(state.load_tables().is_err());
    }

    #[test]
    fn test_shared_rev_nat_index_is_rejected() {
        let mut state = sample();
        state.services[1].rev_nat_index = 1;
        assert!(state.validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert!(StatePersistence::new(path.clone()).save(&state).is_err());
        assert!(!path.exists());

        // Written by hand, it is refused on load instead of half-applied.
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();
        assert!(StatePersistence::new(path).load().is_err());
    }

    #[test]
    fn test_backend_id_names_one_endpoint() {
        let mut state = sample();
        let mut sibling = state.services[0].clone();
        sibling.frontend = "10.96.0.11:53".parse().unwrap();
        sibling.rev_nat_index = 3;
        state.services.push(sibling.clone());
        // Same id, same endpoint: backends may be shared.
        assert!(state.load_tables().is_ok());

        sibling.frontend = "10.96.0.12:53".parse().unwrap();
        sibling.rev_nat_index = 4;
        sibling.backends[0].address = "10.0.9.9:5353".parse().unwrap();
        state.services.push(sibling);
        let err = state.validate().unwrap_err();
        assert!(err.to_string().contains("Backend 1"));
    }

    #[test]
    fn test_mapped_frontend_duplicates_ipv4() {
        let mut state = sample();
        let mut twin = state.services[0].clone();
        twin.frontend = "[::ffff:10.96.0.10]:53".parse().unwrap();
        twin.rev_nat_index = 9;
        state.services.push(twin);
        assert!(state.load_tables().is_err());
    }
}
