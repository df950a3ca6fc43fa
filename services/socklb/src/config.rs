//! Engine feature switches and daemon configuration.
//!
//! Everything is env-driven. Feature switches are read once at startup and
//! evaluated per invocation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use socklb_networking::{PortRange, Protocol};

use crate::lb::NetnsCookie;

/// Default cookie of the host network namespace.
pub const DEFAULT_HOST_NETNS_COOKIE: u64 = 1;

/// Runtime feature set of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbConfig {
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
    pub enable_tcp: bool,
    pub enable_udp: bool,
    /// Translate peer-address queries back to the service.
    pub enable_peer: bool,
    pub enable_affinity: bool,
    pub enable_health_check: bool,
    /// Node-exposed services (wildcard lookups, bind guard).
    pub enable_nodeport: bool,
    /// Only translate sockets of the host namespace.
    pub host_only: bool,
    pub nodeport_range: PortRange,
    pub host_netns: NetnsCookie,
}

impl Default for LbConfig {
    fn default() -> Self {
        Self {
            enable_ipv4: true,
            enable_ipv6: true,
            enable_tcp: true,
            enable_udp: true,
            enable_peer: true,
            enable_affinity: true,
            enable_health_check: true,
            enable_nodeport: true,
            host_only: false,
            nodeport_range: PortRange::default(),
            host_netns: NetnsCookie(DEFAULT_HOST_NETNS_COOKIE),
        }
    }
}

impl LbConfig {
    /// Load feature switches from environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let nodeport_range = match std::env::var("SOCKLB_NODEPORT_RANGE") {
            Ok(v) => v
                .parse::<PortRange>()
                .context("SOCKLB_NODEPORT_RANGE must look like 30000-32767.")?,
            Err(_) => defaults.nodeport_range,
        };

        let host_netns = std::env::var("SOCKLB_HOST_NETNS_COOKIE")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("SOCKLB_HOST_NETNS_COOKIE must be an unsigned integer.")?
            .map(NetnsCookie)
            .unwrap_or(defaults.host_netns);

        Ok(Self {
            enable_ipv4: env_flag("SOCKLB_ENABLE_IPV4", defaults.enable_ipv4),
            enable_ipv6: env_flag("SOCKLB_ENABLE_IPV6", defaults.enable_ipv6),
            enable_tcp: env_flag("SOCKLB_ENABLE_TCP", defaults.enable_tcp),
            enable_udp: env_flag("SOCKLB_ENABLE_UDP", defaults.enable_udp),
            enable_peer: env_flag("SOCKLB_ENABLE_PEER", defaults.enable_peer),
            enable_affinity: env_flag("SOCKLB_ENABLE_AFFINITY", defaults.enable_affinity),
            enable_health_check: env_flag(
                "SOCKLB_ENABLE_HEALTH_CHECK",
                defaults.enable_health_check,
            ),
            enable_nodeport: env_flag("SOCKLB_ENABLE_NODEPORT", defaults.enable_nodeport),
            host_only: env_flag("SOCKLB_HOST_ONLY", defaults.host_only),
            nodeport_range,
            host_netns,
        })
    }

    pub fn proto_enabled(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Tcp => self.enable_tcp,
            Protocol::Udp | Protocol::UdpLite => self.enable_udp,
        }
    }

    /// Reverse-NAT bookkeeping is only needed for datagrams and peer queries.
    pub fn revnat_enabled(&self) -> bool {
        self.enable_udp || self.enable_peer
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Daemon configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON file holding services, backends, identities and listeners.
    pub state_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub lb: LbConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let state_file = std::env::var("SOCKLB_STATE_FILE").ok().map(PathBuf::from);

        let log_level = std::env::var("SOCKLB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let lb = LbConfig::from_env()?;

        Ok(Self {
            state_file,
            log_level,
            lb,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_everything_but_host_only() {
        let config = LbConfig::default();
        assert!(config.proto_enabled(Protocol::Tcp));
        assert!(config.proto_enabled(Protocol::UdpLite));
        assert!(config.revnat_enabled());
        assert!(!config.host_only);
        assert_eq!(config.nodeport_range.to_string(), "30000-32767");
    }

    #[test]
    fn test_revnat_needs_udp_or_peer() {
        let config = LbConfig {
            enable_udp: false,
            enable_peer: false,
            ..LbConfig::default()
        };
        assert!(!config.revnat_enabled());
        assert!(!config.proto_enabled(Protocol::Udp));
    }
}
