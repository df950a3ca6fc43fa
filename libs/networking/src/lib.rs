//! Address and port helpers for the socket load balancer.
//!
//! This library provides helpers for:
//! - Transport protocol numbers
//! - Loopback and IPv4-mapped IPv6 classification
//! - Converting hook context wire fields to canonical `std::net` types
//! - Node-exposed port ranges

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid port range.
    #[error("invalid port range: {0}")]
    InvalidPortRange(String),

    /// Unknown or unsupported transport protocol.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Address family does not match the requested operation.
    #[error("address family mismatch: expected {expected}")]
    FamilyMismatch { expected: &'static str },
}

// ============================================================================
// Protocols
// ============================================================================

/// Transport protocol of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
    UdpLite,
}

impl Protocol {
    /// Parse from an IANA protocol number.
    pub fn from_number(n: u8) -> Result<Self, NetworkError> {
        match n {
            6 => Ok(Self::Tcp),
            17 => Ok(Self::Udp),
            136 => Ok(Self::UdpLite),
            other => Err(NetworkError::UnsupportedProtocol(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::UdpLite => "udplite",
        }
    }

    /// Datagram protocols have no per-connection handshake.
    pub fn is_datagram(self) -> bool {
        matches!(self, Self::Udp | Self::UdpLite)
    }
}

impl FromStr for Protocol {
    type Err = NetworkError;

    /// Accepts a name (`tcp`, `udp`, `udplite`) or an IANA number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u8>() {
            return Self::from_number(n);
        }
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "udplite" | "udp-lite" => Ok(Self::UdpLite),
            other => Err(NetworkError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Address classification
// ============================================================================

/// Check for the 127.0.0.0/8 range (RFC 3330).
pub fn is_v4_loopback(addr: Ipv4Addr) -> bool {
    addr.octets()[0] == 127
}

/// Check for ::1/128 (RFC 4291). Mapped IPv4 loopback does not count.
pub fn is_v6_loopback(addr: Ipv6Addr) -> bool {
    addr == Ipv6Addr::LOCALHOST
}

/// Check for `::ffff:<IPv4 address>`.
pub fn is_v4_in_v6(addr: &Ipv6Addr) -> bool {
    let octets = addr.octets();
    octets[..10].iter().all(|&b| b == 0) && octets[10] == 0xff && octets[11] == 0xff
}

/// Extract the embedded IPv4 address of a mapped IPv6 address.
pub fn v4_from_mapped(addr: &Ipv6Addr) -> Option<Ipv4Addr> {
    if !is_v4_in_v6(addr) {
        return None;
    }
    let o = addr.octets();
    Some(Ipv4Addr::new(o[12], o[13], o[14], o[15]))
}

/// Build `::ffff:<v4>`.
pub fn build_v4_in_v6(v4: Ipv4Addr) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[10] = 0xff;
    octets[11] = 0xff;
    octets[12..].copy_from_slice(&v4.octets());
    Ipv6Addr::from(octets)
}

/// Canonical form of an address as seen by the engine.
///
/// Mapped IPv6 addresses collapse to their IPv4 form so both socket
/// families share the IPv4 tables.
pub fn canonical_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v4_from_mapped(&v6) {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

// ============================================================================
// Wire codec
// ============================================================================

/// Decode a destination port carried as a network-order u16 in a u32 field.
pub fn port_from_user(user_port: u32) -> u16 {
    u16::from_be(user_port as u16)
}

/// Encode a host-order port into the `user_port` representation.
pub fn port_to_user(port: u16) -> u32 {
    port.to_be() as u32
}

/// Decode a bound source port. Unlike `user_port` it is kept in host order.
pub fn port_from_src(src_port: u32) -> u16 {
    src_port as u16
}

/// Decode a network-order IPv4 word.
pub fn ipv4_from_user(user_ip4: u32) -> Ipv4Addr {
    Ipv4Addr::from(user_ip4.to_ne_bytes())
}

/// Encode an IPv4 address as a network-order word.
pub fn ipv4_to_user(addr: Ipv4Addr) -> u32 {
    u32::from_ne_bytes(addr.octets())
}

/// Decode four network-order words into an IPv6 address.
pub fn ipv6_from_user(user_ip6: [u32; 4]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    for (i, word) in user_ip6.iter().enumerate() {
        octets[i * 4..i * 4 + 4].copy_from_slice(&word.to_ne_bytes());
    }
    Ipv6Addr::from(octets)
}

/// Encode an IPv6 address as four network-order words.
pub fn ipv6_to_user(addr: Ipv6Addr) -> [u32; 4] {
    let o = addr.octets();
    let mut words = [0u32; 4];
    for (i, word) in words.iter_mut().enumerate() {
        *word = u32::from_ne_bytes([o[i * 4], o[i * 4 + 1], o[i * 4 + 2], o[i * 4 + 3]]);
    }
    words
}

/// Address family of a raw hook context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Inet,
    Inet6,
}

/// Destination fields of a socket-address hook, as the transport hands them over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSockAddr {
    pub family: Family,
    pub user_ip4: u32,
    pub user_ip6: [u32; 4],
    pub user_port: u32,
}

impl RawSockAddr {
    /// Encode a socket address.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self {
                family: Family::Inet,
                user_ip4: ipv4_to_user(*v4.ip()),
                user_ip6: [0; 4],
                user_port: port_to_user(v4.port()),
            },
            SocketAddr::V6(v6) => Self {
                family: Family::Inet6,
                user_ip4: 0,
                user_ip6: ipv6_to_user(*v6.ip()),
                user_port: port_to_user(v6.port()),
            },
        }
    }

    /// Decode into a socket address of the context's family.
    pub fn socket_addr(&self) -> SocketAddr {
        let port = port_from_user(self.user_port);
        match self.family {
            Family::Inet => SocketAddr::V4(SocketAddrV4::new(ipv4_from_user(self.user_ip4), port)),
            Family::Inet6 => {
                SocketAddr::V6(SocketAddrV6::new(ipv6_from_user(self.user_ip6), port, 0, 0))
            }
        }
    }

    pub fn set_v4(&mut self, addr: Ipv4Addr, port: u16) -> Result<(), NetworkError> {
        if self.family != Family::Inet {
            return Err(NetworkError::FamilyMismatch { expected: "inet" });
        }
        self.user_ip4 = ipv4_to_user(addr);
        self.user_port = port_to_user(port);
        Ok(())
    }

    pub fn set_v6(&mut self, addr: Ipv6Addr, port: u16) -> Result<(), NetworkError> {
        if self.family != Family::Inet6 {
            return Err(NetworkError::FamilyMismatch { expected: "inet6" });
        }
        self.user_ip6 = ipv6_to_user(addr);
        self.user_port = port_to_user(port);
        Ok(())
    }
}

/// Local fields of a bound socket, as seen after bind completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSock {
    pub family: Family,
    pub src_ip4: u32,
    pub src_ip6: [u32; 4],
    /// Host order.
    pub src_port: u32,
}

impl RawSock {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self {
                family: Family::Inet,
                src_ip4: ipv4_to_user(*v4.ip()),
                src_ip6: [0; 4],
                src_port: u32::from(v4.port()),
            },
            SocketAddr::V6(v6) => Self {
                family: Family::Inet6,
                src_ip4: 0,
                src_ip6: ipv6_to_user(*v6.ip()),
                src_port: u32::from(v6.port()),
            },
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        let port = port_from_src(self.src_port);
        match self.family {
            Family::Inet => SocketAddr::V4(SocketAddrV4::new(ipv4_from_user(self.src_ip4), port)),
            Family::Inet6 => {
                SocketAddr::V6(SocketAddrV6::new(ipv6_from_user(self.src_ip6), port, 0, 0))
            }
        }
    }
}

// ============================================================================
// Port ranges
// ============================================================================

/// Default lower bound of the node-exposed port range.
pub const NODEPORT_PORT_MIN: u16 = 30000;

/// Default upper bound of the node-exposed port range.
pub const NODEPORT_PORT_MAX: u16 = 32767;

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Result<Self, NetworkError> {
        if min > max {
            return Err(NetworkError::InvalidPortRange(format!("{}-{}", min, max)));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: NODEPORT_PORT_MIN,
            max: NODEPORT_PORT_MAX,
        }
    }
}

impl FromStr for PortRange {
    type Err = NetworkError;

    /// Parse `"min-max"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((min, max)) = s.trim().split_once('-') else {
            return Err(NetworkError::InvalidPortRange(format!("missing '-' in {}", s)));
        };

        let min = min
            .trim()
            .parse::<u16>()
            .map_err(|_| NetworkError::InvalidPortRange(s.to_string()))?;
        let max = max
            .trim()
            .parse::<u16>()
            .map_err(|_| NetworkError::InvalidPortRange(s.to_string()))?;

        Self::new(min, max)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}
