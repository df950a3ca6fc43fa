//! Translation failure taxonomy.
//!
//! None of these are fatal to the connection. Each maps to the errno the
//! hook transport reports; most of them end in an untranslated passthrough.

use thiserror::Error;

/// Why a socket was not translated (or why a bind was rejected).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum XlateError {
    /// No service matches the destination.
    #[error("no matching service")]
    NotFound,

    /// The socket's protocol or address family is not enabled.
    #[error("protocol not enabled for socket translation")]
    NotSupported,

    /// A service matched but policy forbids translating this destination.
    #[error("translation not permitted for this destination")]
    PermissionDenied,

    /// The computed backend slot is empty.
    #[error("no backend at selected slot")]
    NoBackendSlot,

    /// The slot points at a backend record that does not exist.
    #[error("backend record missing")]
    NoBackend,

    /// The chosen backend is the caller's own listener.
    #[error("backend is bound in the caller's namespace")]
    LocalRedirectLoop,

    /// The reverse-NAT table rejected the write.
    #[error("reverse NAT entry write failed")]
    RevNatWriteFailed,

    /// The reverse-NAT entry refers to a service version that no longer exists.
    #[error("reverse NAT entry is stale")]
    Stale,

    /// Bind collides with an externally reachable service.
    #[error("address in use by an exposed service")]
    AddressInUse,

    /// The health-check table rejected the target registration.
    #[error("health-check registration failed")]
    HealthRegisterFailed,
}

impl XlateError {
    /// Errno reported to the hook transport.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound | Self::LocalRedirectLoop => libc::ENXIO,
            Self::NotSupported => libc::ENOTSUP,
            Self::PermissionDenied => libc::EPERM,
            Self::NoBackendSlot | Self::NoBackend | Self::Stale => libc::ENOENT,
            Self::RevNatWriteFailed | Self::HealthRegisterFailed => libc::ENOMEM,
            Self::AddressInUse => libc::EADDRINUSE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(XlateError::NotFound.errno(), libc::ENXIO);
        assert_eq!(XlateError::PermissionDenied.errno(), libc::EPERM);
        assert_eq!(XlateError::AddressInUse.errno(), libc::EADDRINUSE);
        assert_eq!(XlateError::Stale.errno(), libc::ENOENT);
        assert_eq!(XlateError::NoBackendSlot.errno(), libc::ENOENT);
        assert_eq!(XlateError::RevNatWriteFailed.errno(), libc::ENOMEM);
    }
}
