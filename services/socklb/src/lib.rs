//! Socket-level service load balancer.
//!
//! Translates service addresses to backend addresses at socket-call time
//! and answers peer queries with the service address.

pub mod clock;
pub mod config;
pub mod control;
pub mod ipcache;
pub mod lb;
pub mod maps;
pub mod metrics;
pub mod persistence;
pub mod replay;
pub mod sockets;

pub use config::{Config, LbConfig};
pub use lb::{
    Action, Backend, BackendId, Hook, ServiceFlags, ServiceKey, ServiceRecord, SockAddr, SockCtx,
    SockLb, Translation, Verdict, XlateError,
};
pub use maps::{FamilyMaps, KvMap, LbMaps, MapError};
