//! Fire-and-forget drop/failure counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic direction a reason is accounted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ingress,
    Egress,
}

/// Reason codes emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    NoBackendSlot,
    NoBackend,
    RevNatUpdate,
    RevNatStale,
}

impl Reason {
    const ALL: [Reason; 4] = [
        Reason::NoBackendSlot,
        Reason::NoBackend,
        Reason::RevNatUpdate,
        Reason::RevNatStale,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoBackendSlot => "lb_no_backend_slot",
            Self::NoBackend => "lb_no_backend",
            Self::RevNatUpdate => "lb_revnat_update",
            Self::RevNatStale => "lb_revnat_stale",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics sink. Must never block.
pub trait MetricsSink: Send + Sync {
    fn update(&self, direction: Direction, reason: Reason);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn update(&self, _direction: Direction, _reason: Reason) {}
}

/// Lock-free per-(direction, reason) counters.
#[derive(Debug, Default)]
pub struct LbMetrics {
    counters: [AtomicU64; 8],
}

impl LbMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(direction: Direction, reason: Reason) -> usize {
        let d = match direction {
            Direction::Ingress => 0,
            Direction::Egress => 1,
        };
        let r = match reason {
            Reason::NoBackendSlot => 0,
            Reason::NoBackend => 1,
            Reason::RevNatUpdate => 2,
            Reason::RevNatStale => 3,
        };
        d * 4 + r
    }

    pub fn count(&self, direction: Direction, reason: Reason) -> u64 {
        self.counters[Self::slot(direction, reason)].load(Ordering::Relaxed)
    }

    /// Nonzero counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut entries = Vec::new();
        for direction in [Direction::Ingress, Direction::Egress] {
            for reason in Reason::ALL {
                let count = self.count(direction, reason);
                if count > 0 {
                    entries.push((direction, reason, count));
                }
            }
        }
        MetricsSnapshot { entries }
    }
}

impl MetricsSink for LbMetrics {
    fn update(&self, direction: Direction, reason: Reason) {
        self.counters[Self::slot(direction, reason)].fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`LbMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub entries: Vec<(Direction, Reason, u64)>,
}

impl MetricsSnapshot {
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, _, n)| n).sum()
    }
}
