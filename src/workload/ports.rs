//! Deterministic port allocation
//!
//! Each node class owns a window of the NodePort range and a cursor that
//! advances by one per node, shared across organizations. Windows never
//! overlap, so allocations are pairwise distinct for any spec that fits.

use crate::{Error, Result};

/// First orderer client port
pub const ORDERER_PORT_BASE: u16 = 30000;
/// First CA external port
pub const CA_PORT_BASE: u16 = 30500;
/// First peer client port
pub const PEER_PORT_BASE: u16 = 31000;
/// First peer operations port
pub const PEER_METRICS_PORT_BASE: u16 = 32000;
/// First orderer operations port
pub const ORDERER_METRICS_PORT_BASE: u16 = 32500;
/// One past the highest NodePort the default service range allows
pub const NODE_PORT_LIMIT: u16 = 32768;

/// Port window owned by a node class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortClass {
    /// Orderer client port
    Orderer,
    /// Orderer operations port
    OrdererMetrics,
    /// Peer client port
    Peer,
    /// Peer operations port
    PeerMetrics,
    /// CA external port
    Ca,
}

impl PortClass {
    const ALL: [PortClass; 5] = [
        PortClass::Orderer,
        PortClass::OrdererMetrics,
        PortClass::Peer,
        PortClass::PeerMetrics,
        PortClass::Ca,
    ];

    fn index(self) -> usize {
        match self {
            Self::Orderer => 0,
            Self::OrdererMetrics => 1,
            Self::Peer => 2,
            Self::PeerMetrics => 3,
            Self::Ca => 4,
        }
    }

    /// First port of the window
    pub fn base(self) -> u16 {
        match self {
            Self::Orderer => ORDERER_PORT_BASE,
            Self::OrdererMetrics => ORDERER_METRICS_PORT_BASE,
            Self::Peer => PEER_PORT_BASE,
            Self::PeerMetrics => PEER_METRICS_PORT_BASE,
            Self::Ca => CA_PORT_BASE,
        }
    }

    /// One past the last port of the window
    pub fn limit(self) -> u16 {
        match self {
            Self::Orderer => CA_PORT_BASE,
            Self::Ca => PEER_PORT_BASE,
            Self::Peer => PEER_METRICS_PORT_BASE,
            Self::PeerMetrics => ORDERER_METRICS_PORT_BASE,
            Self::OrdererMetrics => NODE_PORT_LIMIT,
        }
    }
}

/// Cursor per port class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortAllocator {
    next: [u16; 5],
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    /// All cursors at their base
    pub fn new() -> Self {
        let mut next = [0; 5];
        for class in PortClass::ALL {
            next[class.index()] = class.base();
        }
        Self { next }
    }

    /// Cursors for an extension: peer classes skip the `existing_peers`
    /// already allocated by the original deployment
    pub fn resuming_after(existing_peers: u32) -> Result<Self> {
        let mut alloc = Self::new();
        for class in [PortClass::Peer, PortClass::PeerMetrics] {
            let next = u32::from(class.base()) + existing_peers;
            if next > u32::from(class.limit()) {
                return Err(exhausted(class));
            }
            alloc.next[class.index()] = next as u16;
        }
        Ok(alloc)
    }

    /// Take the next port of `class`
    pub fn next(&mut self, class: PortClass) -> Result<u16> {
        let slot = &mut self.next[class.index()];
        if *slot >= class.limit() {
            return Err(exhausted(class));
        }
        let port = *slot;
        *slot += 1;
        Ok(port)
    }
}

fn exhausted(class: PortClass) -> Error {
    Error::validation(format!(
        "too many nodes for {:?} ports: window {}..{} is exhausted",
        class,
        class.base(),
        class.limit()
    ))
}
