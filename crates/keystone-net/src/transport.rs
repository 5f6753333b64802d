//! Transport boundary and an in-process implementation.
//!
//! The replication layer only needs to hand encoded payloads to a peer and
//! poll for payloads addressed to itself. [`MemoryNetwork`] provides that
//! over unbounded [`tokio::sync::mpsc`] channels, one inbox per peer, which
//! gives FIFO delivery for every sender/receiver pair.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identifier of a session participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// An encoded payload together with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Peer that sent the payload.
    pub from: PeerId,
    /// Versioned message bytes.
    pub payload: Vec<u8>,
}

/// Errors returned by [`Transport::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No route to the destination peer.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    /// The local endpoint was disconnected from the network.
    #[error("{0} is disconnected")]
    Disconnected(PeerId),
}

/// Moves encoded payloads between peers. Delivery must be at-least-once and
/// ordered per sender/receiver pair; framing is the implementation's concern.
pub trait Transport {
    /// The peer this endpoint belongs to.
    fn local_peer(&self) -> PeerId;

    /// Queue `payload` for delivery to `to`. Never blocks.
    fn send(&self, to: PeerId, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Take the next received datagram, if any. Never blocks.
    fn try_recv(&mut self) -> Option<Datagram>;
}

// ---------------------------------------------------------------------------
// MemoryNetwork
// ---------------------------------------------------------------------------

/// Shared routing table for in-process peers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<DashMap<PeerId, mpsc::UnboundedSender<Datagram>>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` and return its endpoint. Registering the same id
    /// twice replaces the previous inbox.
    pub fn endpoint(&self, peer: PeerId) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.routes.insert(peer, tx).is_some() {
            tracing::warn!("{peer} re-registered, previous inbox dropped");
        }
        MemoryTransport {
            local: peer,
            network: self.clone(),
            inbox: rx,
        }
    }

    /// Sever `peer` in both directions. Returns `false` if it was not
    /// connected.
    pub fn disconnect(&self, peer: PeerId) -> bool {
        self.routes.remove(&peer).is_some()
    }

    /// Whether `peer` currently has a route.
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.routes.contains_key(&peer)
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.routes.len()
    }
}

/// One peer's endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    local: PeerId,
    network: MemoryNetwork,
    inbox: mpsc::UnboundedReceiver<Datagram>,
}

impl Transport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn send(&self, to: PeerId, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.network.is_connected(self.local) {
            return Err(TransportError::Disconnected(self.local));
        }
        let route = self
            .network
            .routes
            .get(&to)
            .ok_or(TransportError::UnknownPeer(to))?;
        route
            .send(Datagram {
                from: self.local,
                payload,
            })
            .map_err(|_| TransportError::UnknownPeer(to))
    }

    fn try_recv(&mut self) -> Option<Datagram> {
        self.inbox.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagrams_arrive_in_send_order() {
        let net = MemoryNetwork::new();
        let a = net.endpoint(PeerId(1));
        let mut b = net.endpoint(PeerId(2));

        for i in 0..5u8 {
            a.send(PeerId(2), vec![i]).unwrap();
        }

        let received: Vec<u8> = std::iter::from_fn(|| b.try_recv())
            .map(|d| {
                assert_eq!(d.from, PeerId(1));
                d.payload[0]
            })
            .collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_inbox_returns_none() {
        let net = MemoryNetwork::new();
        let mut a = net.endpoint(PeerId(1));
        assert!(a.try_recv().is_none());
    }

    #[test]
    fn test_send_to_unknown_peer_fails() {
        let net = MemoryNetwork::new();
        let a = net.endpoint(PeerId(1));
        assert_eq!(
            a.send(PeerId(9), vec![1]),
            Err(TransportError::UnknownPeer(PeerId(9)))
        );
    }

    #[test]
    fn test_disconnect_severs_both_directions() {
        let net = MemoryNetwork::new();
        let a = net.endpoint(PeerId(1));
        let b = net.endpoint(PeerId(2));
        assert_eq!(net.peer_count(), 2);

        assert!(net.disconnect(PeerId(2)));
        assert!(!net.disconnect(PeerId(2)));
        assert!(!net.is_connected(PeerId(2)));

        assert_eq!(
            a.send(PeerId(2), vec![1]),
            Err(TransportError::UnknownPeer(PeerId(2)))
        );
        assert_eq!(
            b.send(PeerId(1), vec![1]),
            Err(TransportError::Disconnected(PeerId(2)))
        );
    }

    #[test]
    fn test_peer_id_display() {
        assert_eq!(PeerId(4).to_string(), "peer#4");
    }
}
