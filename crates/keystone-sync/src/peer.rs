//! Per-frame update loop binding a [`Replicator`] to a [`Transport`].
//!
//! Each [`Peer::update`] drains the transport inbox (bounded by
//! [`PeerSettings::inbound_budget`]), decodes and queues what arrived,
//! processes the queue in arrival order, then serializes and sends the
//! outbox. Nothing blocks; datagrams that arrive mid-frame wait for the
//! next one.

use std::sync::Arc;

use keystone_net::{PeerId, Transport, TransportError, deserialize_message, serialize_message};

use crate::authority::RoleProvider;
use crate::protocol::Protocol;
use crate::replication::NetworkId;
use crate::replicator::Replicator;

/// Tunables of the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerSettings {
    /// Maximum datagrams taken from the transport per frame. 0 = unlimited.
    pub inbound_budget: usize,
}

/// Counters for one [`Peer::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Datagrams taken from the transport.
    pub received: usize,
    /// Queued requests applied.
    pub processed: usize,
    /// Messages handed to the transport.
    pub sent: usize,
}

impl FrameStats {
    /// Whether the frame did nothing at all.
    pub fn is_idle(&self) -> bool {
        self.received == 0 && self.processed == 0 && self.sent == 0
    }
}

/// A session participant: replication state plus its transport endpoint.
pub struct Peer<T: Transport> {
    replicator: Replicator,
    transport: T,
    settings: PeerSettings,
    frame: u64,
}

impl<T: Transport> Peer<T> {
    /// Wraps an existing replicator.
    pub fn new(replicator: Replicator, transport: T, settings: PeerSettings) -> Self {
        Self {
            replicator,
            transport,
            settings,
            frame: 0,
        }
    }

    /// The authority of a new session on `transport`.
    pub fn host(
        protocol: Arc<Protocol>,
        transport: T,
        plays: bool,
        settings: PeerSettings,
    ) -> Self {
        let local = transport.local_peer();
        Self::new(Replicator::host(protocol, local, plays), transport, settings)
    }

    /// A client of `authority` on `transport`.
    pub fn client(
        protocol: Arc<Protocol>,
        transport: T,
        authority: PeerId,
        settings: PeerSettings,
    ) -> Self {
        let local = transport.local_peer();
        Self::new(
            Replicator::client(protocol, local, authority),
            transport,
            settings,
        )
    }

    /// This peer's id.
    pub fn id(&self) -> PeerId {
        self.transport.local_peer()
    }

    /// Frames run so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The loop settings.
    pub fn settings(&self) -> PeerSettings {
        self.settings
    }

    /// Returns a reference to the replication state.
    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    /// Returns a mutable reference to the replication state.
    pub fn replicator_mut(&mut self) -> &mut Replicator {
        &mut self.replicator
    }

    /// Runs one frame. Does nothing once the session has ended.
    pub fn update(&mut self) -> FrameStats {
        let mut stats = FrameStats::default();
        if !self.replicator.session().is_active() {
            return stats;
        }
        self.frame += 1;

        while self.settings.inbound_budget == 0 || stats.received < self.settings.inbound_budget {
            let Some(datagram) = self.transport.try_recv() else {
                break;
            };
            stats.received += 1;
            match deserialize_message(&datagram.payload) {
                Ok(msg) => self.replicator.receive(datagram.from, msg),
                Err(err) => tracing::warn!("undecodable datagram from {}: {err}", datagram.from),
            }
        }

        stats.processed = self.replicator.process_pending();
        stats.sent = self.flush();
        if !stats.is_idle() {
            tracing::trace!(
                "{} frame {}: {} in, {} applied, {} out",
                self.id(),
                self.frame,
                stats.received,
                stats.processed,
                stats.sent
            );
        }
        stats
    }

    /// Serializes and sends everything in the outbox. Returns the number of
    /// messages the transport accepted. A destination the transport no
    /// longer knows is treated as disconnected.
    pub fn flush(&mut self) -> usize {
        let mut sent = 0;
        let mut lost = Vec::new();
        for (to, msg) in self.replicator.take_outbox() {
            if lost.contains(&to) {
                continue;
            }
            let payload = match serialize_message(&msg) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!("could not encode {} for {to}: {err}", msg.kind());
                    continue;
                }
            };
            match self.transport.send(to, payload) {
                Ok(()) => sent += 1,
                Err(TransportError::UnknownPeer(peer)) => {
                    tracing::debug!("{} to {peer} not sent, peer unreachable", msg.kind());
                    lost.push(peer);
                }
                Err(err) => tracing::debug!("{} to {to} not sent: {err}", msg.kind()),
            }
        }
        for peer in lost {
            self.replicator.disconnect_peer(peer);
        }
        sent
    }
}

impl<T: Transport> RoleProvider for Peer<T> {
    fn is_authority(&self) -> bool {
        self.replicator.is_authority()
    }

    fn is_owner(&self, entity: NetworkId) -> bool {
        self.replicator.is_owner(entity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
