//! Session roles, the role-provider queries, and frame scheduling.
//!
//! Every peer owns one [`SessionContext`] describing who it is and who holds
//! authority. It is passed by reference into whatever needs role answers;
//! there is no global session state.

use std::collections::BTreeSet;

use keystone_net::PeerId;

use crate::replication::NetworkId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default frame rate of the per-peer update loop in Hz.
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Duration of a single frame at the default rate, in seconds.
pub const FRAME_DURATION_SECS: f64 = 1.0 / DEFAULT_FRAME_RATE as f64;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// What a peer is in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Authority that does not play.
    Host,
    /// Non-authoritative participant.
    Client,
    /// Authority that also plays locally.
    HostAndClient,
}

impl Role {
    /// Whether this role holds authority.
    pub fn is_authority(self) -> bool {
        matches!(self, Role::Host | Role::HostAndClient)
    }

    /// Whether this role controls a local player.
    pub fn plays(self) -> bool {
        matches!(self, Role::Client | Role::HostAndClient)
    }
}

/// Lifecycle of the session as seen from one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Normal operation.
    Active,
    /// The authority is gone. Nothing else happens on this peer.
    Ended,
}

// ---------------------------------------------------------------------------
// RoleProvider
// ---------------------------------------------------------------------------

/// Pure role queries every authority-aware behavior checks before mutating
/// shared state.
pub trait RoleProvider {
    /// Am I the authority for this session?
    fn is_authority(&self) -> bool;

    /// Am I the owner of `entity`? `false` for entities not live here.
    fn is_owner(&self, entity: NetworkId) -> bool;
}

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// Identity and membership view of one peer.
#[derive(Debug, Clone)]
pub struct SessionContext {
    local: PeerId,
    authority: PeerId,
    role: Role,
    /// Remote peers the authority replicates to. Clients only track the
    /// authority here.
    connected: BTreeSet<PeerId>,
    state: SessionState,
}

impl SessionContext {
    /// Context for the authority. `plays` selects [`Role::HostAndClient`].
    pub fn host(local: PeerId, plays: bool) -> Self {
        Self {
            local,
            authority: local,
            role: if plays { Role::HostAndClient } else { Role::Host },
            connected: BTreeSet::new(),
            state: SessionState::Active,
        }
    }

    /// Context for a client of `authority`.
    pub fn client(local: PeerId, authority: PeerId) -> Self {
        Self {
            local,
            authority,
            role: Role::Client,
            connected: BTreeSet::from([authority]),
            state: SessionState::Active,
        }
    }

    /// This peer.
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// The session authority.
    pub fn authority(&self) -> PeerId {
        self.authority
    }

    /// This peer's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether this peer holds authority.
    pub fn is_authority(&self) -> bool {
        self.role.is_authority()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is still running on this peer.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Record a connected remote peer. Returns `false` if already known or
    /// if `peer` is this peer.
    pub fn connect(&mut self, peer: PeerId) -> bool {
        peer != self.local && self.connected.insert(peer)
    }

    /// Forget a remote peer. Returns `false` if it was not connected.
    pub fn disconnect(&mut self, peer: PeerId) -> bool {
        self.connected.remove(&peer)
    }

    /// Whether `peer` is connected.
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.connected.contains(&peer)
    }

    /// Connected remote peers in id order.
    pub fn connected(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.connected.iter().copied()
    }

    /// Mark the session as over.
    pub fn end(&mut self) {
        self.state = SessionState::Ended;
    }
}

// ---------------------------------------------------------------------------
// FrameSchedule
// ---------------------------------------------------------------------------

/// Fixed-rate frame scheduler for a peer's update loop.
///
/// Accumulates real elapsed time and yields discrete frames at the configured
/// rate (default [`DEFAULT_FRAME_RATE`] Hz).
pub struct FrameSchedule {
    accumulator_secs: f64,
    frame_duration_secs: f64,
    total_frames: u64,
}

impl FrameSchedule {
    /// Creates a new schedule at the default rate.
    pub fn new() -> Self {
        Self::with_frame_rate(DEFAULT_FRAME_RATE)
    }

    /// Creates a schedule with a custom frame rate. A rate of zero is
    /// treated as one frame per second.
    pub fn with_frame_rate(hz: u32) -> Self {
        Self {
            accumulator_secs: 0.0,
            frame_duration_secs: 1.0 / hz.max(1) as f64,
            total_frames: 0,
        }
    }

    /// Accumulates elapsed time and returns the number of frames to run.
    pub fn accumulate(&mut self, dt_secs: f64) -> u32 {
        self.accumulator_secs += dt_secs;
        let mut frames = 0u32;
        while self.accumulator_secs >= self.frame_duration_secs {
            self.accumulator_secs -= self.frame_duration_secs;
            self.total_frames += 1;
            frames += 1;
        }
        frames
    }

    /// Total frames produced since creation.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Frame duration in seconds.
    pub fn frame_duration_secs(&self) -> f64 {
        self.frame_duration_secs
    }
}

impl Default for FrameSchedule {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
