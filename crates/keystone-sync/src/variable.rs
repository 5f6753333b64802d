//! Permission-scoped replicated values.
//!
//! A [`ReplicatedValue<T>`] is a component carrying one value plus the
//! `(read, write)` [`Permissions`] pair that every access is checked against.
//! Because it lives on its entity, despawning the entity destroys the value.

use bevy_ecs::prelude::*;
use keystone_net::PeerId;
use serde::{Deserialize, Serialize};

/// Who may read or write a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Every peer in the session.
    Everyone,
    /// Only the owning peer of the carrying entity.
    OwnerOnly,
    /// Only the session authority.
    AuthorityOnly,
}

impl Scope {
    /// Whether `peer` falls inside this scope.
    pub fn admits(self, peer: PeerId, owner: PeerId, authority: PeerId) -> bool {
        match self {
            Scope::Everyone => true,
            Scope::OwnerOnly => peer == owner,
            Scope::AuthorityOnly => peer == authority,
        }
    }
}

/// A `(read, write)` scope pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permissions {
    /// Peers that receive and may read the value.
    pub read: Scope,
    /// Peers allowed to change the value.
    pub write: Scope,
}

impl Permissions {
    /// Everyone reads, only the authority writes.
    pub const AUTHORITATIVE: Self = Self::new(Scope::Everyone, Scope::AuthorityOnly);

    /// Everyone reads, only the owner writes.
    pub const OWNER_DRIVEN: Self = Self::new(Scope::Everyone, Scope::OwnerOnly);

    /// Only the owner (and the authority) reads; only the authority writes.
    pub const PRIVATE: Self = Self::new(Scope::OwnerOnly, Scope::AuthorityOnly);

    /// Builds a permission pair.
    pub const fn new(read: Scope, write: Scope) -> Self {
        Self { read, write }
    }

    /// The authority holds the canonical copy of every variable, so it can
    /// always read.
    pub fn can_read(&self, peer: PeerId, owner: PeerId, authority: PeerId) -> bool {
        peer == authority || self.read.admits(peer, owner, authority)
    }

    /// Writes are admitted strictly by scope.
    pub fn can_write(&self, peer: PeerId, owner: PeerId, authority: PeerId) -> bool {
        self.write.admits(peer, owner, authority)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::AUTHORITATIVE
    }
}

/// One replicated value on an entity.
///
/// The raw value is only reachable through
/// [`Replicator::read`](crate::Replicator::read), which applies the read scope.
#[derive(Component, Debug, Clone)]
pub struct ReplicatedValue<T: Send + Sync + 'static> {
    value: T,
    permissions: Permissions,
    /// Authority write counter of the value currently held.
    sequence: u64,
}

impl<T: Send + Sync + 'static> ReplicatedValue<T> {
    /// A value at its default, never written by the authority.
    pub fn new(value: T, permissions: Permissions) -> Self {
        Self {
            value,
            permissions,
            sequence: 0,
        }
    }

    /// The permission pair.
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Sequence of the authority write that produced the held value.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn value(&self) -> &T {
        &self.value
    }

    /// Authority-side write. Returns the new sequence.
    pub(crate) fn commit(&mut self, value: T) -> u64 {
        self.value = value;
        self.sequence += 1;
        self.sequence
    }

    /// Apply a delivered value if it is newer than the held one.
    pub(crate) fn accept(&mut self, sequence: u64, value: T) -> bool {
        if sequence <= self.sequence {
            return false;
        }
        self.value = value;
        self.sequence = sequence;
        true
    }

    /// Overwrite from a spawn snapshot, whatever the held sequence.
    pub(crate) fn load(&mut self, sequence: u64, value: T) {
        self.value = value;
        self.sequence = sequence;
    }

    /// Optimistic local write on a non-authoritative writer. The sequence
    /// stays put so the next authoritative value still wins.
    pub(crate) fn set_local(&mut self, value: T) {
        self.value = value;
    }
}
