//! Replicated entities and the per-peer world that indexes them.
//!
//! [`ReplicatedWorld`] wraps a Bevy [`World`] and maps every live
//! [`NetworkId`] to its local [`Entity`]. Despawned ids are remembered as
//! tombstones so that late or duplicate requests for them resolve to
//! [`DespawnOutcome::AlreadyTerminal`] instead of touching the world again.

use std::collections::{BTreeMap, HashSet};

use bevy_ecs::prelude::*;
use keystone_net::PeerId;
use serde::{Deserialize, Serialize};

use crate::replication::NetworkId;
use crate::template::{EntityTemplate, TemplateId};

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Lifecycle of a replicated entity. `Despawned` is terminal.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnState {
    /// Instantiated locally, not yet registered with the replication system.
    Unspawned,
    /// Registered and visible to peers.
    Spawned,
    /// Removed. Never leaves this state.
    Despawned,
}

/// Peer treated as the local controller of an entity.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub PeerId);

/// Spawn position in world units.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

impl Position {
    /// Builds a position.
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Replication capability. A template whose instances lack this marker
/// cannot become a replicated entity.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Replicated;

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// What happened to an entity, as seen by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// The entity became visible. Payload: postcard [`Position`].
    Spawned(TemplateId),
    /// The entity was removed. Payload: empty.
    Despawned,
    /// A readable variable took a new value. Payload: postcard value.
    VariableChanged(&'static str),
    /// Ownership moved. Payload: postcard [`PeerId`].
    OwnerChanged,
}

/// One `(entity, kind, payload)` event for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Entity the event is about.
    pub entity: NetworkId,
    /// Event kind.
    pub kind: NotificationKind,
    /// Kind-specific postcard bytes.
    pub payload: Vec<u8>,
}

/// Result of a despawn request. Only `Despawned` changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DespawnOutcome {
    /// The entity was live and is now removed.
    Despawned,
    /// The entity had already been despawned.
    AlreadyTerminal,
    /// The instance was never registered and was destroyed locally.
    DestroyedLocally,
    /// Not permitted here (non-authority caller or the session entity).
    Ignored,
    /// No such entity.
    Unknown,
}

// ---------------------------------------------------------------------------
// ReplicatedWorld
// ---------------------------------------------------------------------------

/// One peer's view of the shared entities.
pub struct ReplicatedWorld {
    world: World,
    session: Entity,
    index: BTreeMap<NetworkId, Entity>,
    tombstones: HashSet<NetworkId>,
    next_network_id: u64,
}

impl ReplicatedWorld {
    /// Creates a world holding only the session entity, owned by
    /// `authority`.
    pub fn new(authority: PeerId) -> Self {
        let mut world = World::new();
        let session = world
            .spawn((NetworkId::SESSION, Owner(authority), SpawnState::Spawned))
            .id();
        Self {
            world,
            session,
            index: BTreeMap::new(),
            tombstones: HashSet::new(),
            next_network_id: NetworkId::SESSION.0 + 1,
        }
    }

    /// Returns a reference to the inner ECS [`World`].
    pub fn world(&self) -> &World {
        &self.world
    }

    pub(crate) fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The session entity.
    pub fn session(&self) -> Entity {
        self.session
    }

    /// Instantiates `template` as an unspawned instance.
    pub fn instantiate(&mut self, template: &EntityTemplate) -> Entity {
        template.instantiate(&mut self.world)
    }

    /// Whether the instance carries the [`Replicated`] capability.
    pub fn is_replicable(&self, entity: Entity) -> bool {
        self.world.get::<Replicated>(entity).is_some()
    }

    /// Hands out the next network id. Ids are never reused.
    pub fn allocate_network_id(&mut self) -> NetworkId {
        let id = NetworkId(self.next_network_id);
        self.next_network_id += 1;
        id
    }

    /// Registers an unspawned instance under `id` and marks it spawned.
    /// Returns `false` if `id` is already live or tombstoned, or the
    /// instance no longer exists.
    pub fn register(
        &mut self,
        entity: Entity,
        id: NetworkId,
        owner: PeerId,
        position: Position,
    ) -> bool {
        if id == NetworkId::SESSION || self.index.contains_key(&id) || self.tombstones.contains(&id)
        {
            return false;
        }
        let Ok(mut entity_mut) = self.world.get_entity_mut(entity) else {
            return false;
        };
        entity_mut.insert((id, Owner(owner), position, SpawnState::Spawned));
        self.index.insert(id, entity);
        true
    }

    /// Local entity of a live id, including the session entity.
    pub fn entity(&self, id: NetworkId) -> Option<Entity> {
        if id == NetworkId::SESSION {
            return Some(self.session);
        }
        self.index.get(&id).copied()
    }

    /// Network id of a registered local entity.
    pub fn network_id_of(&self, entity: Entity) -> Option<NetworkId> {
        self.world.get::<NetworkId>(entity).copied()
    }

    /// Whether `id` is live on this peer.
    pub fn contains(&self, id: NetworkId) -> bool {
        self.entity(id).is_some()
    }

    /// Lifecycle state of `id`. Tombstoned ids report `Despawned`.
    pub fn spawn_state(&self, id: NetworkId) -> Option<SpawnState> {
        if self.tombstones.contains(&id) {
            return Some(SpawnState::Despawned);
        }
        self.component::<SpawnState>(id).copied()
    }

    /// Owner of a live entity.
    pub fn owner(&self, id: NetworkId) -> Option<PeerId> {
        self.component::<Owner>(id).map(|o| o.0)
    }

    /// Changes the owner of a live entity. Returns the previous owner.
    pub fn set_owner(&mut self, id: NetworkId, owner: PeerId) -> Option<PeerId> {
        let entity = self.entity(id)?;
        let mut current = self.world.get_mut::<Owner>(entity)?;
        Some(std::mem::replace(&mut current.0, owner))
    }

    /// Spawn position of a live entity.
    pub fn position(&self, id: NetworkId) -> Option<Position> {
        self.component::<Position>(id).copied()
    }

    /// Template a live entity was instantiated from.
    pub fn template(&self, id: NetworkId) -> Option<TemplateId> {
        self.component::<TemplateId>(id).copied()
    }

    /// Any component of a live entity.
    pub fn component<C: Component>(&self, id: NetworkId) -> Option<&C> {
        self.world.get::<C>(self.entity(id)?)
    }

    /// Removes a live entity and tombstones its id.
    pub fn remove(&mut self, id: NetworkId) -> DespawnOutcome {
        if id == NetworkId::SESSION {
            return DespawnOutcome::Ignored;
        }
        if self.tombstones.contains(&id) {
            return DespawnOutcome::AlreadyTerminal;
        }
        let Some(entity) = self.index.remove(&id) else {
            return DespawnOutcome::Unknown;
        };
        if let Some(mut state) = self.world.get_mut::<SpawnState>(entity) {
            *state = SpawnState::Despawned;
        }
        self.world.despawn(entity);
        self.tombstones.insert(id);
        DespawnOutcome::Despawned
    }

    /// Destroys an instance that never got registered. Returns `false` if it
    /// is already gone.
    pub fn destroy_instance(&mut self, entity: Entity) -> bool {
        entity != self.session && self.world.despawn(entity)
    }

    /// Live ids in allocation order, excluding the session entity.
    pub fn live_ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.index.keys().copied()
    }

    /// Live ids owned by `peer`.
    pub fn owned_by(&self, peer: PeerId) -> Vec<NetworkId> {
        self.live_ids()
            .filter(|&id| self.owner(id) == Some(peer))
            .collect()
    }

    /// Number of live entities, excluding the session entity.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no entity is live.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
