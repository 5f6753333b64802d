//! Network identity and the type-erased codec table for replicated variables.
//!
//! The authority assigns a [`NetworkId`] to every replicated entity. Peers
//! reference entities exclusively by `NetworkId`. Variable types are
//! registered once in a [`ReplicationSet`]; each registration produces a
//! [`VariableDescriptor`] whose function pointers move a
//! [`ReplicatedValue<T>`] in and out of a Bevy [`World`] as postcard bytes.

use std::any::{TypeId, type_name};
use std::fmt;

use bevy_ecs::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::variable::{Permissions, ReplicatedValue};

// ---------------------------------------------------------------------------
// NetworkId
// ---------------------------------------------------------------------------

/// Unique network identifier for a replicated entity. Allocated by the
/// authority from a monotonically increasing counter and never reused.
#[derive(
    Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct NetworkId(pub u64);

impl NetworkId {
    /// The session entity that carries free-standing variables. Present and
    /// spawned on every peer from the start; never despawned.
    pub const SESSION: NetworkId = NetworkId(0);
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// VariableDescriptor
// ---------------------------------------------------------------------------

/// Type-erased access to one registered [`ReplicatedValue<T>`] type.
#[derive(Clone, Copy)]
pub struct VariableDescriptor {
    /// Rust [`TypeId`] of `T`.
    pub type_id: TypeId,
    /// Stable tag used on the wire.
    pub tag: &'static str,
    /// Permission pair of the variable on `entity`, if present.
    pub permissions: fn(&World, Entity) -> Option<Permissions>,
    /// Current `(sequence, bytes)` of the variable on `entity`.
    pub serializer: fn(&World, Entity) -> Option<(u64, Vec<u8>)>,
    /// Unconditionally load a snapshot value. `false` if absent or malformed.
    pub loader: fn(&mut World, Entity, u64, &[u8]) -> bool,
    /// Apply a delivered value if newer. `false` if dropped.
    pub applier: fn(&mut World, Entity, u64, &[u8]) -> bool,
    /// Authority-side commit of a remote write. Returns the new sequence.
    pub committer: fn(&mut World, Entity, &[u8]) -> Option<u64>,
}

impl fmt::Debug for VariableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableDescriptor")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ReplicationSet
// ---------------------------------------------------------------------------

/// Defines which variable types replicate. Types are registered at startup
/// and must be registered identically on every peer.
#[derive(Clone, Default)]
pub struct ReplicationSet {
    descriptors: Vec<VariableDescriptor>,
}

impl ReplicationSet {
    /// Creates an empty replication set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `ReplicatedValue<T>` under `tag`. Registering a tag twice
    /// replaces the earlier entry.
    pub fn register<T>(&mut self, tag: &'static str)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let descriptor = VariableDescriptor {
            type_id: TypeId::of::<T>(),
            tag,
            permissions: |world, entity| {
                world
                    .get::<ReplicatedValue<T>>(entity)
                    .map(|v| v.permissions())
            },
            serializer: |world, entity| {
                let var = world.get::<ReplicatedValue<T>>(entity)?;
                postcard::to_allocvec(var.value())
                    .ok()
                    .map(|bytes| (var.sequence(), bytes))
            },
            loader: |world, entity, sequence, bytes| {
                let Ok(value) = postcard::from_bytes::<T>(bytes) else {
                    return false;
                };
                match world.get_mut::<ReplicatedValue<T>>(entity) {
                    Some(mut var) => {
                        var.load(sequence, value);
                        true
                    }
                    None => false,
                }
            },
            applier: |world, entity, sequence, bytes| {
                let Ok(value) = postcard::from_bytes::<T>(bytes) else {
                    return false;
                };
                world
                    .get_mut::<ReplicatedValue<T>>(entity)
                    .is_some_and(|mut var| var.accept(sequence, value))
            },
            committer: |world, entity, bytes| {
                let value = postcard::from_bytes::<T>(bytes).ok()?;
                let mut var = world.get_mut::<ReplicatedValue<T>>(entity)?;
                Some(var.commit(value))
            },
        };

        if let Some(existing) = self.descriptors.iter_mut().find(|d| d.tag == tag) {
            tracing::warn!("variable tag `{tag}` re-registered as {}", type_name::<T>());
            *existing = descriptor;
        } else {
            self.descriptors.push(descriptor);
        }
    }

    /// Returns the registered descriptors.
    pub fn descriptors(&self) -> &[VariableDescriptor] {
        &self.descriptors
    }

    /// Looks up a descriptor by wire tag.
    pub fn by_tag(&self, tag: &str) -> Option<&VariableDescriptor> {
        self.descriptors.iter().find(|d| d.tag == tag)
    }

    /// Looks up the descriptor registered for `T`.
    pub fn by_type<T: 'static>(&self) -> Option<&VariableDescriptor> {
        let id = TypeId::of::<T>();
        self.descriptors.iter().find(|d| d.type_id == id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
