//! Entity templates: named builders that instantiate a game object in a
//! [`World`]. A template is replicable when its builder inserts the
//! [`Replicated`](crate::Replicated) marker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bevy_ecs::prelude::*;
use bevy_ecs::world::EntityWorldMut;
use serde::{Deserialize, Serialize};

use crate::entity::SpawnState;

/// Identifier of a registered template. Shared by every peer.
#[derive(
    Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct TemplateId(pub u32);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template:{}", self.0)
    }
}

type BuildFn = dyn Fn(&mut EntityWorldMut<'_>) + Send + Sync;

/// A registered template.
#[derive(Clone)]
pub struct EntityTemplate {
    id: TemplateId,
    name: &'static str,
    build: Arc<BuildFn>,
}

impl EntityTemplate {
    /// Template identifier.
    pub fn id(&self) -> TemplateId {
        self.id
    }

    /// Human-readable name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawns a fresh, [`SpawnState::Unspawned`] instance and runs the
    /// builder on it.
    pub fn instantiate(&self, world: &mut World) -> Entity {
        let mut entity = world.spawn((self.id, SpawnState::Unspawned));
        (self.build)(&mut entity);
        entity.id()
    }
}

impl fmt::Debug for EntityTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityTemplate")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Lookup table from [`TemplateId`] to [`EntityTemplate`].
#[derive(Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, EntityTemplate>,
}

impl TemplateRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template builder. A second registration under the same id
    /// replaces the first.
    pub fn register<F>(&mut self, id: TemplateId, name: &'static str, build: F) -> &mut Self
    where
        F: Fn(&mut EntityWorldMut<'_>) + Send + Sync + 'static,
    {
        let template = EntityTemplate {
            id,
            name,
            build: Arc::new(build),
        };
        if self.templates.insert(id, template).is_some() {
            tracing::warn!("{id} re-registered as `{name}`");
        }
        self
    }

    /// Resolves a template. `None` is the null template.
    pub fn get(&self, id: TemplateId) -> Option<&EntityTemplate> {
        self.templates.get(&id)
    }

    /// Number of registered templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no template is registered.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
