//! Authority-aware behaviors.
//!
//! Interaction events (overlaps, triggers) are observed on every peer, but
//! [`Replicator::interact`] only dispatches to an [`InteractionHandler`] on
//! the authority and only while the target is spawned. Everywhere else the
//! event is dropped and the peer waits for the authoritative outcome to
//! arrive through replication.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::authority::RoleProvider;
use crate::invocation::InvocationRegistry;
use crate::replication::NetworkId;
use crate::replicator::Replicator;
use crate::template::TemplateId;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Reaction of one template to an interaction. Only ever called on the
/// authority.
pub trait InteractionHandler: Send + Sync {
    /// `actor` interacted with `target`.
    fn on_interact(&self, replicator: &mut Replicator, target: NetworkId, actor: NetworkId);
}

impl<F> InteractionHandler for F
where
    F: Fn(&mut Replicator, NetworkId, NetworkId) + Send + Sync,
{
    fn on_interact(&self, replicator: &mut Replicator, target: NetworkId, actor: NetworkId) {
        self(replicator, target, actor);
    }
}

// ---------------------------------------------------------------------------
// Collectable
// ---------------------------------------------------------------------------

/// Side effect run before a collectable disappears: `(target, actor)`.
pub type AwardFn = fn(&mut Replicator, NetworkId, NetworkId);

/// Picked up on first contact: runs the award, then despawns the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct Collectable {
    award: Option<AwardFn>,
}

impl Collectable {
    /// A collectable with no award.
    pub fn new() -> Self {
        Self::default()
    }

    /// A collectable that runs `award` when collected.
    pub fn with_award(award: AwardFn) -> Self {
        Self { award: Some(award) }
    }
}

impl InteractionHandler for Collectable {
    fn on_interact(&self, replicator: &mut Replicator, target: NetworkId, actor: NetworkId) {
        if !replicator.is_authority() {
            return;
        }
        if let Some(award) = self.award {
            award(replicator, target, actor);
        }
        replicator.despawn(target);
    }
}

// ---------------------------------------------------------------------------
// InteractionRegistry
// ---------------------------------------------------------------------------

/// Template to interaction handler table.
#[derive(Clone, Default)]
pub struct InteractionRegistry {
    handlers: HashMap<TemplateId, Arc<dyn InteractionHandler>>,
}

impl InteractionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `handler` to every instance of `template`.
    pub fn register<H: InteractionHandler + 'static>(
        &mut self,
        template: TemplateId,
        handler: H,
    ) -> &mut Self {
        self.handlers.insert(template, Arc::new(handler));
        self
    }

    pub(crate) fn get(&self, template: TemplateId) -> Option<Arc<dyn InteractionHandler>> {
        self.handlers.get(&template).cloned()
    }
}

// ---------------------------------------------------------------------------
// Input relay
// ---------------------------------------------------------------------------

/// Registers `method` as an input relay: the authority stores the received
/// `T` in the target's `ReplicatedValue<T>`, from where it replicates to
/// every reader. Pair it with `require_ownership` so that only the owner's
/// input is accepted.
pub fn register_input_relay<T>(invocations: &mut InvocationRegistry, method: &'static str)
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    invocations.register::<T, _>(method, move |replicator, call, input| {
        if let Err(err) = replicator.write(call.target, input) {
            tracing::debug!("input relay `{method}` on {} dropped: {err}", call.target);
        }
    });
}
