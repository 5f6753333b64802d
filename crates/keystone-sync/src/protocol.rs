//! The registries every peer of a session must agree on.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::behavior::{InteractionHandler, InteractionRegistry};
use crate::invocation::{Invocation, InvocationRegistry};
use crate::replication::ReplicationSet;
use crate::replicator::Replicator;
use crate::template::{TemplateId, TemplateRegistry};

/// Templates, variable types, invocation methods and interaction behaviors.
/// Built once at startup and shared by every peer as `Arc<Protocol>`.
#[derive(Clone, Default)]
pub struct Protocol {
    /// Entity templates by id.
    pub templates: TemplateRegistry,
    /// Replicated variable codecs by tag.
    pub variables: ReplicationSet,
    /// Remote invocation handlers by method name.
    pub invocations: InvocationRegistry,
    /// Interaction behaviors by template.
    pub interactions: InteractionRegistry,
}

impl Protocol {
    /// Creates an empty protocol.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a replicated variable type under `tag`.
    pub fn variable<T>(&mut self, tag: &'static str) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.variables.register::<T>(tag);
        self
    }

    /// Registers an invocation method.
    pub fn method<A, F>(&mut self, name: &'static str, handler: F) -> &mut Self
    where
        A: DeserializeOwned + 'static,
        F: Fn(&mut Replicator, &Invocation, A) + Send + Sync + 'static,
    {
        self.invocations.register::<A, F>(name, handler);
        self
    }

    /// Attaches an interaction behavior to a template.
    pub fn interaction<H: InteractionHandler + 'static>(
        &mut self,
        template: TemplateId,
        handler: H,
    ) -> &mut Self {
        self.interactions.register(template, handler);
        self
    }

    /// Freezes the protocol for sharing between peers.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}
