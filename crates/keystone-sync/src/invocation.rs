//! Remote invocation: named methods that execute only on the authority.

use std::collections::HashMap;
use std::sync::Arc;

use keystone_net::PeerId;
use serde::de::DeserializeOwned;

use crate::replication::NetworkId;
use crate::replicator::Replicator;

/// Context of one invocation being executed on the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Peer that issued the call.
    pub caller: PeerId,
    /// Target entity.
    pub target: NetworkId,
    /// Method name.
    pub method: String,
    /// Whether the caller had to own the target.
    pub require_ownership: bool,
}

type ErasedHandler =
    dyn Fn(&mut Replicator, &Invocation, &[u8]) -> Result<(), postcard::Error> + Send + Sync;

/// Method name to handler table. Registered identically on every peer;
/// only the authority ever runs a handler.
#[derive(Clone, Default)]
pub struct InvocationRegistry {
    handlers: HashMap<&'static str, Arc<ErasedHandler>>,
}

impl InvocationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `method`, decoding its arguments as `A`.
    pub fn register<A, F>(&mut self, method: &'static str, handler: F) -> &mut Self
    where
        A: DeserializeOwned + 'static,
        F: Fn(&mut Replicator, &Invocation, A) + Send + Sync + 'static,
    {
        let erased: Arc<ErasedHandler> = Arc::new(
            move |replicator: &mut Replicator,
                  call: &Invocation,
                  bytes: &[u8]|
                  -> Result<(), postcard::Error> {
                let args = postcard::from_bytes::<A>(bytes)?;
                handler(replicator, call, args);
                Ok(())
            },
        );
        if self.handlers.insert(method, erased).is_some() {
            tracing::warn!("invocation method `{method}` re-registered");
        }
        self
    }

    /// Whether `method` is registered.
    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub(crate) fn get(&self, method: &str) -> Option<Arc<ErasedHandler>> {
        self.handlers.get(method).cloned()
    }
}
