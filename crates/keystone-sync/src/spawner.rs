//! Authoritative factory for replicated entities.
//!
//! The selection stream is a seeded [`ChaCha8Rng`], so a fixed seed picks
//! the same templates on every run.

use keystone_net::PeerId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::authority::RoleProvider;
use crate::entity::Position;
use crate::error::ReplicationError;
use crate::replication::NetworkId;
use crate::replicator::Replicator;
use crate::template::TemplateId;

/// Spawns entities chosen uniformly at random from a template pool.
pub struct Spawner {
    pool: Vec<TemplateId>,
    rng: ChaCha8Rng,
}

impl Spawner {
    /// Creates a spawner over `pool` seeded with `seed`.
    pub fn new(pool: Vec<TemplateId>, seed: u64) -> Self {
        Self {
            pool,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// The configured pool.
    pub fn pool(&self) -> &[TemplateId] {
        &self.pool
    }

    /// Spawns one entity from the configured pool, owned by the authority.
    pub fn spawn(
        &mut self,
        replicator: &mut Replicator,
        position: Position,
    ) -> Result<Option<NetworkId>, ReplicationError> {
        let pool = std::mem::take(&mut self.pool);
        let result = self.spawn_from(replicator, position, &pool, None);
        self.pool = pool;
        result
    }

    /// Like [`spawn`](Self::spawn) but owned by `owner`.
    pub fn spawn_for(
        &mut self,
        replicator: &mut Replicator,
        position: Position,
        owner: PeerId,
    ) -> Result<Option<NetworkId>, ReplicationError> {
        let pool = std::mem::take(&mut self.pool);
        let result = self.spawn_from(replicator, position, &pool, Some(owner));
        self.pool = pool;
        result
    }

    /// Spawns one entity chosen from `pool`.
    ///
    /// On a non-authoritative peer this does nothing and returns `Ok(None)`.
    /// Precondition failures are logged here and returned; none of them
    /// leave an unregistered instance behind.
    pub fn spawn_from(
        &mut self,
        replicator: &mut Replicator,
        position: Position,
        pool: &[TemplateId],
        owner: Option<PeerId>,
    ) -> Result<Option<NetworkId>, ReplicationError> {
        if !replicator.is_authority() {
            tracing::trace!("spawn ignored on non-authoritative {}", replicator.local_peer());
            return Ok(None);
        }
        if pool.is_empty() {
            let err = ReplicationError::EmptyPool;
            tracing::warn!("spawn at ({}, {}) aborted: {err}", position.x, position.y);
            return Err(err);
        }

        let template = pool[self.rng.random_range(0..pool.len())];
        replicator
            .spawn(template, position, owner)
            .inspect_err(|err| tracing::warn!("spawn of {template} aborted: {err}"))
    }
}
