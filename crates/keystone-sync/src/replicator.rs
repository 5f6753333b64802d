//! The replication engine of one peer.
//!
//! A [`Replicator`] owns the peer's [`SessionContext`] and
//! [`ReplicatedWorld`]. Local operations (spawn, despawn, write, invoke)
//! are checked against the role and permission model and turn into
//! outgoing [`Message`]s; incoming messages are queued and applied in
//! arrival order by [`Replicator::process_pending`]. Transport is not its
//! concern: [`Peer`](crate::Peer) moves the outbox onto the wire.
//!
//! Rejections decided on behalf of a remote peer (writes outside scope,
//! invocations by non-owners, requests for despawned entities) are absorbed
//! here with a `debug` log and never reported back.

use std::any::type_name;
use std::collections::VecDeque;
use std::sync::Arc;

use bevy_ecs::prelude::*;
use keystone_net::{
    Despawn, Invoke, Message, OwnerChanged, PeerId, Spawn, VariableUpdate, VariableValue,
    VariableWrite,
};
use serde::Serialize;

use crate::authority::{RoleProvider, SessionContext};
use crate::entity::{
    DespawnOutcome, Notification, NotificationKind, Position, ReplicatedWorld, SpawnState,
};
use crate::error::ReplicationError;
use crate::invocation::Invocation;
use crate::protocol::Protocol;
use crate::replication::NetworkId;
use crate::template::TemplateId;
use crate::variable::{Permissions, ReplicatedValue, Scope};

/// Replication state and rules of one peer.
pub struct Replicator {
    protocol: Arc<Protocol>,
    session: SessionContext,
    entities: ReplicatedWorld,
    /// Received or locally issued requests, in arrival order.
    pending: VecDeque<(PeerId, Message)>,
    outbox: Vec<(PeerId, Message)>,
    notifications: Vec<Notification>,
}

impl Replicator {
    /// Creates a replicator for an explicit session context.
    pub fn new(protocol: Arc<Protocol>, session: SessionContext) -> Self {
        let entities = ReplicatedWorld::new(session.authority());
        Self {
            protocol,
            session,
            entities,
            pending: VecDeque::new(),
            outbox: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Replicator for the session authority.
    pub fn host(protocol: Arc<Protocol>, local: PeerId, plays: bool) -> Self {
        Self::new(protocol, SessionContext::host(local, plays))
    }

    /// Replicator for a client of `authority`.
    pub fn client(protocol: Arc<Protocol>, local: PeerId, authority: PeerId) -> Self {
        Self::new(protocol, SessionContext::client(local, authority))
    }

    /// The session context.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// This peer.
    pub fn local_peer(&self) -> PeerId {
        self.session.local()
    }

    /// The shared registries.
    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    /// This peer's view of the replicated entities.
    pub fn entities(&self) -> &ReplicatedWorld {
        &self.entities
    }

    /// Number of queued requests not yet processed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn owner_of(&self, id: NetworkId) -> PeerId {
        self.entities
            .owner(id)
            .unwrap_or_else(|| self.session.authority())
    }

    fn notify(&mut self, entity: NetworkId, kind: NotificationKind, payload: Vec<u8>) {
        self.notifications.push(Notification {
            entity,
            kind,
            payload,
        });
    }

    // -----------------------------------------------------------------------
    // Entity lifecycle
    // -----------------------------------------------------------------------

    /// Instantiates `template`, registers it and announces it to every
    /// connected peer.
    ///
    /// Returns `Ok(None)` without doing anything on a non-authoritative peer.
    /// A template whose instance is not replicable is destroyed before the
    /// error is returned.
    pub fn spawn(
        &mut self,
        template: TemplateId,
        position: Position,
        owner: Option<PeerId>,
    ) -> Result<Option<NetworkId>, ReplicationError> {
        if !self.is_authority() {
            tracing::trace!("spawn of {template} ignored on {}", self.local_peer());
            return Ok(None);
        }

        let protocol = Arc::clone(&self.protocol);
        let resolved = protocol
            .templates
            .get(template)
            .ok_or(ReplicationError::NullTemplate(template))?;
        let entity = self.entities.instantiate(resolved);
        if !self.entities.is_replicable(entity) {
            let outcome = self.destroy_instance(entity);
            tracing::trace!("unreplicable `{}` instance: {outcome:?}", resolved.name());
            return Err(ReplicationError::NotReplicable(template));
        }

        let id = self.entities.allocate_network_id();
        let owner = owner.unwrap_or_else(|| self.local_peer());
        if !self.entities.register(entity, id, owner, position) {
            self.entities.destroy_instance(entity);
            return Err(ReplicationError::UnknownEntity(id));
        }

        let payload = postcard::to_allocvec(&position).unwrap_or_default();
        self.notify(id, NotificationKind::Spawned(template), payload);
        let peers: Vec<PeerId> = self.session.connected().collect();
        for peer in peers {
            if let Some(msg) = self.spawn_message(id, peer) {
                self.outbox.push((peer, msg));
            }
        }

        tracing::debug!(
            "spawned {id} from `{}` for {owner} at ({}, {})",
            resolved.name(),
            position.x,
            position.y
        );
        Ok(Some(id))
    }

    /// Spawn announcement of `id` with the variables `recipient` may read.
    fn spawn_message(&self, id: NetworkId, recipient: PeerId) -> Option<Message> {
        let entity = self.entities.entity(id)?;
        let owner = self.owner_of(id);
        let authority = self.session.authority();
        let world = self.entities.world();

        let variables = self
            .protocol
            .variables
            .descriptors()
            .iter()
            .filter(|desc| {
                (desc.permissions)(world, entity)
                    .is_some_and(|perms| perms.can_read(recipient, owner, authority))
            })
            .filter_map(|desc| {
                let (sequence, value) = (desc.serializer)(world, entity)?;
                Some(VariableValue {
                    tag: desc.tag.to_string(),
                    sequence,
                    value,
                })
            })
            .collect();

        let position = self.entities.position(id).unwrap_or_default();
        Some(Message::Spawn(Spawn {
            entity_id: id.0,
            template: self.entities.template(id)?.0,
            owner,
            position: [position.x, position.y],
            variables,
        }))
    }

    /// Removes a live entity everywhere. Repeated calls are no-ops that
    /// report [`DespawnOutcome::AlreadyTerminal`]; non-authoritative callers
    /// get [`DespawnOutcome::Ignored`].
    pub fn despawn(&mut self, id: NetworkId) -> DespawnOutcome {
        if !self.is_authority() {
            tracing::trace!("despawn of {id} ignored on {}", self.local_peer());
            return DespawnOutcome::Ignored;
        }

        let outcome = self.entities.remove(id);
        match outcome {
            DespawnOutcome::Despawned => {
                self.notify(id, NotificationKind::Despawned, Vec::new());
                let peers: Vec<PeerId> = self.session.connected().collect();
                for peer in peers {
                    self.outbox
                        .push((peer, Message::Despawn(Despawn { entity_id: id.0 })));
                }
                tracing::debug!("despawned {id}");
            }
            other => tracing::trace!("despawn of {id}: {other:?}"),
        }
        outcome
    }

    /// Destroys a local instance. A registered instance goes through
    /// [`despawn`](Self::despawn); an instance that never got registered is
    /// destroyed locally without any error.
    pub fn destroy_instance(&mut self, entity: Entity) -> DespawnOutcome {
        if let Some(id) = self.entities.network_id_of(entity)
            && self.entities.entity(id) == Some(entity)
        {
            return self.despawn(id);
        }
        if self.entities.destroy_instance(entity) {
            DespawnOutcome::DestroyedLocally
        } else {
            DespawnOutcome::Unknown
        }
    }

    /// Hands ownership of a live entity to `owner`.
    ///
    /// Returns `Ok(false)` if nothing changed, including on a
    /// non-authoritative peer.
    pub fn set_owner(&mut self, id: NetworkId, owner: PeerId) -> Result<bool, ReplicationError> {
        if !self.is_authority() || id == NetworkId::SESSION {
            return Ok(false);
        }
        let previous = self
            .entities
            .set_owner(id, owner)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        if previous == owner {
            return Ok(false);
        }

        self.notify(
            id,
            NotificationKind::OwnerChanged,
            postcard::to_allocvec(&owner)?,
        );
        let peers: Vec<PeerId> = self.session.connected().collect();
        for &peer in &peers {
            self.outbox.push((
                peer,
                Message::OwnerChanged(OwnerChanged {
                    entity_id: id.0,
                    owner,
                }),
            ));
        }

        // The new owner never received owner-scoped variables.
        if peers.contains(&owner)
            && let Some(entity) = self.entities.entity(id)
        {
            let world = self.entities.world();
            for desc in self.protocol.variables.descriptors() {
                let owner_scoped = (desc.permissions)(world, entity)
                    .is_some_and(|perms| perms.read == Scope::OwnerOnly);
                if !owner_scoped {
                    continue;
                }
                if let Some((sequence, value)) = (desc.serializer)(world, entity) {
                    self.outbox.push((
                        owner,
                        Message::VariableUpdate(VariableUpdate {
                            entity_id: id.0,
                            tag: desc.tag.to_string(),
                            sequence,
                            value,
                        }),
                    ));
                }
            }
        }

        tracing::debug!("{id} owner {previous} -> {owner}");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Attaches a session-scoped variable to the session entity. Every peer
    /// must add the same session variables.
    pub fn add_session_variable<T>(
        &mut self,
        value: T,
        permissions: Permissions,
    ) -> Result<(), ReplicationError>
    where
        T: Send + Sync + 'static,
    {
        if self.protocol.variables.by_type::<T>().is_none() {
            return Err(ReplicationError::UnregisteredVariable(type_name::<T>()));
        }
        let session = self.entities.session();
        if let Ok(mut entity) = self.entities.world_mut().get_entity_mut(session) {
            entity.insert(ReplicatedValue::new(value, permissions));
        }
        Ok(())
    }

    /// Writes a variable on `id`.
    ///
    /// The caller must be inside the variable's write scope, otherwise
    /// [`ReplicationError::PermissionViolation`] is returned and nothing
    /// changes. On the authority the write is committed and queued for
    /// every reader. Elsewhere it is applied optimistically and forwarded
    /// to the authority, which re-checks it and replicates the result.
    pub fn write<T>(&mut self, id: NetworkId, value: T) -> Result<(), ReplicationError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let desc = *self
            .protocol
            .variables
            .by_type::<T>()
            .ok_or(ReplicationError::UnregisteredVariable(type_name::<T>()))?;
        let entity = self
            .entities
            .entity(id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        let missing = || ReplicationError::MissingVariable {
            entity: id,
            variable: desc.tag,
        };
        let permissions = self
            .entities
            .world()
            .get::<ReplicatedValue<T>>(entity)
            .map(ReplicatedValue::permissions)
            .ok_or_else(missing)?;

        let local = self.local_peer();
        let authority = self.session.authority();
        let owner = self.owner_of(id);
        if !permissions.can_write(local, owner, authority) {
            tracing::debug!("{local} may not write `{}` on {id}", desc.tag);
            return Err(ReplicationError::PermissionViolation {
                entity: id,
                variable: desc.tag,
            });
        }

        let bytes = postcard::to_allocvec(&value)?;
        let authoritative = self.session.is_authority();
        let committed = {
            let mut var = self
                .entities
                .world_mut()
                .get_mut::<ReplicatedValue<T>>(entity)
                .ok_or_else(missing)?;
            if authoritative {
                Some(var.commit(value))
            } else {
                var.set_local(value);
                None
            }
        };

        if let Some(sequence) = committed {
            self.notify(id, NotificationKind::VariableChanged(desc.tag), bytes.clone());
            self.broadcast_update(id, desc.tag, permissions, owner, sequence, bytes);
        } else {
            if permissions.can_read(local, owner, authority) {
                self.notify(id, NotificationKind::VariableChanged(desc.tag), bytes.clone());
            }
            self.outbox.push((
                authority,
                Message::VariableWrite(VariableWrite {
                    entity_id: id.0,
                    tag: desc.tag.to_string(),
                    value: bytes,
                }),
            ));
        }
        Ok(())
    }

    /// Reads a variable on `id`. `None` if the entity or variable is absent
    /// here or this peer is outside the read scope.
    pub fn read<T>(&self, id: NetworkId) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        let entity = self.entities.entity(id)?;
        let var = self.entities.world().get::<ReplicatedValue<T>>(entity)?;
        var.permissions()
            .can_read(self.local_peer(), self.owner_of(id), self.session.authority())
            .then(|| var.value())
    }

    fn broadcast_update(
        &mut self,
        id: NetworkId,
        tag: &'static str,
        permissions: Permissions,
        owner: PeerId,
        sequence: u64,
        value: Vec<u8>,
    ) {
        let authority = self.session.authority();
        for peer in self.session.connected() {
            if !permissions.can_read(peer, owner, authority) {
                continue;
            }
            self.outbox.push((
                peer,
                Message::VariableUpdate(VariableUpdate {
                    entity_id: id.0,
                    tag: tag.to_string(),
                    sequence,
                    value: value.clone(),
                }),
            ));
        }
    }

    // -----------------------------------------------------------------------
    // Invocation and interaction
    // -----------------------------------------------------------------------

    /// Requests that `method` run on the authority against `target`.
    ///
    /// Fire-and-forget: the call is queued (locally on the authority,
    /// otherwise sent to it) and may be rejected without notice. Only
    /// argument encoding can fail here.
    pub fn invoke<A: Serialize>(
        &mut self,
        target: NetworkId,
        method: &str,
        args: &A,
        require_ownership: bool,
    ) -> Result<(), ReplicationError> {
        if !self.session.is_active() {
            return Ok(());
        }
        let msg = Message::Invoke(Invoke {
            entity_id: target.0,
            method: method.to_string(),
            args: postcard::to_allocvec(args)?,
            require_ownership,
        });
        if self.session.is_authority() {
            self.pending.push_back((self.local_peer(), msg));
        } else {
            self.outbox.push((self.session.authority(), msg));
        }
        Ok(())
    }

    /// Reports that `actor` touched `target`. Dispatches to the target
    /// template's interaction behavior on the authority while the target is
    /// spawned; everywhere else this is a no-op. Returns whether a handler
    /// ran.
    pub fn interact(&mut self, target: NetworkId, actor: NetworkId) -> bool {
        if !self.is_authority() {
            return false;
        }
        if self.entities.spawn_state(target) != Some(SpawnState::Spawned) {
            tracing::trace!("interaction with {target} ignored, not spawned");
            return false;
        }
        let Some(template) = self.entities.template(target) else {
            return false;
        };
        let Some(handler) = self.protocol.interactions.get(template) else {
            return false;
        };
        handler.on_interact(self, target, actor);
        true
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Admits `peer` on the authority and queues its late-join snapshot: a
    /// spawn for every live entity and the readable session variables.
    pub fn connect_peer(&mut self, peer: PeerId) -> bool {
        if !self.session.is_authority() || !self.session.connect(peer) {
            return false;
        }

        let ids: Vec<NetworkId> = self.entities.live_ids().collect();
        for id in ids {
            if let Some(msg) = self.spawn_message(id, peer) {
                self.outbox.push((peer, msg));
            }
        }

        let session = self.entities.session();
        let authority = self.session.authority();
        let world = self.entities.world();
        for desc in self.protocol.variables.descriptors() {
            let readable = (desc.permissions)(world, session)
                .is_some_and(|perms| perms.can_read(peer, authority, authority));
            if !readable {
                continue;
            }
            if let Some((sequence, value)) = (desc.serializer)(world, session) {
                self.outbox.push((
                    peer,
                    Message::VariableUpdate(VariableUpdate {
                        entity_id: NetworkId::SESSION.0,
                        tag: desc.tag.to_string(),
                        sequence,
                        value,
                    }),
                ));
            }
        }

        tracing::info!("{peer} joined, {} entities in snapshot", self.entities.len());
        true
    }

    /// Handles the loss of `peer`.
    ///
    /// On the authority the peer's queued requests are dropped and its
    /// entities return to the authority. On a client, losing the authority
    /// ends the session.
    pub fn disconnect_peer(&mut self, peer: PeerId) -> bool {
        if self.session.is_authority() {
            if !self.session.disconnect(peer) {
                return false;
            }
            let before = self.pending.len();
            self.pending.retain(|(from, _)| *from != peer);
            let dropped = before - self.pending.len();

            let local = self.local_peer();
            for id in self.entities.owned_by(peer) {
                if let Err(err) = self.set_owner(id, local) {
                    tracing::debug!("could not reclaim {id}: {err}");
                }
            }
            tracing::info!("{peer} left, {dropped} pending requests dropped");
            return true;
        }

        if peer != self.session.authority() || !self.session.is_active() {
            return false;
        }
        self.session.end();
        self.pending.clear();
        self.outbox.clear();
        tracing::warn!("authority {peer} lost, session ended");
        true
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Queues a message received from `from`. Messages that flow in the
    /// wrong direction or come from unknown peers are dropped.
    pub fn receive(&mut self, from: PeerId, msg: Message) {
        if !self.session.is_active() {
            return;
        }
        if self.session.is_authority() {
            if msg.is_authoritative() {
                tracing::warn!("dropped {} from non-authoritative {from}", msg.kind());
                return;
            }
            if !self.session.is_connected(from) {
                tracing::debug!("dropped {} from unconnected {from}", msg.kind());
                return;
            }
        } else if !msg.is_authoritative() || from != self.session.authority() {
            tracing::warn!("dropped unexpected {} from {from}", msg.kind());
            return;
        }
        self.pending.push_back((from, msg));
    }

    /// Applies the requests queued when the call starts, one at a time in
    /// arrival order. Requests queued while processing wait for the next
    /// call. Returns the number processed.
    pub fn process_pending(&mut self) -> usize {
        let count = self.pending.len();
        for _ in 0..count {
            let Some((from, msg)) = self.pending.pop_front() else {
                break;
            };
            self.apply(from, msg);
        }
        count
    }

    fn apply(&mut self, from: PeerId, msg: Message) {
        match msg {
            Message::Spawn(spawn) => self.apply_spawn(spawn),
            Message::Despawn(despawn) => self.apply_despawn(despawn),
            Message::VariableUpdate(update) => self.apply_update(update),
            Message::OwnerChanged(change) => self.apply_owner_changed(change),
            Message::VariableWrite(write) => self.execute_write(from, write),
            Message::Invoke(invoke) => self.execute_invoke(from, invoke),
        }
    }

    fn apply_spawn(&mut self, spawn: Spawn) {
        let id = NetworkId(spawn.entity_id);
        let template = TemplateId(spawn.template);
        if self.entities.spawn_state(id).is_some() {
            tracing::trace!("duplicate spawn of {id} dropped");
            return;
        }
        let protocol = Arc::clone(&self.protocol);
        let Some(resolved) = protocol.templates.get(template) else {
            tracing::warn!("spawn of {id} references unknown {template}");
            return;
        };

        let entity = self.entities.instantiate(resolved);
        let [x, y] = spawn.position;
        let position = Position::new(x, y);
        if !self.entities.register(entity, id, spawn.owner, position) {
            self.entities.destroy_instance(entity);
            return;
        }
        self.notify(
            id,
            NotificationKind::Spawned(template),
            postcard::to_allocvec(&position).unwrap_or_default(),
        );

        for var in spawn.variables {
            let Some(desc) = protocol.variables.by_tag(&var.tag) else {
                tracing::warn!("spawn of {id} carries unknown variable `{}`", var.tag);
                continue;
            };
            if (desc.loader)(self.entities.world_mut(), entity, var.sequence, &var.value) {
                self.notify(id, NotificationKind::VariableChanged(desc.tag), var.value);
            }
        }
    }

    fn apply_despawn(&mut self, despawn: Despawn) {
        let id = NetworkId(despawn.entity_id);
        match self.entities.remove(id) {
            DespawnOutcome::Despawned => {
                self.notify(id, NotificationKind::Despawned, Vec::new());
            }
            other => tracing::trace!("despawn of {id}: {other:?}"),
        }
    }

    fn apply_update(&mut self, update: VariableUpdate) {
        let id = NetworkId(update.entity_id);
        let Some(entity) = self.entities.entity(id) else {
            tracing::trace!("update of `{}` for absent {id} dropped", update.tag);
            return;
        };
        let Some(desc) = self.protocol.variables.by_tag(&update.tag).copied() else {
            tracing::warn!("update for unknown variable `{}`", update.tag);
            return;
        };
        if (desc.applier)(
            self.entities.world_mut(),
            entity,
            update.sequence,
            &update.value,
        ) {
            self.notify(id, NotificationKind::VariableChanged(desc.tag), update.value);
        } else {
            tracing::trace!("stale update {} of `{}` on {id}", update.sequence, desc.tag);
        }
    }

    fn apply_owner_changed(&mut self, change: OwnerChanged) {
        let id = NetworkId(change.entity_id);
        if self.entities.set_owner(id, change.owner).is_some() {
            let payload = postcard::to_allocvec(&change.owner).unwrap_or_default();
            self.notify(id, NotificationKind::OwnerChanged, payload);
        }
    }

    fn execute_write(&mut self, from: PeerId, write: VariableWrite) {
        let id = NetworkId(write.entity_id);
        let Some(entity) = self.entities.entity(id) else {
            tracing::debug!("write from {from} to absent {id} dropped");
            return;
        };
        let Some(desc) = self.protocol.variables.by_tag(&write.tag).copied() else {
            tracing::debug!("write from {from} to unknown variable `{}`", write.tag);
            return;
        };
        let Some(permissions) = (desc.permissions)(self.entities.world(), entity) else {
            tracing::debug!("write from {from}: {id} has no `{}`", desc.tag);
            return;
        };
        let owner = self.owner_of(id);
        if !permissions.can_write(from, owner, self.session.authority()) {
            tracing::debug!("write of `{}` on {id} by {from} rejected", desc.tag);
            return;
        }
        let Some(sequence) = (desc.committer)(self.entities.world_mut(), entity, &write.value)
        else {
            tracing::debug!("malformed write of `{}` from {from}", desc.tag);
            return;
        };
        self.notify(
            id,
            NotificationKind::VariableChanged(desc.tag),
            write.value.clone(),
        );
        self.broadcast_update(id, desc.tag, permissions, owner, sequence, write.value);
    }

    fn execute_invoke(&mut self, from: PeerId, invoke: Invoke) {
        let target = NetworkId(invoke.entity_id);
        if !self.entities.contains(target) {
            tracing::debug!(
                "`{}` from {from} dropped, {target} is not live",
                invoke.method
            );
            return;
        }
        if invoke.require_ownership && self.entities.owner(target) != Some(from) {
            tracing::debug!(
                "`{}` from {from} rejected, {target} is not owned by it",
                invoke.method
            );
            return;
        }
        let Some(handler) = self.protocol.invocations.get(&invoke.method) else {
            tracing::debug!("unknown method `{}` from {from}", invoke.method);
            return;
        };

        let call = Invocation {
            caller: from,
            target,
            method: invoke.method,
            require_ownership: invoke.require_ownership,
        };
        if let Err(err) = handler(self, &call, &invoke.args) {
            tracing::warn!("`{}` from {from} had malformed arguments: {err}", call.method);
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Takes the queued outgoing messages.
    pub fn take_outbox(&mut self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut self.outbox)
    }

    /// Takes the queued presentation notifications.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}

impl RoleProvider for Replicator {
    fn is_authority(&self) -> bool {
        self.session.is_authority()
    }

    fn is_owner(&self, entity: NetworkId) -> bool {
        self.entities.owner(entity) == Some(self.local_peer())
    }
}
