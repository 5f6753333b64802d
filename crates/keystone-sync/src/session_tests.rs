//! Session-level tests: one host and several clients over a
//! [`MemoryNetwork`], pumped frame by frame until nothing moves.

use super::*;

use keystone_net::{Invoke, MemoryNetwork, MemoryTransport, Message, VariableUpdate, VariableWrite};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::authority::SessionState;
use crate::behavior::{Collectable, register_input_relay};
use crate::entity::{DespawnOutcome, NotificationKind, Position, Replicated, SpawnState};
use crate::error::ReplicationError;
use crate::spawner::Spawner;
use crate::template::TemplateId;
use crate::variable::{Permissions, ReplicatedValue};

const HOST: PeerId = PeerId(1);
const ALICE: PeerId = PeerId(2);
const BOB: PeerId = PeerId(3);

const COIN: TemplateId = TemplateId(1);
const GEM: TemplateId = TemplateId(2);
const AVATAR: TemplateId = TemplateId(3);
const PROP: TemplateId = TemplateId(4);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
struct Score(u32);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
struct Secret(u32);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
struct Input {
    dx: i8,
    dy: i8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
struct Note(u32);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
struct Health(u32);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
struct Round(u32);

fn award_point(replicator: &mut Replicator, _target: NetworkId, actor: NetworkId) {
    let score = replicator.read::<Score>(actor).map_or(0, |s| s.0);
    replicator.write(actor, Score(score + 1)).unwrap();
}

fn test_protocol() -> Arc<Protocol> {
    let mut protocol = Protocol::new();
    protocol
        .variable::<Score>("score")
        .variable::<Secret>("secret")
        .variable::<Input>("input")
        .variable::<Note>("note")
        .variable::<Health>("health")
        .variable::<Round>("round");

    protocol
        .templates
        .register(COIN, "coin", |e| {
            e.insert((
                Replicated,
                ReplicatedValue::new(Health(1), Permissions::AUTHORITATIVE),
            ));
        })
        .register(GEM, "gem", |e| {
            e.insert(Replicated);
        })
        .register(AVATAR, "avatar", |e| {
            e.insert((
                Replicated,
                ReplicatedValue::new(Score(0), Permissions::AUTHORITATIVE),
                ReplicatedValue::new(Secret(0), Permissions::PRIVATE),
                ReplicatedValue::new(Input::default(), Permissions::AUTHORITATIVE),
                ReplicatedValue::new(Note(0), Permissions::OWNER_DRIVEN),
            ));
        })
        .register(PROP, "prop", |_| {});

    protocol
        .interaction(COIN, Collectable::with_award(award_point))
        .method::<NetworkId, _>("collect", |replicator, call, actor| {
            replicator.interact(call.target, actor);
        })
        .method::<u32, _>("bump", |replicator, call, amount| {
            let score = replicator.read::<Score>(call.target).map_or(0, |s| s.0);
            replicator.write(call.target, Score(score + amount)).unwrap();
        });
    register_input_relay::<Input>(&mut protocol.invocations, "input");
    protocol.build()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    net: MemoryNetwork,
    protocol: Arc<Protocol>,
    settings: PeerSettings,
    host: Peer<MemoryTransport>,
    clients: Vec<Peer<MemoryTransport>>,
}

impl Harness {
    fn new(clients: &[PeerId]) -> Self {
        Self::with_settings(clients, PeerSettings::default())
    }

    fn with_settings(clients: &[PeerId], settings: PeerSettings) -> Self {
        let net = MemoryNetwork::new();
        let protocol = test_protocol();
        let mut host = Peer::host(Arc::clone(&protocol), net.endpoint(HOST), true, settings);
        host.replicator_mut()
            .add_session_variable(Round(0), Permissions::AUTHORITATIVE)
            .unwrap();

        let mut harness = Self {
            net,
            protocol,
            settings,
            host,
            clients: Vec::new(),
        };
        for &id in clients {
            harness.join(id);
        }
        harness.pump();
        harness.drain_all();
        harness
    }

    fn join(&mut self, id: PeerId) {
        let mut client = Peer::client(
            Arc::clone(&self.protocol),
            self.net.endpoint(id),
            HOST,
            self.settings,
        );
        client
            .replicator_mut()
            .add_session_variable(Round(0), Permissions::AUTHORITATIVE)
            .unwrap();
        assert!(self.host.replicator_mut().connect_peer(id));
        self.clients.push(client);
    }

    fn client(&mut self, id: PeerId) -> &mut Peer<MemoryTransport> {
        self.clients.iter_mut().find(|c| c.id() == id).unwrap()
    }

    fn host(&mut self) -> &mut Replicator {
        self.host.replicator_mut()
    }

    /// Runs frames on every peer until a whole round is idle.
    fn pump(&mut self) {
        for _ in 0..64 {
            let mut idle = self.host.update().is_idle();
            for client in &mut self.clients {
                idle &= client.update().is_idle();
            }
            if idle {
                return;
            }
        }
        panic!("session did not settle");
    }

    fn drain_all(&mut self) {
        self.host.replicator_mut().drain_notifications();
        for client in &mut self.clients {
            client.replicator_mut().drain_notifications();
        }
    }

    fn all_peers(&self) -> impl Iterator<Item = &Peer<MemoryTransport>> {
        std::iter::once(&self.host).chain(self.clients.iter())
    }

    /// Spawns an avatar owned by `owner` and lets it replicate.
    fn spawn_avatar(&mut self, owner: PeerId) -> NetworkId {
        let id = self
            .host()
            .spawn(AVATAR, Position::new(0.0, 0.0), Some(owner))
            .unwrap()
            .unwrap();
        self.pump();
        self.drain_all();
        id
    }

    fn spawn_coin(&mut self) -> NetworkId {
        let id = self
            .host()
            .spawn(COIN, Position::new(5.0, 5.0), None)
            .unwrap()
            .unwrap();
        self.pump();
        self.drain_all();
        id
    }
}

fn count(peer: &mut Peer<MemoryTransport>, entity: NetworkId, kind: NotificationKind) -> usize {
    peer.replicator_mut()
        .drain_notifications()
        .into_iter()
        .filter(|n| n.entity == entity && n.kind == kind)
        .count()
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_seeded_spawner_spawns_first_pool_entry_everywhere() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let seed = (0u64..)
        .find(|s| ChaCha8Rng::seed_from_u64(*s).random_range(0..2usize) == 0)
        .unwrap();
    let mut spawner = Spawner::new(vec![COIN, GEM], seed);

    let id = spawner
        .spawn(h.host(), Position::new(3.0, 4.0))
        .unwrap()
        .expect("authority spawns");
    assert_ne!(id, NetworkId::SESSION);
    h.pump();

    for peer in h.all_peers() {
        let entities = peer.replicator().entities();
        assert_eq!(entities.template(id), Some(COIN), "{}", peer.id());
        assert_eq!(entities.spawn_state(id), Some(SpawnState::Spawned));
        assert_eq!(entities.position(id), Some(Position::new(3.0, 4.0)));
        assert_eq!(entities.owner(id), Some(HOST));
        assert_eq!(entities.len(), 1);
    }
    for client in [ALICE, BOB] {
        assert_eq!(count(h.client(client), id, NotificationKind::Spawned(COIN)), 1);
    }

    let second = spawner.spawn(h.host(), Position::default()).unwrap().unwrap();
    assert_ne!(second, id);
}

#[test]
fn test_repeated_despawn_destroys_exactly_once() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let coin = h.spawn_coin();

    assert_eq!(h.host().despawn(coin), DespawnOutcome::Despawned);
    assert_eq!(h.host().despawn(coin), DespawnOutcome::AlreadyTerminal);
    assert_eq!(h.host().despawn(coin), DespawnOutcome::AlreadyTerminal);
    h.pump();
    assert_eq!(h.host().despawn(coin), DespawnOutcome::AlreadyTerminal);
    h.pump();

    assert_eq!(count(&mut h.host, coin, NotificationKind::Despawned), 1);
    for client in [ALICE, BOB] {
        let peer = h.client(client);
        assert_eq!(peer.replicator().entities().spawn_state(coin), Some(SpawnState::Despawned));
        assert!(peer.replicator().entities().is_empty());
        assert_eq!(count(peer, coin, NotificationKind::Despawned), 1);
    }
}

#[test]
fn test_non_authority_mutations_have_no_effect() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let coin = h.spawn_coin();
    let alice = h.client(ALICE).replicator_mut();

    assert!(matches!(alice.spawn(GEM, Position::default(), None), Ok(None)));
    assert_eq!(alice.despawn(coin), DespawnOutcome::Ignored);
    assert!(!alice.set_owner(coin, ALICE).unwrap());
    assert!(!alice.interact(coin, coin));
    let mut spawner = Spawner::new(vec![GEM], 0);
    assert!(matches!(spawner.spawn(alice, Position::default()), Ok(None)));
    h.pump();

    for peer in h.all_peers() {
        let entities = peer.replicator().entities();
        assert_eq!(entities.live_ids().collect::<Vec<_>>(), vec![coin]);
        assert_eq!(entities.spawn_state(coin), Some(SpawnState::Spawned));
        assert_eq!(entities.owner(coin), Some(HOST));
    }
    assert!(h.host().drain_notifications().is_empty());
    assert!(h.client(BOB).replicator_mut().drain_notifications().is_empty());
}

#[test]
fn test_unreplicable_template_is_destroyed() {
    let mut h = Harness::new(&[ALICE]);
    let before = h.host().entities().world().entities().len();

    let mut spawner = Spawner::new(vec![PROP], 9);
    let err = spawner.spawn(h.host(), Position::default()).unwrap_err();
    assert!(matches!(err, ReplicationError::NotReplicable(PROP)));
    assert_eq!(h.host().entities().world().entities().len(), before);
    assert!(h.host().entities().is_empty());

    h.pump();
    assert!(h.client(ALICE).replicator().entities().is_empty());
}

#[test]
fn test_spawner_precondition_errors() {
    let mut h = Harness::new(&[]);

    let mut empty = Spawner::new(Vec::new(), 1);
    assert!(matches!(
        empty.spawn(h.host(), Position::default()),
        Err(ReplicationError::EmptyPool)
    ));

    let mut null = Spawner::new(vec![TemplateId(99)], 1);
    assert!(matches!(
        null.spawn(h.host(), Position::default()),
        Err(ReplicationError::NullTemplate(TemplateId(99)))
    ));

    // The session carries on after every failure.
    let mut ok = Spawner::new(vec![GEM], 1);
    assert!(ok.spawn(h.host(), Position::default()).unwrap().is_some());
}

#[test]
fn test_destroy_instance_routes_registered_entities_through_despawn() {
    let mut h = Harness::new(&[ALICE]);
    let coin = h.spawn_coin();
    let entity = h.host().entities().entity(coin).unwrap();
    let session = h.host().entities().session();

    assert_eq!(h.host().destroy_instance(entity), DespawnOutcome::Despawned);
    assert_eq!(h.host().destroy_instance(entity), DespawnOutcome::Unknown);
    assert_eq!(h.host().destroy_instance(session), DespawnOutcome::Ignored);
    h.pump();
    assert_eq!(
        h.client(ALICE).replicator().entities().spawn_state(coin),
        Some(SpawnState::Despawned)
    );
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

#[test]
fn test_authority_only_write_from_client_is_rejected() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let coin = h.spawn_coin();

    let err = h
        .client(ALICE)
        .replicator_mut()
        .write(coin, Health(0))
        .unwrap_err();
    assert!(matches!(
        err,
        ReplicationError::PermissionViolation {
            entity,
            variable: "health"
        } if entity == coin
    ));

    // A forged request that bypasses the local check is rejected by the
    // authority without a trace.
    let value = postcard::to_allocvec(&Health(0)).unwrap();
    h.host().receive(
        ALICE,
        Message::VariableWrite(VariableWrite {
            entity_id: coin.0,
            tag: "health".to_string(),
            value,
        }),
    );
    h.pump();

    for peer in h.all_peers() {
        assert_eq!(peer.replicator().read::<Health>(coin), Some(&Health(1)));
    }
    assert!(h.host().drain_notifications().is_empty());
}

#[test]
fn test_authority_write_reaches_every_reader_only() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let avatar = h.spawn_avatar(ALICE);

    h.host().write(avatar, Score(7)).unwrap();
    h.host().write(avatar, Secret(42)).unwrap();
    h.pump();

    for peer in h.all_peers() {
        assert_eq!(peer.replicator().read::<Score>(avatar), Some(&Score(7)));
    }
    assert_eq!(h.host().read::<Secret>(avatar), Some(&Secret(42)));
    assert_eq!(
        h.client(ALICE).replicator().read::<Secret>(avatar),
        Some(&Secret(42))
    );

    let bob = h.client(BOB).replicator();
    assert_eq!(bob.read::<Secret>(avatar), None);
    let cached = bob
        .entities()
        .component::<ReplicatedValue<Secret>>(avatar)
        .unwrap();
    assert_eq!((*cached.value(), cached.sequence()), (Secret(0), 0));
}

#[test]
fn test_owner_driven_write_is_optimistic_and_replicated() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let avatar = h.spawn_avatar(ALICE);

    h.client(ALICE).replicator_mut().write(avatar, Note(5)).unwrap();
    assert_eq!(
        h.client(ALICE).replicator().read::<Note>(avatar),
        Some(&Note(5))
    );
    assert_eq!(h.host().read::<Note>(avatar), Some(&Note(0)));

    assert!(h.client(BOB).replicator_mut().write(avatar, Note(9)).is_err());
    assert!(h.host().write(avatar, Note(9)).is_err());
    h.pump();

    for peer in h.all_peers() {
        assert_eq!(peer.replicator().read::<Note>(avatar), Some(&Note(5)));
    }
}

#[test]
fn test_stale_and_duplicate_updates_are_dropped() {
    let mut h = Harness::new(&[ALICE]);
    let avatar = h.spawn_avatar(ALICE);
    h.host().write(avatar, Score(4)).unwrap();
    h.pump();
    h.drain_all();

    let alice = h.client(ALICE).replicator_mut();
    let stale = Message::VariableUpdate(VariableUpdate {
        entity_id: avatar.0,
        tag: "score".to_string(),
        sequence: 1,
        value: postcard::to_allocvec(&Score(99)).unwrap(),
    });
    alice.receive(HOST, stale.clone());
    alice.receive(HOST, stale);
    assert_eq!(alice.process_pending(), 2);

    assert_eq!(alice.read::<Score>(avatar), Some(&Score(4)));
    assert!(alice.drain_notifications().is_empty());
}

#[test]
fn test_updates_to_different_variables_arrive_independently() {
    let settings = PeerSettings { inbound_budget: 1 };
    let mut h = Harness::with_settings(&[ALICE], settings);
    let avatar = h.spawn_avatar(ALICE);

    h.host().write(avatar, Score(1)).unwrap();
    h.host().write(avatar, Input { dx: 1, dy: -1 }).unwrap();
    h.host.update();

    // One datagram per frame: the second variable lags a frame behind.
    h.client(ALICE).update();
    let alice = h.client(ALICE).replicator();
    assert_eq!(alice.read::<Score>(avatar), Some(&Score(1)));
    assert_eq!(alice.read::<Input>(avatar), Some(&Input::default()));

    h.client(ALICE).update();
    let alice = h.client(ALICE).replicator();
    assert_eq!(alice.read::<Input>(avatar), Some(&Input { dx: 1, dy: -1 }));
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

#[test]
fn test_simultaneous_collects_despawn_once() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let alice_avatar = h.spawn_avatar(ALICE);
    let bob_avatar = h.spawn_avatar(BOB);
    let coin = h.spawn_coin();

    h.client(ALICE)
        .replicator_mut()
        .invoke(coin, "collect", &alice_avatar, false)
        .unwrap();
    h.client(BOB)
        .replicator_mut()
        .invoke(coin, "collect", &bob_avatar, false)
        .unwrap();
    h.pump();

    assert_eq!(count(&mut h.host, coin, NotificationKind::Despawned), 1);
    for client in [ALICE, BOB] {
        assert_eq!(count(h.client(client), coin, NotificationKind::Despawned), 1);
    }
    // Alice's request arrived first, Bob's found the coin gone.
    for peer in h.all_peers() {
        let replicator = peer.replicator();
        assert_eq!(replicator.read::<Score>(alice_avatar), Some(&Score(1)));
        assert_eq!(replicator.read::<Score>(bob_avatar), Some(&Score(0)));
    }
}

#[test]
fn test_host_invocations_are_queued_for_the_next_frame() {
    let mut h = Harness::new(&[ALICE]);
    let avatar = h.spawn_avatar(HOST);
    let coin = h.spawn_coin();

    h.host().invoke(coin, "collect", &avatar, true).unwrap();
    assert_eq!(h.host().pending_len(), 1);
    assert!(h.host().entities().contains(coin));
    h.pump();

    assert!(!h.client(ALICE).replicator().entities().contains(coin));
    assert_eq!(
        h.client(ALICE).replicator().read::<Score>(avatar),
        Some(&Score(1))
    );
}

#[test]
fn test_ownership_required_invocation_rejects_other_peers() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let avatar = h.spawn_avatar(ALICE);

    h.client(BOB)
        .replicator_mut()
        .invoke(avatar, "bump", &10u32, true)
        .unwrap();
    h.client(BOB)
        .replicator_mut()
        .invoke(avatar, "input", &Input { dx: 1, dy: 1 }, true)
        .unwrap();
    h.pump();

    for peer in h.all_peers() {
        assert_eq!(peer.replicator().read::<Score>(avatar), Some(&Score(0)));
        assert_eq!(peer.replicator().read::<Input>(avatar), Some(&Input::default()));
    }
    assert!(h.host().drain_notifications().is_empty());

    h.client(ALICE)
        .replicator_mut()
        .invoke(avatar, "input", &Input { dx: -1, dy: 0 }, true)
        .unwrap();
    h.pump();
    for peer in h.all_peers() {
        assert_eq!(
            peer.replicator().read::<Input>(avatar),
            Some(&Input { dx: -1, dy: 0 })
        );
    }
}

#[test]
fn test_malformed_or_unknown_invocations_are_absorbed() {
    let mut h = Harness::new(&[ALICE]);
    let avatar = h.spawn_avatar(ALICE);

    h.client(ALICE)
        .replicator_mut()
        .invoke(avatar, "no_such_method", &(), false)
        .unwrap();
    h.client(ALICE)
        .replicator_mut()
        .invoke(NetworkId(404), "bump", &1u32, false)
        .unwrap();
    h.host().receive(
        ALICE,
        Message::Invoke(Invoke {
            entity_id: avatar.0,
            method: "bump".to_string(),
            args: Vec::new(),
            require_ownership: false,
        }),
    );
    h.pump();

    assert_eq!(h.host().read::<Score>(avatar), Some(&Score(0)));
    assert!(h.host().session().is_active());
}

// ---------------------------------------------------------------------------
// Membership and routing
// ---------------------------------------------------------------------------

#[test]
fn test_late_joiner_receives_snapshot() {
    let mut h = Harness::new(&[ALICE]);
    let avatar = h.spawn_avatar(ALICE);
    let coin = h.spawn_coin();
    h.host().write(avatar, Score(3)).unwrap();
    h.host().write(avatar, Secret(8)).unwrap();
    h.host().write(NetworkId::SESSION, Round(2)).unwrap();
    h.pump();

    h.join(BOB);
    assert!(!h.host().connect_peer(BOB));
    h.pump();

    let bob = h.client(BOB).replicator();
    assert_eq!(bob.entities().live_ids().collect::<Vec<_>>(), vec![avatar, coin]);
    assert_eq!(bob.entities().owner(avatar), Some(ALICE));
    assert_eq!(bob.read::<Score>(avatar), Some(&Score(3)));
    assert_eq!(bob.read::<Secret>(avatar), None);
    assert_eq!(bob.read::<Round>(NetworkId::SESSION), Some(&Round(2)));
}

#[test]
fn test_disconnected_client_loses_requests_and_entities() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let avatar = h.spawn_avatar(ALICE);

    h.host().receive(
        ALICE,
        Message::Invoke(Invoke {
            entity_id: avatar.0,
            method: "bump".to_string(),
            args: postcard::to_allocvec(&5u32).unwrap(),
            require_ownership: true,
        }),
    );
    assert_eq!(h.host().pending_len(), 1);
    assert!(h.host().disconnect_peer(ALICE));
    assert!(!h.host().disconnect_peer(ALICE));
    assert_eq!(h.host().pending_len(), 0);
    h.pump();

    assert_eq!(h.host().read::<Score>(avatar), Some(&Score(0)));
    assert_eq!(h.host().entities().owner(avatar), Some(HOST));
    assert!(h.host().is_owner(avatar));
    let bob = h.client(BOB);
    assert_eq!(bob.replicator().entities().owner(avatar), Some(HOST));
    assert_eq!(count(bob, avatar, NotificationKind::OwnerChanged), 1);

    // Requests from a peer that is no longer connected are not queued.
    h.host().receive(
        ALICE,
        Message::Invoke(Invoke {
            entity_id: avatar.0,
            method: "bump".to_string(),
            args: postcard::to_allocvec(&5u32).unwrap(),
            require_ownership: false,
        }),
    );
    assert_eq!(h.host().pending_len(), 0);
}

#[test]
fn test_unreachable_client_is_disconnected_on_send() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let avatar = h.spawn_avatar(ALICE);

    assert!(h.net.disconnect(ALICE));
    h.host().write(avatar, Score(1)).unwrap();
    h.pump();

    assert!(!h.host().session().is_connected(ALICE));
    assert_eq!(h.host().entities().owner(avatar), Some(HOST));
    let bob = h.client(BOB).replicator();
    assert_eq!(bob.read::<Score>(avatar), Some(&Score(1)));
    assert_eq!(bob.entities().owner(avatar), Some(HOST));
}

#[test]
fn test_losing_the_authority_ends_the_session() {
    let mut h = Harness::new(&[ALICE]);
    let avatar = h.spawn_avatar(ALICE);

    assert!(h.net.disconnect(HOST));
    let alice = h.client(ALICE);
    alice
        .replicator_mut()
        .invoke(avatar, "bump", &1u32, true)
        .unwrap();
    alice.update();

    assert_eq!(alice.replicator().session().state(), SessionState::Ended);
    let frame = alice.frame();
    assert!(alice.update().is_idle());
    assert_eq!(alice.frame(), frame);
    assert!(alice.replicator_mut().take_outbox().is_empty());
}

#[test]
fn test_misdirected_messages_are_dropped() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let coin = h.spawn_coin();

    // Clients never execute requests.
    let alice = h.client(ALICE).replicator_mut();
    alice.receive(
        HOST,
        Message::Invoke(Invoke {
            entity_id: coin.0,
            method: "collect".to_string(),
            args: postcard::to_allocvec(&coin).unwrap(),
            require_ownership: false,
        }),
    );
    // Only the authority may announce state.
    alice.receive(
        BOB,
        Message::Despawn(keystone_net::Despawn { entity_id: coin.0 }),
    );
    assert_eq!(alice.pending_len(), 0);

    // The authority ignores state announcements from clients.
    h.host()
        .receive(ALICE, Message::Despawn(keystone_net::Despawn { entity_id: coin.0 }));
    assert_eq!(h.host().pending_len(), 0);
    h.pump();

    for peer in h.all_peers() {
        assert!(peer.replicator().entities().contains(coin));
    }
}

#[test]
fn test_set_owner_delivers_owner_scoped_state() {
    let mut h = Harness::new(&[ALICE, BOB]);
    let avatar = h.spawn_avatar(ALICE);
    h.host().write(avatar, Secret(11)).unwrap();
    h.pump();
    assert_eq!(h.client(BOB).replicator().read::<Secret>(avatar), None);

    assert!(h.host().set_owner(avatar, BOB).unwrap());
    assert!(!h.host().set_owner(avatar, BOB).unwrap());
    assert!(matches!(
        h.host().set_owner(NetworkId(77), BOB),
        Err(ReplicationError::UnknownEntity(NetworkId(77)))
    ));
    h.pump();

    let bob = h.client(BOB);
    assert!(bob.is_owner(avatar));
    assert_eq!(bob.replicator().read::<Secret>(avatar), Some(&Secret(11)));
    assert_eq!(h.client(ALICE).replicator().read::<Secret>(avatar), None);
}
