//! The collectable game every peer of the demo agrees on: templates,
//! replicated variables, the input relay and the pickup rules.

use std::sync::Arc;

use keystone_sync::{
    Collectable, NetworkId, Permissions, Position, Protocol, Replicated, ReplicatedValue,
    ReplicationError, Replicator, TemplateId, register_input_relay,
};
use serde::{Deserialize, Serialize};

pub const PLAYER: TemplateId = TemplateId(1);
pub const COIN: TemplateId = TemplateId(2);
pub const GEM: TemplateId = TemplateId(3);

/// Templates the spawner draws from.
pub const COLLECTABLES: [TemplateId; 2] = [COIN, GEM];

/// Invocation carrying a [`Heading`] to the owner's player entity.
pub const SUBMIT_INPUT: &str = "submit_input";

/// Distance at which a player touches a collectable.
pub const PICKUP_RADIUS: f32 = 1.0;

/// Units a player moves per frame along each axis.
pub const PLAYER_SPEED: f32 = 0.25;

// ---------------------------------------------------------------------------
// Replicated variables
// ---------------------------------------------------------------------------

/// Points collected by a player.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score(pub u32);

/// Points a collectable is worth.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Worth(pub u32);

/// Items collected in the whole session. Lives on the session entity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally(pub u32);

/// Movement input, one step per axis in `-1..=1`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heading {
    pub dx: i8,
    pub dy: i8,
}

impl Heading {
    pub const STILL: Heading = Heading { dx: 0, dy: 0 };

    /// Unit steps from `from` towards `to`, ignoring axes already within
    /// reach.
    pub fn towards(from: Location, to: Position) -> Self {
        let step = |delta: f32| {
            if delta.abs() < PLAYER_SPEED {
                0
            } else {
                delta.signum() as i8
            }
        };
        Self {
            dx: step(to.x - from.x),
            dy: step(to.y - from.y),
        }
    }
}

/// Current location of a player. Collectables never move and use their
/// spawn [`Position`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub x: f32,
    pub y: f32,
}

impl Location {
    pub(crate) fn distance(self, other: Position) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl From<Position> for Location {
    fn from(p: Position) -> Self {
        Self { x: p.x, y: p.y }
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Registries shared by the host and every client.
pub fn protocol() -> Arc<Protocol> {
    let mut protocol = Protocol::new();
    protocol
        .variable::<Score>("score")
        .variable::<Worth>("worth")
        .variable::<Heading>("heading")
        .variable::<Location>("location")
        .variable::<Tally>("tally");

    protocol
        .templates
        .register(PLAYER, "player", |e| {
            e.insert((
                Replicated,
                ReplicatedValue::new(Score(0), Permissions::AUTHORITATIVE),
                ReplicatedValue::new(Heading::STILL, Permissions::AUTHORITATIVE),
                ReplicatedValue::new(Location::default(), Permissions::AUTHORITATIVE),
            ));
        })
        .register(COIN, "coin", |e| {
            e.insert((
                Replicated,
                ReplicatedValue::new(Worth(1), Permissions::AUTHORITATIVE),
            ));
        })
        .register(GEM, "gem", |e| {
            e.insert((
                Replicated,
                ReplicatedValue::new(Worth(5), Permissions::AUTHORITATIVE),
            ));
        });

    let collectable = Collectable::with_award(award_worth);
    protocol
        .interaction(COIN, collectable)
        .interaction(GEM, collectable);
    register_input_relay::<Heading>(&mut protocol.invocations, SUBMIT_INPUT);
    protocol.build()
}

/// Adds the session variables. Every peer calls this before joining.
pub fn install_session_variables(replicator: &mut Replicator) -> Result<(), ReplicationError> {
    replicator.add_session_variable(Tally(0), Permissions::AUTHORITATIVE)
}

/// Adds the collectable's worth to the collecting player's score and bumps
/// the session tally.
fn award_worth(replicator: &mut Replicator, target: NetworkId, actor: NetworkId) {
    let worth = replicator.read::<Worth>(target).map_or(0, |w| w.0);
    let Some(score) = replicator.read::<Score>(actor).copied() else {
        tracing::debug!("{actor} collected {target} but keeps no score");
        return;
    };
    if let Err(err) = replicator.write(actor, Score(score.0 + worth)) {
        tracing::warn!("score of {actor} not updated: {err}");
        return;
    }
    let tally = replicator.read::<Tally>(NetworkId::SESSION).map_or(0, |t| t.0);
    if let Err(err) = replicator.write(NetworkId::SESSION, Tally(tally + 1)) {
        tracing::warn!("session tally not updated: {err}");
    }
    tracing::info!("{actor} collected {target} worth {worth}");
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Whether `id` is a collectable on this peer.
pub fn is_collectable(replicator: &Replicator, id: NetworkId) -> bool {
    replicator
        .entities()
        .template(id)
        .is_some_and(|t| COLLECTABLES.contains(&t))
}

/// Live player entities.
pub fn players(replicator: &Replicator) -> Vec<NetworkId> {
    let entities = replicator.entities();
    entities
        .live_ids()
        .filter(|&id| entities.template(id) == Some(PLAYER))
        .collect()
}

/// Live collectables with their positions.
pub fn collectables(replicator: &Replicator) -> Vec<(NetworkId, Position)> {
    let entities = replicator.entities();
    entities
        .live_ids()
        .filter(|&id| is_collectable(replicator, id))
        .filter_map(|id| Some((id, entities.position(id)?)))
        .collect()
}

/// Moves every player one step along its relayed heading, clamped to the
/// arena. Authority only; returns the number of players moved.
pub fn integrate(replicator: &mut Replicator, half_extent: f32) -> usize {
    if !replicator.session().is_authority() {
        return 0;
    }
    let mut moved = 0;
    for id in players(replicator) {
        let (Some(&heading), Some(&here)) = (
            replicator.read::<Heading>(id),
            replicator.read::<Location>(id),
        ) else {
            continue;
        };
        if heading == Heading::STILL {
            continue;
        }
        let next = Location {
            x: (here.x + f32::from(heading.dx) * PLAYER_SPEED).clamp(-half_extent, half_extent),
            y: (here.y + f32::from(heading.dy) * PLAYER_SPEED).clamp(-half_extent, half_extent),
        };
        if next == here {
            continue;
        }
        match replicator.write(id, next) {
            Ok(()) => moved += 1,
            Err(err) => tracing::warn!("{id} not moved: {err}"),
        }
    }
    moved
}

/// Reports every player/collectable overlap this peer can see. Only the
/// authority turns a report into a pickup; returns how many it handled.
pub fn detect_pickups(replicator: &mut Replicator) -> usize {
    let items = collectables(replicator);
    let mut touches = Vec::new();
    for player in players(replicator) {
        let Some(&here) = replicator.read::<Location>(player) else {
            continue;
        };
        touches.extend(
            items
                .iter()
                .filter(|(_, at)| here.distance(*at) <= PICKUP_RADIUS)
                .map(|&(item, _)| (item, player)),
        );
    }
    touches
        .into_iter()
        .filter(|&(item, player)| replicator.interact(item, player))
        .count()
}
