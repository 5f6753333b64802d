//! One host and its clients on a [`MemoryNetwork`], stepped frame by frame.

use std::collections::BTreeMap;
use std::sync::Arc;

use keystone_config::{Config, SpawnerConfig};
use keystone_net::{MemoryNetwork, MemoryTransport};
use keystone_sync::{
    NetworkId, NotificationKind, Peer, PeerId, PeerSettings, Position, ReplicationError,
    Replicator, Spawner,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::game::{
    self, COLLECTABLES, Heading, Location, PLAYER, SUBMIT_INPUT, Score, Tally,
};

/// The host always takes the first id; clients follow.
pub const HOST: PeerId = PeerId(1);

/// Frames a bot keeps a wander heading before it may pick another.
const WANDER_FRAMES: u32 = 30;

// ---------------------------------------------------------------------------
// Bot
// ---------------------------------------------------------------------------

/// Stand-in for a human player: walks to the nearest collectable it can
/// see, or wanders when there is none.
pub struct Bot {
    rng: ChaCha8Rng,
    wander: Heading,
    last_sent: Option<Heading>,
}

impl Bot {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            wander: Heading::STILL,
            last_sent: None,
        }
    }

    /// Heading for the local player this frame, with the player's id. `None`
    /// until the player has been replicated here.
    pub fn steer(&mut self, replicator: &Replicator) -> Option<(NetworkId, Heading)> {
        let entities = replicator.entities();
        let avatar = entities
            .owned_by(replicator.local_peer())
            .into_iter()
            .find(|&id| entities.template(id) == Some(PLAYER))?;
        let here = *replicator.read::<Location>(avatar)?;

        let nearest = game::collectables(replicator)
            .into_iter()
            .min_by(|a, b| here.distance(a.1).total_cmp(&here.distance(b.1)));
        let heading = match nearest {
            Some((_, at)) => Heading::towards(here, at),
            None => {
                if self.rng.random_ratio(1, WANDER_FRAMES) || self.wander == Heading::STILL {
                    self.wander = Heading {
                        dx: self.rng.random_range(-1..=1),
                        dy: self.rng.random_range(-1..=1),
                    };
                }
                self.wander
            }
        };
        Some((avatar, heading))
    }

    /// Forwards a changed heading to the authority through the ownership
    /// checked input relay.
    pub fn act(&mut self, replicator: &mut Replicator) -> Result<(), ReplicationError> {
        let Some((avatar, heading)) = self.steer(replicator) else {
            return Ok(());
        };
        if self.last_sent == Some(heading) {
            return Ok(());
        }
        replicator.invoke(avatar, SUBMIT_INPUT, &heading, true)?;
        self.last_sent = Some(heading);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

struct Participant {
    peer: Peer<MemoryTransport>,
    bot: Option<Bot>,
    pickups_seen: usize,
}

/// Scores by player owner, as one peer sees them.
pub type Scoreboard = BTreeMap<PeerId, u32>;

/// A complete session. The host is always the first participant.
pub struct Simulation {
    participants: Vec<Participant>,
    spawner: Spawner,
    placement: ChaCha8Rng,
    spawner_config: SpawnerConfig,
    frame: u64,
}

impl Simulation {
    /// Connects the host and `config.session.clients` clients and spawns a
    /// player for everyone who plays.
    pub fn new(config: &Config) -> Result<Self, ReplicationError> {
        let net = MemoryNetwork::new();
        let protocol = game::protocol();
        let settings = PeerSettings {
            inbound_budget: config.network.inbound_budget,
        };
        let seed = config.spawner.seed;

        let mut host = Peer::host(
            Arc::clone(&protocol),
            net.endpoint(HOST),
            config.session.host_plays,
            settings,
        );
        game::install_session_variables(host.replicator_mut())?;
        let mut participants = vec![Participant {
            peer: host,
            bot: config.session.host_plays.then(|| Bot::new(seed ^ HOST.0)),
            pickups_seen: 0,
        }];

        for index in 0..u64::from(config.session.clients) {
            let id = PeerId(HOST.0 + 1 + index);
            let mut client = Peer::client(Arc::clone(&protocol), net.endpoint(id), HOST, settings);
            game::install_session_variables(client.replicator_mut())?;
            participants[0].peer.replicator_mut().connect_peer(id);
            participants.push(Participant {
                peer: client,
                bot: Some(Bot::new(seed ^ id.0)),
                pickups_seen: 0,
            });
        }

        let playing: Vec<PeerId> = participants
            .iter()
            .filter(|p| p.bot.is_some())
            .map(|p| p.peer.id())
            .collect();
        let half_extent = config.spawner.arena_half_extent.abs();
        let spacing = 2.0 * half_extent / (playing.len() + 1) as f32;
        let host = participants[0].peer.replicator_mut();
        for (slot, &owner) in playing.iter().enumerate() {
            let start = Position::new(-half_extent + spacing * (slot + 1) as f32, 0.0);
            if let Some(player) = host.spawn(PLAYER, start, Some(owner))? {
                host.write(player, Location::from(start))?;
            }
        }

        let mut placement = ChaCha8Rng::seed_from_u64(seed);
        placement.set_stream(1);
        tracing::info!(
            "session ready: {} clients, {} players, seed {seed}",
            participants.len() - 1,
            playing.len()
        );
        Ok(Self {
            participants,
            spawner: Spawner::new(COLLECTABLES.to_vec(), seed),
            placement,
            spawner_config: config.spawner.clone(),
            frame: 0,
        })
    }

    /// Frames stepped so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The host's replication state.
    pub fn host(&self) -> &Replicator {
        self.participants[0].peer.replicator()
    }

    /// Runs one frame on every peer.
    pub fn step(&mut self) {
        self.frame += 1;

        for participant in &mut self.participants {
            if let Some(bot) = participant.bot.as_mut()
                && let Err(err) = bot.act(participant.peer.replicator_mut())
            {
                tracing::warn!("{} could not send input: {err}", participant.peer.id());
            }
        }

        for participant in &mut self.participants {
            participant.peer.update();
        }

        let half_extent = self.spawner_config.arena_half_extent.abs();
        game::integrate(self.participants[0].peer.replicator_mut(), half_extent);
        self.spawn_tick();

        for participant in &mut self.participants {
            let replicator = participant.peer.replicator_mut();
            game::detect_pickups(replicator);
            participant.pickups_seen += replicator
                .drain_notifications()
                .iter()
                .filter(|n| n.kind == NotificationKind::Despawned)
                .count();
        }
    }

    /// Places one collectable every `interval_frames` while fewer than
    /// `max_live` are out.
    fn spawn_tick(&mut self) {
        let config = &self.spawner_config;
        if config.interval_frames == 0 || self.frame % u64::from(config.interval_frames) != 0 {
            return;
        }
        let host = self.participants[0].peer.replicator_mut();
        if game::collectables(host).len() >= config.max_live {
            return;
        }
        let e = config.arena_half_extent.abs();
        let at = Position::new(
            self.placement.random_range(-e..=e),
            self.placement.random_range(-e..=e),
        );
        // Failures are logged by the spawner.
        if let Ok(Some(id)) = self.spawner.spawn(host, at) {
            tracing::trace!("frame {}: placed {id}", self.frame);
        }
    }

    /// Exchanges messages without simulating until no peer has anything
    /// left to send or apply. Returns `false` if that took more than
    /// `max_rounds`.
    pub fn settle(&mut self, max_rounds: usize) -> bool {
        for _ in 0..max_rounds {
            let mut idle = true;
            for participant in &mut self.participants {
                idle &= participant.peer.update().is_idle();
            }
            if idle {
                return true;
            }
        }
        false
    }

    /// Each peer's view of the scores.
    pub fn scoreboards(&self) -> Vec<(PeerId, Scoreboard)> {
        self.participants
            .iter()
            .map(|p| (p.peer.id(), scoreboard(p.peer.replicator())))
            .collect()
    }

    /// Each peer's view of the session tally.
    pub fn tallies(&self) -> Vec<(PeerId, u32)> {
        self.participants
            .iter()
            .map(|p| {
                let tally = p.peer.replicator().read::<Tally>(NetworkId::SESSION);
                (p.peer.id(), tally.map_or(0, |t| t.0))
            })
            .collect()
    }

    /// Logs every peer's view of the outcome.
    pub fn report(&self) {
        let views = self.scoreboards().into_iter().zip(self.tallies());
        for (participant, ((peer, board), (_, tally))) in self.participants.iter().zip(views) {
            let scores: Vec<String> = board
                .iter()
                .map(|(owner, score)| format!("{owner}={score}"))
                .collect();
            tracing::info!(
                "{peer} after {} frames: [{}], tally {tally}, {} pickups seen",
                participant.peer.frame(),
                scores.join(", "),
                participant.pickups_seen
            );
        }
    }
}

/// Scores of the players `replicator` can see, keyed by owner.
pub fn scoreboard(replicator: &Replicator) -> Scoreboard {
    game::players(replicator)
        .into_iter()
        .filter_map(|id| {
            let owner = replicator.entities().owner(id)?;
            let score = replicator.read::<Score>(id)?;
            Some((owner, score.0))
        })
        .collect()
}
