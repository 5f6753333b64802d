//! Host-authoritative replication: role checks, permission-scoped
//! replicated variables, authority-gated entity lifecycle, remote invocation,
//! and the per-frame peer loop that ties them to a transport.

pub mod authority;
pub mod behavior;
pub mod entity;
mod error;
pub mod invocation;
pub mod peer;
pub mod protocol;
pub mod replication;
pub mod replicator;
pub mod spawner;
pub mod template;
pub mod variable;

pub use authority::{FrameSchedule, Role, RoleProvider, SessionContext, SessionState};
pub use behavior::{
    AwardFn, Collectable, InteractionHandler, InteractionRegistry, register_input_relay,
};
pub use entity::{
    DespawnOutcome, Notification, NotificationKind, Owner, Position, Replicated, ReplicatedWorld,
    SpawnState,
};
pub use error::ReplicationError;
pub use invocation::{Invocation, InvocationRegistry};
pub use keystone_net::PeerId;
pub use peer::{FrameStats, Peer, PeerSettings};
pub use protocol::Protocol;
pub use replication::{NetworkId, ReplicationSet, VariableDescriptor};
pub use replicator::Replicator;
pub use spawner::Spawner;
pub use template::{EntityTemplate, TemplateId, TemplateRegistry};
pub use variable::{Permissions, ReplicatedValue, Scope};
