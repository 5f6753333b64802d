//! Replication error types.

use crate::replication::NetworkId;
use crate::template::TemplateId;

/// Failures reported to the local caller of a replication operation.
///
/// None of these end the session. Rejections decided by the authority on
/// behalf of a remote peer are never turned into errors; they are dropped
/// on the authority and the caller gets no confirmation either way.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// Write attempted by a role outside the variable's write scope.
    #[error("permission violation writing `{variable}` on entity {entity}")]
    PermissionViolation {
        /// Entity carrying the variable.
        entity: NetworkId,
        /// Variable tag.
        variable: &'static str,
    },

    /// The spawn pool had no entries.
    #[error("spawn pool is empty")]
    EmptyPool,

    /// The selected template is not registered.
    #[error("template {0} is not registered")]
    NullTemplate(TemplateId),

    /// The instantiated template lacks the replication capability.
    #[error("template {0} is not replicable")]
    NotReplicable(TemplateId),

    /// The entity is not live on this peer.
    #[error("unknown entity {0}")]
    UnknownEntity(NetworkId),

    /// The entity does not carry the requested variable.
    #[error("entity {entity} has no variable `{variable}`")]
    MissingVariable {
        /// Entity that was addressed.
        entity: NetworkId,
        /// Variable tag.
        variable: &'static str,
    },

    /// The value type was never registered with the protocol.
    #[error("variable type `{0}` is not registered")]
    UnregisteredVariable(&'static str),

    /// Postcard failed to encode a value.
    #[error("encode error: {0}")]
    Encode(#[from] postcard::Error),
}
