//! Replication wire messages and serialization.
//!
//! All messages are serialized with [`postcard`] and prefixed with a protocol
//! version byte. Use [`serialize_message`] and [`deserialize_message`] for
//! encoding/decoding. Payload values (variable contents, invocation
//! arguments) travel as opaque postcard bytes; only the replication layer
//! knows their concrete types.

use serde::{Deserialize, Serialize};

use crate::transport::PeerId;

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Top-level replication message. The enum discriminant is the type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    // --- Authority -> peers ---
    /// An entity became live on the authority.
    Spawn(Spawn),
    /// An entity was removed on the authority.
    Despawn(Despawn),
    /// A new value for one replicated variable.
    VariableUpdate(VariableUpdate),
    /// The owning peer of an entity changed.
    OwnerChanged(OwnerChanged),

    // --- Peers -> authority ---
    /// A peer asks the authority to apply a variable write.
    VariableWrite(VariableWrite),
    /// A peer asks the authority to run a method on an entity.
    Invoke(Invoke),
}

impl Message {
    /// Returns `true` for messages only the authority may send.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            Message::Spawn(_)
                | Message::Despawn(_)
                | Message::VariableUpdate(_)
                | Message::OwnerChanged(_)
        )
    }

    /// Short name used in log output.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Spawn(_) => "spawn",
            Message::Despawn(_) => "despawn",
            Message::VariableUpdate(_) => "variable_update",
            Message::OwnerChanged(_) => "owner_changed",
            Message::VariableWrite(_) => "variable_write",
            Message::Invoke(_) => "invoke",
        }
    }
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// One serialized variable value, as carried in spawn snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableValue {
    /// Registered variable tag.
    pub tag: String,
    /// Authority write sequence the value belongs to.
    pub sequence: u64,
    /// Postcard-encoded value.
    pub value: Vec<u8>,
}

/// Spawn notification with the initial state a peer is allowed to see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Spawn {
    /// Network identifier assigned by the authority.
    pub entity_id: u64,
    /// Template the receiving peer instantiates locally.
    pub template: u32,
    /// Owning peer.
    pub owner: PeerId,
    /// Spawn position (x, y).
    pub position: [f32; 2],
    /// Variables readable by the recipient.
    pub variables: Vec<VariableValue>,
}

/// Despawn notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Despawn {
    /// Network identifier of the removed entity.
    pub entity_id: u64,
}

/// Authoritative value for one variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableUpdate {
    /// Entity carrying the variable.
    pub entity_id: u64,
    /// Registered variable tag.
    pub tag: String,
    /// Authority write sequence; receivers drop anything not newer.
    pub sequence: u64,
    /// Postcard-encoded value.
    pub value: Vec<u8>,
}

/// Ownership change notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnerChanged {
    /// Entity whose owner changed.
    pub entity_id: u64,
    /// New owning peer.
    pub owner: PeerId,
}

/// Write request sent by a non-authoritative peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableWrite {
    /// Entity carrying the variable.
    pub entity_id: u64,
    /// Registered variable tag.
    pub tag: String,
    /// Postcard-encoded value.
    pub value: Vec<u8>,
}

/// Remote invocation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoke {
    /// Target entity.
    pub entity_id: u64,
    /// Registered method name.
    pub method: String,
    /// Postcard-encoded arguments.
    pub args: Vec<u8>,
    /// Only the target's owner may trigger the method.
    pub require_ownership: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during message deserialization.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard deserialization failed.
    #[error("deserialization error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize a [`Message`] into a versioned binary payload.
///
/// Wire format: `[version: u8] [postcard-encoded Message]`
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, postcard::Error> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a versioned binary payload into a [`Message`].
///
/// Returns an error if the version is unsupported or the payload is malformed.
pub fn deserialize_message(data: &[u8]) -> Result<Message, MessageError> {
    let (&version, body) = data.split_first().ok_or(MessageError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }

    Ok(postcard::from_bytes(body)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
