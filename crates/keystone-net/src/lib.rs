//! Peer-to-peer plumbing: peer identity, wire messages, and the transport
//! boundary used by the replication layer.

pub mod messages;
pub mod transport;

pub use messages::{
    Despawn, Invoke, Message, MessageError, OwnerChanged, PROTOCOL_VERSION, Spawn, VariableUpdate,
    VariableValue, VariableWrite, deserialize_message, serialize_message,
};
pub use transport::{Datagram, MemoryNetwork, MemoryTransport, PeerId, Transport, TransportError};
