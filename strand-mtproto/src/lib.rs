//! MTProto 2.0 session core, without I/O.
//!
//! This crate handles:
//! * Message framing (sequence numbers, message IDs, containers)
//! * Plaintext messages for the key exchange
//! * The key exchange itself, as a sequence of pure steps
//! * The encrypted session: salts, acknowledgements, service messages
//! * Stream framings (abridged, intermediate, full, obfuscated)
//!
//! It is intentionally transport-agnostic: bring your own TCP/WebSocket.

#![deny(unsafe_code)]

pub mod authentication;
pub mod encrypted;
pub mod message;
pub mod plain;
pub mod transport;

pub use authentication::{Finished, NegotiationError};
pub use encrypted::{
    BadMessage, DeserializeError, Deserialization, EncryptedSession, RequestError, RpcResult, Salt,
};
pub use message::{Message, MsgId, MsgIdGenerator};
pub use plain::PlainSession;
