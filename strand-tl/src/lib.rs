//! TL binary serialization and the MTProto service schema.
//!
//! Only the part of the schema that the transport and session core speaks is
//! modelled here: the key exchange, acknowledgements, salts, pings and the
//! session notifications. Application methods are carried as opaque
//! [`Blob`]s produced by the layer above.
//!
//! # Overview
//!
//! | Module        | Contents                                                   |
//! |---------------|------------------------------------------------------------|
//! | [`types`]     | Concrete constructors (bare types) as `struct`s            |
//! | [`functions`] | RPC functions as `struct`s implementing [`RemoteCall`]     |
//! | [`enums`]     | Boxed types as `enum`s implementing [`Deserializable`]     |
//!
//! ```rust
//! use strand_tl::{functions, Serializable};
//!
//! let bytes = functions::Ping { ping_id: 7 }.to_bytes();
//! assert_eq!(&bytes[..4], &0x7abe77ecu32.to_le_bytes());
//! ```

#![deny(unsafe_code)]

#[macro_use]
mod macros;

pub mod deserialize;
pub mod enums;
pub mod functions;
pub mod serialize;
pub mod types;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// Constructors whose bodies are untyped and therefore decoded by hand in
/// the session layer.
pub mod ids {
    /// `rpc_result#f35c6d01 req_msg_id:long result:Object`
    pub const RPC_RESULT: u32 = 0xf35c6d01;
    /// `msg_container#73f1f8dc messages:vector<%Message>`
    pub const MSG_CONTAINER: u32 = 0x73f1f8dc;
    /// `gzip_packed#3072cfa1 packed_data:bytes`
    pub const GZIP_PACKED: u32 = 0x3072cfa1;
    /// `vector#1cb5c415`
    pub const VECTOR: u32 = crate::serialize::VECTOR_ID;
}

/// Bare vector: `vector` (lowercase) as opposed to the boxed `Vector`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Opaque blob of bytes that should be passed through without interpretation.
///
/// Used for already-serialized requests handed in by the caller and for
/// responses whose type the core does not know.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Every schema type has a unique 32-bit constructor ID.
pub trait Identifiable {
    /// The constructor ID as specified in the TL schema.
    const CONSTRUCTOR_ID: u32;
    /// The constructor name as written in the TL schema.
    const NAME: &'static str;
}

/// Marks a function type that can be sent as an RPC call.
///
/// `Return` is the type the server will respond with.
pub trait RemoteCall: Serializable {
    /// The deserialized response type.
    type Return: Deserializable;
}

/// Raw calls: an already-serialized request whose answer is kept raw.
impl RemoteCall for Blob {
    type Return = Blob;
}

// ─── name_for_id ─────────────────────────────────────────────────────────────

macro_rules! names {
    ($id:ident; $($ty:ty),+ $(,)?) => {
        $( if $id == <$ty as Identifiable>::CONSTRUCTOR_ID {
            return Some(<$ty as Identifiable>::NAME);
        } )+
    };
}

/// Resolve a constructor ID to its schema name, for logs and error messages.
pub fn name_for_id(id: u32) -> Option<&'static str> {
    match id {
        ids::RPC_RESULT => return Some("rpc_result"),
        ids::MSG_CONTAINER => return Some("msg_container"),
        ids::GZIP_PACKED => return Some("gzip_packed"),
        ids::VECTOR => return Some("vector"),
        _ => {}
    }
    names!(id;
        types::ResPq, types::PQInnerDataDc, types::ServerDhParamsFail,
        types::ServerDhParamsOk, types::ServerDhInnerData, types::ClientDhInnerData,
        types::DhGenOk, types::DhGenRetry, types::DhGenFail,
        types::RpcError, types::MsgsAck, types::BadMsgNotification, types::BadServerSalt,
        types::NewSessionCreated, types::Pong, types::FutureSalt, types::FutureSalts,
        types::MsgDetailedInfo, types::MsgNewDetailedInfo, types::MsgsStateReq,
        types::MsgResendReq, types::DestroySessionOk, types::DestroySessionNone,
        functions::ReqPqMulti, functions::ReqDhParams, functions::SetClientDhParams,
        functions::Ping, functions::PingDelayDisconnect, functions::GetFutureSalts,
        functions::DestroySession,
    );
    None
}
