//! Concrete constructors of the MTProto service schema.

use crate::deserialize::{Buffer, Error, Result};
use crate::{Deserializable, Identifiable, RawVec, Serializable};

// ─── Key exchange ────────────────────────────────────────────────────────────

tl_struct! {
    #[tl(id = 0x05162463, name = "resPQ")]
    pub struct ResPq {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        /// Big-endian product of two primes.
        pub pq: Vec<u8>,
        pub server_public_key_fingerprints: Vec<i64>,
    }
}

tl_struct! {
    /// RSA-encrypted payload of `req_DH_params`; carries the target DC.
    #[tl(id = 0xa9f55f95, name = "p_q_inner_data_dc")]
    pub struct PQInnerDataDc {
        pub pq: Vec<u8>,
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce: [u8; 32],
        pub dc: i32,
    }
}

tl_struct! {
    #[tl(id = 0x79cb045d, name = "server_DH_params_fail")]
    pub struct ServerDhParamsFail {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash: [u8; 16],
    }
}

tl_struct! {
    #[tl(id = 0xd0e8075c, name = "server_DH_params_ok")]
    pub struct ServerDhParamsOk {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        /// AES-IGE encrypted `sha1(answer) ‖ answer ‖ padding`.
        pub encrypted_answer: Vec<u8>,
    }
}

tl_struct! {
    #[tl(id = 0xb5890dba, name = "server_DH_inner_data")]
    pub struct ServerDhInnerData {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub g: i32,
        pub dh_prime: Vec<u8>,
        pub g_a: Vec<u8>,
        pub server_time: i32,
    }
}

tl_struct! {
    #[tl(id = 0x6643b654, name = "client_DH_inner_data")]
    pub struct ClientDhInnerData {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub retry_id: i64,
        pub g_b: Vec<u8>,
    }
}

tl_struct! {
    #[tl(id = 0x3bcbf734, name = "dh_gen_ok")]
    pub struct DhGenOk {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash1: [u8; 16],
    }
}

tl_struct! {
    #[tl(id = 0x46dc1fb9, name = "dh_gen_retry")]
    pub struct DhGenRetry {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash2: [u8; 16],
    }
}

tl_struct! {
    #[tl(id = 0xa69dae02, name = "dh_gen_fail")]
    pub struct DhGenFail {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash3: [u8; 16],
    }
}

// ─── Service messages ────────────────────────────────────────────────────────

tl_struct! {
    #[tl(id = 0x2144ca19, name = "rpc_error")]
    pub struct RpcError {
        pub error_code: i32,
        pub error_message: String,
    }
}

tl_struct! {
    #[tl(id = 0x62d6b459, name = "msgs_ack")]
    pub struct MsgsAck {
        pub msg_ids: Vec<i64>,
    }
}

tl_struct! {
    #[tl(id = 0xa7eff811, name = "bad_msg_notification")]
    pub struct BadMsgNotification {
        pub bad_msg_id: i64,
        pub bad_msg_seqno: i32,
        pub error_code: i32,
    }
}

tl_struct! {
    #[tl(id = 0xedab447b, name = "bad_server_salt")]
    pub struct BadServerSalt {
        pub bad_msg_id: i64,
        pub bad_msg_seqno: i32,
        pub error_code: i32,
        pub new_server_salt: i64,
    }
}

tl_struct! {
    #[tl(id = 0x9ec20908, name = "new_session_created")]
    pub struct NewSessionCreated {
        pub first_msg_id: i64,
        pub unique_id: i64,
        pub server_salt: i64,
    }
}

tl_struct! {
    #[tl(id = 0x347773c5, name = "pong")]
    pub struct Pong {
        pub msg_id: i64,
        pub ping_id: i64,
    }
}

tl_struct! {
    #[tl(id = 0x0949d9dc, name = "future_salt")]
    pub struct FutureSalt {
        pub valid_since: i32,
        pub valid_until: i32,
        pub salt: i64,
    }
}

tl_struct! {
    #[tl(id = 0x276d3ec6, name = "msg_detailed_info")]
    pub struct MsgDetailedInfo {
        pub msg_id: i64,
        pub answer_msg_id: i64,
        pub bytes: i32,
        pub status: i32,
    }
}

tl_struct! {
    #[tl(id = 0x809db6df, name = "msg_new_detailed_info")]
    pub struct MsgNewDetailedInfo {
        pub answer_msg_id: i64,
        pub bytes: i32,
        pub status: i32,
    }
}

tl_struct! {
    #[tl(id = 0xda69fb52, name = "msgs_state_req")]
    pub struct MsgsStateReq {
        pub msg_ids: Vec<i64>,
    }
}

tl_struct! {
    #[tl(id = 0x7d861a08, name = "msg_resend_req")]
    pub struct MsgResendReq {
        pub msg_ids: Vec<i64>,
    }
}

tl_struct! {
    #[tl(id = 0xe22045fc, name = "destroy_session_ok")]
    pub struct DestroySessionOk {
        pub session_id: i64,
    }
}

tl_struct! {
    #[tl(id = 0x62d350c9, name = "destroy_session_none")]
    pub struct DestroySessionNone {
        pub session_id: i64,
    }
}

// ─── future_salts ────────────────────────────────────────────────────────────

/// `future_salts#ae500895 req_msg_id:long now:int salts:vector<future_salt>`.
///
/// Written by hand because `salts` is a *bare* vector of *bare* constructors,
/// which the generator does not model.
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalts {
    pub req_msg_id: i64,
    pub now: i32,
    pub salts: Vec<FutureSalt>,
}

impl Identifiable for FutureSalts {
    const CONSTRUCTOR_ID: u32 = 0xae500895;
    const NAME: &'static str = "future_salts";
}

impl Serializable for FutureSalts {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        self.now.serialize(buf);
        (self.salts.len() as i32).serialize(buf);
        for salt in &self.salts {
            salt.valid_since.serialize(buf);
            salt.valid_until.serialize(buf);
            salt.salt.serialize(buf);
        }
    }
}

impl Deserializable for FutureSalts {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        let req_msg_id = i64::deserialize(buf)?;
        let now = i32::deserialize(buf)?;
        let salts = RawVec::<BareFutureSalt>::deserialize(buf)?
            .0
            .into_iter()
            .map(|b| b.0)
            .collect();
        Ok(Self { req_msg_id, now, salts })
    }
}

struct BareFutureSalt(FutureSalt);

impl Deserializable for BareFutureSalt {
    fn deserialize(buf: Buffer) -> Result<Self> {
        FutureSalt::deserialize_bare(buf).map(BareFutureSalt)
    }
}
