//! Encrypted MTProto 2.0 session (post auth-key).
//!
//! Once you have a [`Finished`](crate::authentication::Finished) from the key
//! exchange, build an [`EncryptedSession`] and route every later message
//! through it:
//!
//! * [`EncryptedSession::push`] queues a request and returns its `msg_id`.
//! * [`EncryptedSession::finalize`] packs everything queued (plus pending
//!   acknowledgements) into one encrypted payload, using a container when
//!   more than one message is waiting.
//! * [`EncryptedSession::process`] decrypts a server payload and sorts what
//!   it contains into RPC results, acknowledgements and pushed updates,
//!   fixing up salts, clock skew and session state along the way.
//!
//! Nothing here performs I/O.

use std::collections::VecDeque;
use std::fmt;
use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use strand_crypto::{AuthKey, CryptoError, decrypt_data_v2, encrypt_data_v2, random_bytes};
use strand_tl::{Cursor, Deserializable, Identifiable, Serializable, enums, functions, ids, types};

use crate::message::{Message, MsgId, MsgIdGenerator, SeqNo};
use crate::plain::le_array;

/// Most messages a single container may carry.
pub const MAX_CONTAINER_MESSAGES: usize = 100;

/// Largest container body, in bytes.
pub const MAX_CONTAINER_LEN: usize = 1_044_448;

/// Below this many known future salts the session asks for more.
pub const SALT_REFILL_THRESHOLD: usize = 3;

const FUTURE_SALTS_REQUESTED: i32 = 64;

/// Seconds a salt stays usable after its window closed, or after the server
/// switched us to another one.
pub const SALT_GRACE: i32 = 60;

/// How many sent containers are remembered to map a `bad_msg_notification`
/// about the container back to the messages inside it.
const REMEMBERED_CONTAINERS: usize = 64;

/// Upper bound for an inflated `gzip_packed` body.
const MAX_INFLATED_LEN: u64 = 16 * 1024 * 1024;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors that make an incoming payload unusable as a whole.
#[derive(Clone, Debug, PartialEq)]
pub enum DeserializeError {
    /// The crypto layer rejected the payload.
    Crypto(CryptoError),
    /// A service message did not decode.
    Decode(strand_tl::deserialize::Error),
    /// The payload belongs to another session.
    SessionMismatch { expected: i64, got: i64 },
    /// A length field disagrees with the bytes that follow.
    BadLength { declared: i32, available: usize },
    /// A `gzip_packed` body could not be inflated.
    Decompress,
    /// A container inside a container, or `gzip_packed` inside `gzip_packed`.
    Nested { constructor: u32 },
}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::SessionMismatch { expected, got } => {
                write!(f, "session_id mismatch: expected {expected:#x}, got {got:#x}")
            }
            Self::BadLength { declared, available } => {
                write!(f, "declared length {declared} but {available} bytes available")
            }
            Self::Decompress => write!(f, "gzip_packed body did not inflate"),
            Self::Nested { constructor } => write!(
                f,
                "nested {} is not allowed",
                strand_tl::name_for_id(*constructor).unwrap_or("wrapper")
            ),
        }
    }
}

impl std::error::Error for DeserializeError {}

impl From<CryptoError> for DeserializeError {
    fn from(e: CryptoError) -> Self { Self::Crypto(e) }
}

impl From<strand_tl::deserialize::Error> for DeserializeError {
    fn from(e: strand_tl::deserialize::Error) -> Self { Self::Decode(e) }
}

/// The server refused a message through `bad_msg_notification` or
/// `bad_server_salt`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BadMessage {
    pub code: i32,
}

impl BadMessage {
    /// Whether sending the same request again (with a new `msg_id`) can
    /// succeed. The session has already applied whatever fix the code calls
    /// for by the time this is reported.
    pub fn retryable(&self) -> bool {
        matches!(self.code, 16 | 17 | 20 | 32 | 33 | 48 | 64)
    }

    pub fn description(&self) -> &'static str {
        match self.code {
            16 => "msg_id too low",
            17 => "msg_id too high",
            18 => "incorrect two lower order msg_id bits",
            19 => "container msg_id is the same as msg_id of a previously received message",
            20 => "message too old",
            32 => "msg_seqno too low",
            33 => "msg_seqno too high",
            34 => "an even msg_seqno expected",
            35 => "odd msg_seqno expected",
            48 => "incorrect server salt",
            64 => "invalid container",
            _ => "unknown explanation",
        }
    }
}

impl fmt::Display for BadMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad message (code {}): {}", self.code, self.description())
    }
}

/// Why a single request failed.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestError {
    /// `rpc_error` from the server.
    Rpc(types::RpcError),
    /// The message carrying the request was refused.
    BadMessage(BadMessage),
}

// ─── Output ──────────────────────────────────────────────────────────────────

/// A reply correlated to one of our `msg_id`s.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub msg_id: MsgId,
    pub result: Result<Vec<u8>, RequestError>,
}

/// Everything one incoming payload contained.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Deserialization {
    pub rpc_results: Vec<RpcResult>,
    /// Our messages the server acknowledged.
    pub acks: Vec<MsgId>,
    /// Bodies not addressed to any request (pushed updates).
    pub updates: Vec<Vec<u8>>,
    /// `first_msg_id` of a `new_session_created`.
    pub new_session: Option<MsgId>,
}

// ─── Salts ───────────────────────────────────────────────────────────────────

/// A server salt and the server-time window it is valid in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt {
    pub salt: i64,
    pub valid_since: i32,
    pub valid_until: i32,
}

impl Salt {
    /// A salt told to us without a window, such as the handshake salt.
    pub fn unbounded(salt: i64) -> Self {
        Self { salt, valid_since: 0, valid_until: i32::MAX }
    }

    fn is_unbounded(&self) -> bool { self.valid_until == i32::MAX }
}

impl From<&types::FutureSalt> for Salt {
    fn from(s: &types::FutureSalt) -> Self {
        Self { salt: s.salt, valid_since: s.valid_since, valid_until: s.valid_until }
    }
}

/// Where an incoming message sits. Containers hold plain messages only and
/// inflated bodies are never packed again.
#[derive(Clone, Copy, Debug, Default)]
struct Nesting {
    in_container: bool,
    inflated: bool,
}

// ─── Session ─────────────────────────────────────────────────────────────────

struct Outgoing {
    msg_id: MsgId,
    content_related: bool,
    body: Vec<u8>,
}

/// MTProto 2.0 encrypted session state.
pub struct EncryptedSession {
    auth_key: AuthKey,
    session_id: i64,
    msg_ids: MsgIdGenerator,
    seq: SeqNo,
    /// Sorted by `valid_since`.
    salts: Vec<Salt>,
    pending_ack: Vec<MsgId>,
    queue: VecDeque<Outgoing>,
    containers: VecDeque<(MsgId, Vec<MsgId>)>,
    salt_request: Option<MsgId>,
    /// `(old, new)` ids of queued messages re-stamped by `finalize`.
    renumbered: Vec<(MsgId, MsgId)>,
}

impl EncryptedSession {
    /// Start a session with a random id.
    pub fn new(auth_key: AuthKey, first_salt: i64, time_offset: i32) -> Result<Self, CryptoError> {
        Ok(Self {
            auth_key,
            session_id: i64::from_le_bytes(random_bytes()?),
            msg_ids: MsgIdGenerator::new(time_offset),
            seq: SeqNo::default(),
            salts: vec![Salt::unbounded(first_salt)],
            pending_ack: Vec::new(),
            queue: VecDeque::new(),
            containers: VecDeque::new(),
            salt_request: None,
            renumbered: Vec::new(),
        })
    }

    pub fn auth_key(&self) -> &AuthKey { &self.auth_key }

    pub fn session_id(&self) -> i64 { self.session_id }

    /// Clock skew in seconds (server − local).
    pub fn time_offset(&self) -> i32 { self.msg_ids.time_offset() }

    /// Known salts, oldest first.
    pub fn salts(&self) -> &[Salt] { &self.salts }

    /// Whether [`finalize`](Self::finalize) has anything to send.
    pub fn has_pending(&self) -> bool { !self.queue.is_empty() || !self.pending_ack.is_empty() }

    /// Number of queued messages.
    pub fn queued(&self) -> usize { self.queue.len() }

    /// Begin a new session over the same key (new id, sequence from zero).
    /// Queued messages and pending acknowledgements are discarded.
    pub fn reset_session(&mut self) -> Result<(), CryptoError> {
        self.renew_session()?;
        self.queue.clear();
        self.pending_ack.clear();
        self.containers.clear();
        self.salt_request = None;
        self.renumbered.clear();
        Ok(())
    }

    fn renew_session(&mut self) -> Result<(), CryptoError> {
        self.session_id = i64::from_le_bytes(random_bytes()?);
        self.seq.reset();
        log::info!("[strand] new session id {:#x}", self.session_id);
        Ok(())
    }

    /// Recompute the clock skew from a server-generated `msg_id`.
    pub fn correct_time_offset(&mut self, server_msg_id: MsgId) -> i32 {
        let offset = self.msg_ids.correct(server_msg_id);
        log::info!("[strand] corrected time offset to {offset}s");
        offset
    }

    // ── Outgoing ─────────────────────────────────────────────────────────

    /// Queue a content-related message (a request). Returns its `msg_id`.
    pub fn push(&mut self, body: Vec<u8>) -> MsgId {
        self.enqueue(body, true)
    }

    /// Queue a service message that needs no acknowledgement.
    pub fn push_service(&mut self, body: Vec<u8>) -> MsgId {
        self.enqueue(body, false)
    }

    fn enqueue(&mut self, body: Vec<u8>, content_related: bool) -> MsgId {
        let msg_id = self.msg_ids.next();
        self.queue.push_back(Outgoing { msg_id, content_related, body });
        msg_id
    }

    /// Pack queued messages and pending acknowledgements into one encrypted
    /// payload. Returns `None` when there is nothing to send.
    ///
    /// Messages that do not fit the container caps stay queued.
    pub fn finalize(&mut self) -> Result<Option<Vec<u8>>, CryptoError> {
        if !self.queue.is_empty() {
            self.maybe_request_salts();
        }
        if !self.pending_ack.is_empty() {
            let ack = types::MsgsAck { msg_ids: std::mem::take(&mut self.pending_ack) };
            self.push_service(ack.to_bytes());
        }

        let mut batch: Vec<Message> = Vec::new();
        let mut size = 0;
        while let Some(next) = self.queue.front() {
            let len = Message::HEADER_LEN + next.body.len();
            if !batch.is_empty() && (batch.len() == MAX_CONTAINER_MESSAGES || size + len > MAX_CONTAINER_LEN) {
                break;
            }
            let Some(out) = self.queue.pop_front() else { break };
            let seq_no = self.seq.next(out.content_related);
            batch.push(Message { msg_id: out.msg_id, seq_no, body: out.body });
            size += len;
        }

        let message = match batch.len() {
            0 => return Ok(None),
            1 => batch.swap_remove(0),
            n => {
                let mut body = Vec::with_capacity(8 + size);
                body.extend(ids::MSG_CONTAINER.to_le_bytes());
                body.extend((n as i32).to_le_bytes());
                for m in &batch {
                    m.write_to(&mut body);
                }
                let msg_id = self.msg_ids.next();
                self.remember_container(msg_id, batch.iter().map(|m| m.msg_id).collect());
                log::trace!("[strand] packed {n} messages into container {msg_id:#x}");
                self.restamp_queue();
                Message { msg_id, seq_no: self.seq.next(false), body }
            }
        };

        self.encrypt(&message).map(Some)
    }

    /// Ids changed by [`finalize`](Self::finalize) since the last call, as
    /// `(old, new)` pairs.
    ///
    /// Messages that did not fit a full container get new ids above the
    /// container's, so ids keep increasing in send order.
    pub fn take_renumbered(&mut self) -> Vec<(MsgId, MsgId)> {
        std::mem::take(&mut self.renumbered)
    }

    fn restamp_queue(&mut self) {
        for out in &mut self.queue {
            let fresh = self.msg_ids.next();
            if self.salt_request == Some(out.msg_id) {
                self.salt_request = Some(fresh);
            }
            self.renumbered.push((out.msg_id, fresh));
            out.msg_id = fresh;
        }
    }

    fn encrypt(&mut self, message: &Message) -> Result<Vec<u8>, CryptoError> {
        let salt = self.current_salt();
        let mut plaintext = Vec::with_capacity(16 + message.wire_len());
        plaintext.extend(salt.to_le_bytes());
        plaintext.extend(self.session_id.to_le_bytes());
        message.write_to(&mut plaintext);
        encrypt_data_v2(&plaintext, &self.auth_key)
    }

    fn remember_container(&mut self, msg_id: MsgId, inner: Vec<MsgId>) {
        if self.containers.len() == REMEMBERED_CONTAINERS {
            self.containers.pop_front();
        }
        self.containers.push_back((msg_id, inner));
    }

    /// The newest salt valid at the current server time, else the newest one
    /// still in its grace period. Salts past [`SALT_GRACE`] are pruned, but
    /// the last one is kept as a fallback.
    fn current_salt(&mut self) -> i64 {
        let now = self.msg_ids.server_time();
        let fallback = self.salts.last().copied();
        self.salts.retain(|s| s.valid_until.saturating_add(SALT_GRACE) > now);
        if self.salts.is_empty() {
            self.salts.extend(fallback);
        }
        self.salts
            .iter()
            .rev()
            .find(|s| s.valid_since <= now && s.valid_until > now)
            .or_else(|| self.salts.iter().rev().find(|s| s.valid_since <= now))
            .or(self.salts.first())
            .map_or(0, |s| s.salt)
    }

    /// Switch to a salt the server told us about. Known future salts stay;
    /// the salt used so far remains valid for [`SALT_GRACE`] seconds.
    fn adopt_salt(&mut self, salt: i64) {
        let now = self.msg_ids.server_time();
        for s in self.salts.iter_mut().filter(|s| s.is_unbounded()) {
            s.valid_until = now.saturating_add(SALT_GRACE);
        }
        self.salts.retain(|s| s.salt != salt);
        self.salts.push(Salt { salt, valid_since: now, valid_until: i32::MAX });
        self.salts.sort_by_key(|s| s.valid_since);
    }

    fn maybe_request_salts(&mut self) {
        if self.salt_request.is_some() {
            return;
        }
        let now = self.msg_ids.server_time();
        let known = self.salts.iter().filter(|s| !s.is_unbounded() && s.valid_until > now).count();
        if known < SALT_REFILL_THRESHOLD {
            let request = functions::GetFutureSalts { num: FUTURE_SALTS_REQUESTED };
            self.salt_request = Some(self.push(request.to_bytes()));
            log::debug!("[strand] requesting future salts ({known} left)");
        }
    }

    fn merge_salts(&mut self, salts: &[types::FutureSalt]) {
        for salt in salts.iter().map(Salt::from) {
            if !self.salts.iter().any(|s| s.salt == salt.salt) {
                self.salts.push(salt);
            }
        }
        self.salts.sort_by_key(|s| s.valid_since);
    }

    // ── Incoming ─────────────────────────────────────────────────────────

    /// Decrypt and classify a server payload.
    pub fn process(&mut self, frame: &[u8]) -> Result<Deserialization, DeserializeError> {
        let plaintext = decrypt_data_v2(frame, &self.auth_key)?;
        if plaintext.len() < 32 {
            return Err(DeserializeError::BadLength { declared: 32, available: plaintext.len() });
        }

        let session_id = i64::from_le_bytes(le_array(&plaintext[8..16]));
        if session_id != self.session_id {
            return Err(DeserializeError::SessionMismatch { expected: self.session_id, got: session_id });
        }
        let msg_id = i64::from_le_bytes(le_array(&plaintext[16..24]));
        let seq_no = i32::from_le_bytes(le_array(&plaintext[24..28]));
        let declared = i32::from_le_bytes(le_array(&plaintext[28..32]));
        let available = plaintext.len() - 32;
        if declared < 0 || declared as usize > available {
            return Err(DeserializeError::BadLength { declared, available });
        }

        let body = plaintext[32..32 + declared as usize].to_vec();
        let mut out = Deserialization::default();
        self.process_message(Message { msg_id, seq_no, body }, Nesting::default(), &mut out)?;
        Ok(out)
    }

    fn process_message(
        &mut self,
        message: Message,
        nesting: Nesting,
        out: &mut Deserialization,
    ) -> Result<(), DeserializeError> {
        if message.requires_ack() {
            self.pending_ack.push(message.msg_id);
        }

        let id = Cursor::from_slice(&message.body).peek_u32()?;
        match id {
            ids::MSG_CONTAINER if nesting.in_container => Err(DeserializeError::Nested { constructor: id }),
            ids::MSG_CONTAINER => self.handle_container(&message.body, nesting, out),
            ids::GZIP_PACKED if nesting.inflated => Err(DeserializeError::Nested { constructor: id }),
            ids::GZIP_PACKED => {
                let body = gzip_inflate(&message.body)?;
                // Already queued for acknowledgement above.
                let inner = Message { msg_id: message.msg_id, seq_no: message.seq_no & !1, body };
                self.process_message(inner, Nesting { inflated: true, ..nesting }, out)
            }
            ids::RPC_RESULT => self.handle_rpc_result(&message.body, out),
            id if id == types::MsgsAck::CONSTRUCTOR_ID => {
                out.acks.extend(types::MsgsAck::from_bytes(&message.body)?.msg_ids);
                Ok(())
            }
            id if id == types::BadMsgNotification::CONSTRUCTOR_ID
                || id == types::BadServerSalt::CONSTRUCTOR_ID =>
            {
                self.handle_bad_notification(&message, out)
            }
            id if id == types::NewSessionCreated::CONSTRUCTOR_ID => {
                let created = types::NewSessionCreated::from_bytes(&message.body)?;
                log::info!(
                    "[strand] new_session_created: first_msg_id={:#x} unique_id={:#x}",
                    created.first_msg_id,
                    created.unique_id
                );
                self.adopt_salt(created.server_salt);
                out.new_session = Some(created.first_msg_id);
                Ok(())
            }
            id if id == types::Pong::CONSTRUCTOR_ID => {
                let pong = types::Pong::from_bytes(&message.body)?;
                self.resolve(pong.msg_id, Ok(message.body), out);
                Ok(())
            }
            id if id == types::FutureSalts::CONSTRUCTOR_ID => {
                let salts = types::FutureSalts::from_bytes(&message.body)?;
                self.merge_salts(&salts.salts);
                self.resolve(salts.req_msg_id, Ok(message.body), out);
                Ok(())
            }
            id if id == types::MsgDetailedInfo::CONSTRUCTOR_ID
                || id == types::MsgNewDetailedInfo::CONSTRUCTOR_ID =>
            {
                let answer_msg_id = match enums::MsgDetailedInfo::from_bytes(&message.body)? {
                    enums::MsgDetailedInfo::Info(x) => x.answer_msg_id,
                    enums::MsgDetailedInfo::New(x) => x.answer_msg_id,
                };
                self.pending_ack.push(answer_msg_id);
                Ok(())
            }
            id if id == types::MsgsStateReq::CONSTRUCTOR_ID
                || id == types::MsgResendReq::CONSTRUCTOR_ID
                || id == types::DestroySessionOk::CONSTRUCTOR_ID
                || id == types::DestroySessionNone::CONSTRUCTOR_ID =>
            {
                log::debug!(
                    "[strand] ignoring {}",
                    strand_tl::name_for_id(id).unwrap_or("service message")
                );
                Ok(())
            }
            _ => {
                out.updates.push(message.body);
                Ok(())
            }
        }
    }

    fn handle_container(
        &mut self,
        body: &[u8],
        nesting: Nesting,
        out: &mut Deserialization,
    ) -> Result<(), DeserializeError> {
        let mut cursor = Cursor::from_slice(body);
        u32::deserialize(&mut cursor)?;
        let count = i32::deserialize(&mut cursor)?;
        if count < 0 || count as usize > cursor.remaining() / Message::HEADER_LEN {
            return Err(DeserializeError::BadLength { declared: count, available: cursor.remaining() });
        }
        for _ in 0..count {
            let msg_id = i64::deserialize(&mut cursor)?;
            let seq_no = i32::deserialize(&mut cursor)?;
            let len = i32::deserialize(&mut cursor)?;
            if len < 0 || len as usize > cursor.remaining() {
                return Err(DeserializeError::BadLength { declared: len, available: cursor.remaining() });
            }
            let body = cursor.read_slice(len as usize)?.to_vec();
            self.process_message(Message { msg_id, seq_no, body }, Nesting { in_container: true, ..nesting }, out)?;
        }
        Ok(())
    }

    fn handle_rpc_result(&mut self, body: &[u8], out: &mut Deserialization) -> Result<(), DeserializeError> {
        let mut cursor = Cursor::from_slice(body);
        u32::deserialize(&mut cursor)?;
        let req_msg_id = i64::deserialize(&mut cursor)?;
        let mut result = Vec::new();
        cursor.read_to_end(&mut result);

        if Cursor::from_slice(&result).peek_u32()? == ids::GZIP_PACKED {
            result = gzip_inflate(&result)?;
        }
        let id = Cursor::from_slice(&result).peek_u32()?;
        if id == types::RpcError::CONSTRUCTOR_ID {
            let error = types::RpcError::from_bytes(&result)?;
            self.resolve(req_msg_id, Err(RequestError::Rpc(error)), out);
        } else {
            if id == types::FutureSalts::CONSTRUCTOR_ID {
                let salts = types::FutureSalts::from_bytes(&result)?;
                self.merge_salts(&salts.salts);
            }
            self.resolve(req_msg_id, Ok(result), out);
        }
        Ok(())
    }

    fn handle_bad_notification(&mut self, message: &Message, out: &mut Deserialization) -> Result<(), DeserializeError> {
        let (bad_msg_id, code) = match enums::BadMsgNotification::from_bytes(&message.body)? {
            enums::BadMsgNotification::ServerSalt(x) => {
                log::debug!("[strand] bad_server_salt, switching to {:#x}", x.new_server_salt);
                self.adopt_salt(x.new_server_salt);
                (x.bad_msg_id, x.error_code)
            }
            enums::BadMsgNotification::Notification(x) => {
                log::warn!(
                    "[strand] bad_msg_notification for {:#x}: {}",
                    x.bad_msg_id,
                    BadMessage { code: x.error_code }
                );
                match x.error_code {
                    16 | 17 => {
                        self.correct_time_offset(message.msg_id);
                    }
                    32 | 33 => {
                        self.renew_session()?;
                    }
                    _ => {}
                }
                (x.bad_msg_id, x.error_code)
            }
        };

        let bad = BadMessage { code };
        let inner = self
            .containers
            .iter()
            .position(|(id, _)| *id == bad_msg_id)
            .and_then(|at| self.containers.remove(at))
            .map(|(_, inner)| inner);
        match inner {
            Some(inner) => {
                for msg_id in inner {
                    self.resolve(msg_id, Err(RequestError::BadMessage(bad)), out);
                }
            }
            None => self.resolve(bad_msg_id, Err(RequestError::BadMessage(bad)), out),
        }
        Ok(())
    }

    /// Report a result unless it answers a request the session made itself.
    fn resolve(&mut self, msg_id: MsgId, result: Result<Vec<u8>, RequestError>, out: &mut Deserialization) {
        if self.salt_request == Some(msg_id) {
            self.salt_request = None;
            if let Err(e) = result {
                log::debug!("[strand] get_future_salts failed: {e:?}");
            }
            return;
        }
        out.rpc_results.push(RpcResult { msg_id, result });
    }
}

impl fmt::Debug for EncryptedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSession")
            .field("auth_key", &self.auth_key)
            .field("session_id", &self.session_id)
            .field("time_offset", &self.msg_ids.time_offset())
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Inflate the `packed_data` of a `gzip_packed` body. Servers send gzip, but
/// a bare zlib stream is accepted too.
pub fn gzip_inflate(body: &[u8]) -> Result<Vec<u8>, DeserializeError> {
    let mut cursor = Cursor::from_slice(body);
    u32::deserialize(&mut cursor)?;
    let packed = Vec::<u8>::deserialize(&mut cursor)?;

    let mut out = Vec::new();
    if GzDecoder::new(&packed[..]).take(MAX_INFLATED_LEN).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    out.clear();
    ZlibDecoder::new(&packed[..])
        .take(MAX_INFLATED_LEN)
        .read_to_end(&mut out)
        .map_err(|_| DeserializeError::Decompress)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> EncryptedSession {
        EncryptedSession::new(AuthKey::from_bytes([3; 256]), 0x1234, 0).unwrap()
    }

    #[test]
    fn bad_message_retryability() {
        for code in [16, 17, 20, 32, 33, 48, 64] {
            assert!(BadMessage { code }.retryable(), "{code}");
        }
        for code in [18, 19, 34, 35] {
            assert!(!BadMessage { code }.retryable(), "{code}");
        }
    }

    #[test]
    fn finalize_with_nothing_queued() {
        assert_eq!(session().finalize().unwrap(), None);
    }

    #[test]
    fn pushed_ids_increase() {
        let mut s = session();
        let a = s.push(vec![0; 4]);
        let b = s.push_service(vec![0; 4]);
        assert!(b > a);
        assert_eq!(a % 4, 0);
    }

    #[test]
    fn salt_window_selection() {
        let mut s = session();
        let now = s.msg_ids.server_time();
        s.merge_salts(&[
            types::FutureSalt { valid_since: now - 100, valid_until: now + 100, salt: 1 },
            types::FutureSalt { valid_since: now + 100, valid_until: now + 200, salt: 2 },
            types::FutureSalt { valid_since: now - 300, valid_until: now - 200, salt: 3 },
        ]);
        assert_eq!(s.current_salt(), 1);
        assert!(s.salts().iter().all(|x| x.salt != 3));
    }

    #[test]
    fn recently_expired_salt_is_kept_for_the_grace_period() {
        let mut s = session();
        let now = s.msg_ids.server_time();
        s.salts.clear();
        s.merge_salts(&[types::FutureSalt { valid_since: now - 1000, valid_until: now - 10, salt: 1 }]);
        assert_eq!(s.current_salt(), 1);

        s.merge_salts(&[types::FutureSalt { valid_since: now - 5, valid_until: now + 100, salt: 2 }]);
        assert_eq!(s.current_salt(), 2);
        assert!(s.salts().iter().any(|x| x.salt == 1));
    }

    #[test]
    fn adopted_salt_keeps_future_salts_and_the_previous_one() {
        let mut s = session();
        let now = s.msg_ids.server_time();
        s.merge_salts(&[types::FutureSalt { valid_since: now + 100, valid_until: now + 200, salt: 5 }]);

        s.adopt_salt(0x777);
        assert_eq!(s.current_salt(), 0x777);
        let previous = s.salts().iter().find(|x| x.salt == 0x1234).copied().unwrap();
        assert!(previous.valid_until <= now + SALT_GRACE + 1);
        assert!(s.salts().iter().any(|x| x.salt == 5));
    }

    #[test]
    fn salts_are_requested_with_the_first_request() {
        let mut s = session();
        s.push(vec![0; 4]);
        s.finalize().unwrap();
        assert!(s.salt_request.is_some());
    }

    #[test]
    fn inflate_accepts_gzip() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello, hello, hello").unwrap();
        let packed = enc.finish().unwrap();

        let mut body = ids::GZIP_PACKED.to_le_bytes().to_vec();
        packed.serialize(&mut body);
        assert_eq!(gzip_inflate(&body).unwrap(), b"hello, hello, hello");
    }
}
