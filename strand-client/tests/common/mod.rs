//! An in-process server speaking abridged MTProto over `tokio::io::duplex`.

#![allow(dead_code)]

pub mod key_server;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use strand_client::{BoxFuture, ByteStream, Config, Connector, InMemoryStorage, TrustedKeys};
use strand_crypto::{AuthKey, decrypt_data_v2_from_client, encrypt_data_v2_as_server};
use strand_mtproto::transport::{Abridged, Transport};
use strand_mtproto::{Message, PlainSession};
use strand_tl::{Identifiable, Serializable, functions, ids, types};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub const DC: i32 = 2;
pub const KEY: [u8; 256] = [0x42; 256];
pub const SERVER_SALT: i64 = 0x5a17;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

fn read_i32(b: &[u8]) -> i32 { i32::from_le_bytes(b[..4].try_into().unwrap()) }
fn read_i64(b: &[u8]) -> i64 { i64::from_le_bytes(b[..8].try_into().unwrap()) }

pub fn constructor(body: &[u8]) -> u32 {
    read_i32(body) as u32
}

fn parse_message(b: &[u8]) -> (Message, usize) {
    let len = read_i32(&b[12..]) as usize;
    let msg = Message { msg_id: read_i64(b), seq_no: read_i32(&b[8..]), body: b[16..16 + len].to_vec() };
    (msg, 16 + len)
}

// ─── Connector ────────────────────────────────────────────────────────────────

/// Hands the server half of every new connection to the test.
pub struct DuplexConnector {
    streams: mpsc::UnboundedSender<DuplexStream>,
    attempts: Arc<AtomicUsize>,
}

impl Connector for DuplexConnector {
    fn connect<'a>(&'a self, _addr: &'a str) -> BoxFuture<'a, io::Result<Box<dyn ByteStream>>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(1 << 20);
            self.streams
                .send(server)
                .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
            Ok(Box::new(client) as Box<dyn ByteStream>)
        })
    }
}

pub struct Harness {
    pub config: Config,
    accepts: mpsc::UnboundedReceiver<DuplexStream>,
    attempts: Arc<AtomicUsize>,
}

/// A config whose storage already holds [`KEY`], so connecting skips
/// negotiation.
pub fn harness() -> Harness {
    init_tracing();
    let (streams, accepts) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));
    let config = Config {
        dc_id: DC,
        dc_addr: "duplex".into(),
        storage: Arc::new(InMemoryStorage::with_auth_key(DC, KEY)),
        connector: Arc::new(DuplexConnector { streams, attempts: attempts.clone() }),
        trusted_keys: TrustedKeys::empty(),
        handshake_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(10),
        ..Config::default()
    };
    Harness { config, accepts, attempts }
}

impl Harness {
    /// Every connection attempt so far, refused ones included.
    pub fn connection_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Make every later connection attempt fail with `ConnectionRefused`.
    pub fn refuse_connections(&mut self) {
        self.accepts.close();
        while self.accepts.try_recv().is_ok() {}
    }

    /// Whether the client opened a connection nobody accepted yet.
    pub fn has_pending_connection(&mut self) -> bool {
        self.accepts.try_recv().is_ok()
    }

    /// The next connection the client opens.
    pub async fn accept(&mut self) -> ServerConn {
        let mut stream = self.accepts.recv().await.expect("client connected");
        let mut tag = [0u8; 1];
        stream.read_exact(&mut tag).await.unwrap();
        assert_eq!(tag[0], 0xef, "abridged transport tag");
        ServerConn {
            stream,
            framing: Abridged::new(),
            key: AuthKey::from_bytes(KEY),
            session_id: 0,
            counter: 0,
        }
    }
}

// ─── Server side of one connection ────────────────────────────────────────────

pub struct Received {
    pub salt: i64,
    pub session_id: i64,
    pub outer: Message,
    /// Container contents, or the outer message alone.
    pub messages: Vec<Message>,
}

pub struct ServerConn {
    stream: DuplexStream,
    framing: Abridged,
    key: AuthKey,
    /// Taken from the last frame the client sent.
    pub session_id: i64,
    counter: i64,
}

impl ServerConn {
    async fn read_frame(&mut self) -> Option<Vec<u8>> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.framing.next_frame().unwrap() {
                return Some(frame);
            }
            let n = self.stream.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            self.framing.feed(&buf[..n]);
        }
    }

    /// Decrypt the next frame. `None` once the client hangs up.
    pub async fn recv_raw(&mut self) -> Option<Received> {
        let frame = self.read_frame().await?;
        let plain = decrypt_data_v2_from_client(&frame, &self.key).unwrap();
        let session_id = read_i64(&plain[8..]);
        self.session_id = session_id;

        let (outer, _) = parse_message(&plain[16..]);
        let mut messages = Vec::new();
        if constructor(&outer.body) == ids::MSG_CONTAINER {
            let count = read_i32(&outer.body[4..]);
            let mut at = 8;
            for _ in 0..count {
                let (msg, used) = parse_message(&outer.body[at..]);
                messages.push(msg);
                at += used;
            }
        } else {
            messages.push(outer.clone());
        }
        Some(Received { salt: read_i64(&plain), session_id, outer, messages })
    }

    /// Requests from the next frame that carries any. Acks and salt requests
    /// are skipped.
    pub async fn recv_requests(&mut self) -> Vec<Message> {
        loop {
            let received = self.recv_raw().await.expect("client hung up");
            let requests: Vec<_> = received
                .messages
                .into_iter()
                .filter(|m| m.requires_ack() && constructor(&m.body) != functions::GetFutureSalts::CONSTRUCTOR_ID)
                .collect();
            if !requests.is_empty() {
                return requests;
            }
        }
    }

    pub async fn recv_request(&mut self) -> Message {
        let mut requests = self.recv_requests().await;
        assert_eq!(requests.len(), 1, "expected a single request");
        requests.remove(0)
    }

    /// Wait until the client closes its side.
    pub async fn closed(&mut self) {
        while self.recv_raw().await.is_some() {}
    }

    fn next_msg_id(&mut self) -> i64 {
        self.counter += 1;
        (now() << 32) | (self.counter << 2) | 1
    }

    async fn write(&mut self, payload: &[u8]) {
        let mut wire = Vec::new();
        self.framing.pack(payload, &mut wire);
        self.stream.write_all(&wire).await.unwrap();
    }

    async fn send_message(&mut self, seq_no: i32, body: &[u8]) {
        let mut plain = Vec::new();
        plain.extend(SERVER_SALT.to_le_bytes());
        plain.extend(self.session_id.to_le_bytes());
        let msg_id = self.next_msg_id();
        Message { msg_id, seq_no, body: body.to_vec() }.write_to(&mut plain);
        let frame = encrypt_data_v2_as_server(&plain, &self.key).unwrap();
        self.write(&frame).await;
    }

    /// A content-related message.
    pub async fn send(&mut self, body: &[u8]) {
        let seq_no = (self.counter as i32) * 2 + 1;
        self.send_message(seq_no, body).await;
    }

    pub async fn reply(&mut self, req_msg_id: i64, result: &[u8]) {
        let mut body = ids::RPC_RESULT.to_le_bytes().to_vec();
        body.extend(req_msg_id.to_le_bytes());
        body.extend_from_slice(result);
        self.send(&body).await;
    }

    pub async fn rpc_error(&mut self, req_msg_id: i64, code: i32, message: &str) {
        let error = types::RpcError { error_code: code, error_message: message.into() };
        self.reply(req_msg_id, &error.to_bytes()).await;
    }

    pub async fn bad_msg(&mut self, bad_msg_id: i64, code: i32) {
        let body = types::BadMsgNotification { bad_msg_id, bad_msg_seqno: 1, error_code: code }.to_bytes();
        self.send_message((self.counter as i32) * 2, &body).await;
    }

    /// A negative transport status in place of a frame.
    pub async fn status(&mut self, code: i32) {
        self.write(&code.to_le_bytes()).await;
    }

    // ── Plaintext (negotiation) ──────────────────────────────────────────

    pub async fn recv_plain(&mut self) -> Vec<u8> {
        let frame = self.read_frame().await.expect("client hung up");
        PlainSession::unpack(&frame).unwrap().to_vec()
    }

    pub async fn send_plain(&mut self, body: &[u8]) {
        let mut frame = 0i64.to_le_bytes().to_vec();
        frame.extend(self.next_msg_id().to_le_bytes());
        frame.extend((body.len() as i32).to_le_bytes());
        frame.extend_from_slice(body);
        self.write(&frame).await;
    }
}
