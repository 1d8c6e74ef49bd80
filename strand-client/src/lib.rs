//! # strand-client
//!
//! Async MTProto 2.0 client core on top of [`strand_mtproto`].
//!
//! ## Features
//! - Auth key negotiation with retry, or reuse of a stored key
//! - One event loop per connection: queued requests go out together in a
//!   single container, acks and resends are handled transparently
//! - `FLOOD_WAIT` auto-retry with configurable policy
//! - Cancellation and per-call timeouts
//! - Keepalive pings, reconnect with backoff, re-negotiation on `-404`
//! - Ordered update delivery with gap detection and difference fetching
//! - Pluggable storage and connectors (direct TCP or SOCKS5)

#![deny(unsafe_code)]

mod connector;
mod errors;
mod handshake;
mod link;
mod retry;
mod sender;
pub mod storage;
pub mod updates;

pub use connector::{BoxFuture, ByteStream, Connector, Socks5Connector, TcpConnector};
pub use errors::{InvocationError, RpcError, UpdateError};
pub use handshake::MAX_HANDSHAKE_ATTEMPTS;
pub use retry::{AutoSleep, NoRetries, RetryContext, RetryPolicy};
pub use sender::{ConnectionState, MAX_RESENDS};
pub use storage::{InMemoryStorage, Storage};
pub use strand_crypto::rsa::TrustedKeys;
pub use tokio_util::sync::CancellationToken;
pub use updates::{DifferenceFetcher, UpdateDecoder, UpdateEvent, UpdateStream};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strand_crypto::random_bytes;
use strand_tl::{Deserializable, RemoteCall, Serializable, functions};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use sender::{Command, RequestId, Sender};
use updates::UpdateManager;

// ─── TransportKind ────────────────────────────────────────────────────────────

/// Which MTProto transport framing to use.
///
/// | Variant | Init bytes | Notes |
/// |---------|-----------|-------|
/// | `Abridged` | `0xef` | Default, smallest overhead |
/// | `Intermediate` | `0xeeeeeeee` | 4-byte length prefix |
/// | `Full` | none | Adds seqno + CRC32 |
/// | `Obfuscated` | random 64B | Any of the above under AES-CTR |
#[derive(Clone, Debug, Default)]
pub enum TransportKind {
    /// [Abridged] transport: length prefix is 1 or 4 bytes.
    ///
    /// [Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
    #[default]
    Abridged,
    /// [Intermediate] transport: 4-byte LE length prefix.
    ///
    /// [Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
    Intermediate,
    /// [Full] transport: 4-byte length + seqno + CRC32.
    ///
    /// [Full]: https://core.telegram.org/mtproto/mtproto-transports#full
    Full,
    /// [Obfuscated2] transport over another framing.
    ///
    /// `secret` is the 16-byte proxy secret, or `None` for keyless obfuscation.
    ///
    /// [Obfuscated2]: https://core.telegram.org/mtproto/mtproto-transports#obfuscated-2
    Obfuscated { framing: Framing, secret: Option<[u8; 16]> },
}

/// The framing carried inside [`TransportKind::Obfuscated`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Framing {
    #[default]
    Abridged,
    Intermediate,
    /// Announced as `0xdddddddd`, which Telegram's servers read as padded
    /// intermediate.
    Full,
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`Client::connect`].
#[derive(Clone)]
pub struct Config {
    pub dc_id:                  i32,
    pub dc_addr:                String,
    /// Which MTProto transport framing to use (default: Abridged).
    pub transport:              TransportKind,
    /// Where auth keys and update state live (default: in memory).
    pub storage:                Arc<dyn Storage>,
    /// How the byte stream is opened (default: direct TCP).
    pub connector:              Arc<dyn Connector>,
    /// Server RSA keys accepted during negotiation.
    pub trusted_keys:           TrustedKeys,
    pub retry_policy:           Arc<dyn RetryPolicy>,
    /// Per-step limit while negotiating, also used for connecting.
    pub handshake_timeout:      Duration,
    /// Default limit for [`Client::call`].
    pub request_timeout:        Duration,
    pub ping_interval:          Duration,
    /// How long a keepalive may go unanswered before reconnecting.
    pub ping_timeout:           Duration,
    /// Extra time to wait for more requests before writing a batch.
    pub coalesce_window:        Duration,
    pub max_reconnect_attempts: u32,
    /// Capacity of the push queue and of the [`UpdateStream`].
    pub update_queue_capacity:  usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dc_id:                  2,
            dc_addr:                "149.154.167.51:443".into(),
            transport:              TransportKind::Abridged,
            storage:                Arc::new(InMemoryStorage::new()),
            connector:              Arc::new(TcpConnector),
            trusted_keys:           TrustedKeys::builtin(),
            retry_policy:           Arc::new(AutoSleep::default()),
            handshake_timeout:      Duration::from_secs(10),
            request_timeout:        Duration::from_secs(30),
            ping_interval:          Duration::from_secs(60),
            ping_timeout:           Duration::from_secs(15),
            coalesce_window:        Duration::ZERO,
            max_reconnect_attempts: 5,
            update_queue_capacity:  1024,
        }
    }
}

// ─── CallOptions ──────────────────────────────────────────────────────────────

/// Per-call limits for [`Client::call`].
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Overrides [`Config::request_timeout`].
    pub timeout: Option<Duration>,
    pub cancel:  CancellationToken,
}

impl CallOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout), ..Default::default() }
    }

    pub fn cancel_with(token: CancellationToken) -> Self {
        Self { cancel: token, ..Default::default() }
    }
}

// ─── PendingHandle ────────────────────────────────────────────────────────────

/// A request handed to the event loop, as returned by [`Client::send`].
pub struct PendingHandle {
    id:       RequestId,
    rx:       oneshot::Receiver<Result<Vec<u8>, InvocationError>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PendingHandle {
    pub fn id(&self) -> u64 { self.id }

    /// Wait for the server's answer.
    pub async fn result(self) -> Result<Vec<u8>, InvocationError> {
        self.rx.await.unwrap_or(Err(InvocationError::Dropped))
    }

    /// Stop waiting. A result that arrives later is discarded.
    pub fn cancel(self) {
        let _ = self.commands.send(Command::Cancel(self.id));
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

struct ClientInner {
    commands:              mpsc::UnboundedSender<Command>,
    state:                 watch::Receiver<ConnectionState>,
    next_request:          AtomicU64,
    request_timeout:       Duration,
    update_queue_capacity: usize,
    storage:               Arc<dyn Storage>,
}

/// An MTProto connection to one data center. Cheap to clone.
///
/// The connection closes when [`Client::close`] is called or the last clone
/// is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect, negotiating an auth key unless `config.storage` has one.
    pub async fn connect(config: Config) -> Result<Self, InvocationError> {
        tracing::info!("[strand] Connecting to DC{} at {} …", config.dc_id, config.dc_addr);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (link, session) = sender::establish(&config, &state_tx).await?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let inner = ClientInner {
            commands: commands.clone(),
            state,
            next_request: AtomicU64::new(1),
            request_timeout: config.request_timeout,
            update_queue_capacity: config.update_queue_capacity,
            storage: config.storage.clone(),
        };
        let sender = Sender::new(config, link, session, commands_rx, commands.downgrade(), state_tx);
        tokio::spawn(sender.run());

        Ok(Self { inner: Arc::new(inner) })
    }

    /// Queue a serialized request without waiting for it.
    pub fn send(&self, body: Vec<u8>) -> PendingHandle {
        let id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        // If the loop is gone the reply is dropped with the command.
        let _ = self.inner.commands.send(Command::Request { id, body, reply });
        PendingHandle { id, rx, commands: self.inner.commands.clone() }
    }

    /// Send a serialized request and wait for its answer.
    ///
    /// Returns [`InvocationError::Timeout`] or [`InvocationError::Cancelled`]
    /// when the call is abandoned; the request is then forgotten by the loop.
    pub async fn call(&self, body: Vec<u8>, options: CallOptions) -> Result<Vec<u8>, InvocationError> {
        let limit = options.timeout.unwrap_or(self.inner.request_timeout);
        let PendingHandle { id, rx, .. } = self.send(body);

        let abandoned = tokio::select! {
            answer = time::timeout(limit, rx) => match answer {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => return Err(InvocationError::Dropped),
                Err(_) => InvocationError::Timeout,
            },
            _ = options.cancel.cancelled() => InvocationError::Cancelled,
        };
        tracing::debug!("[strand] request {id} abandoned: {abandoned}");
        let _ = self.inner.commands.send(Command::Cancel(id));
        Err(abandoned)
    }

    /// Invoke a typed request.
    pub async fn invoke<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        let body = self.call(request.to_bytes(), CallOptions::default()).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Round-trip time of a `ping`.
    pub async fn ping(&self) -> Result<Duration, InvocationError> {
        let ping_id = i64::from_le_bytes(random_bytes()?);
        let start = Instant::now();
        let pong = self.invoke(&functions::Ping { ping_id }).await?;
        if pong.ping_id != ping_id {
            return Err(InvocationError::Deserialize(format!("pong for {} instead of {ping_id}", pong.ping_id)));
        }
        Ok(start.elapsed())
    }

    /// Start ordered update delivery.
    ///
    /// Only one stream is fed at a time; a second call replaces the first.
    pub fn stream_updates<D, F>(&self, decoder: D, fetcher: F) -> UpdateStream
    where
        D: UpdateDecoder,
        F: DifferenceFetcher,
    {
        let manager = UpdateManager::new(self.inner.storage.clone());
        let (sink, stream) =
            updates::spawn(manager, Arc::new(decoder), Arc::new(fetcher), self.inner.update_queue_capacity);
        let _ = self.inner.commands.send(Command::Subscribe(sink));
        stream
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    /// Close the connection and wait for the event loop to finish. Requests
    /// still pending fail with [`InvocationError::Dropped`].
    pub async fn close(&self) {
        let _ = self.inner.commands.send(Command::Close);
        self.closed().await;
    }

    /// Wait until the event loop has finished, for whatever reason.
    pub async fn closed(&self) {
        let mut state = self.inner.state.clone();
        while state.changed().await.is_ok() {}
    }
}
