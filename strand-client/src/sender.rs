//! The connection event loop.
//!
//! One task owns the link, the [`EncryptedSession`] and the table of
//! requests in flight. Callers talk to it through a command channel, so
//! `msg_id` and `seq_no` assignment never races.
//!
//! Each turn of the loop waits for whichever comes first: a command, a frame
//! from the server, or the keepalive deadline. Commands that are already
//! waiting (plus any that arrive within the coalescing window) are packed
//! together before anything is written.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use strand_crypto::{AuthKey, random_bytes};
use strand_mtproto::{DeserializeError, Deserialization, EncryptedSession, MsgId, RequestError};
use strand_mtproto::transport::TransportError;
use strand_tl::{Serializable, functions};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use crate::handshake::{self, Dial};
use crate::link::Link;
use crate::retry::RetryContext;
use crate::updates::PushSink;
use crate::{Config, InvocationError, RpcError};

/// How many times one request is resent after retryable `bad_msg_notification`s.
pub const MAX_RESENDS: u32 = 3;

const RECONNECT_BACKOFF_BASE: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);

pub(crate) type RequestId = u64;
pub(crate) type Reply = oneshot::Sender<Result<Vec<u8>, InvocationError>>;

pub(crate) enum Command {
    Request { id: RequestId, body: Vec<u8>, reply: Reply },
    Cancel(RequestId),
    /// Sent back to the loop once a flood wait is over.
    Resend(RequestId),
    Subscribe(PushSink),
    Close,
}

/// Where the connection stands, as published by the event loop.
///
/// `Disconnected → Connecting → Handshaking → Connected → Closing →
/// Disconnected`. A lost connection goes back to `Disconnected` and then
/// `Connecting` for each reconnect attempt; `Handshaking` only appears
/// while a new auth key is negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Closing,
}

struct PendingRequest {
    msg_id: MsgId,
    body: Vec<u8>,
    enqueued_at: Instant,
    resends: u32,
    flood_failures: u32,
    slept: Duration,
    acked: bool,
    /// Waiting out a flood wait; not on the wire.
    delayed: bool,
    reply: Reply,
}

/// What broke, and therefore how to recover.
enum Failure {
    /// The connection is unusable; reconnect with the same key.
    Link(InvocationError),
    /// The server does not accept our auth key; negotiate a new one.
    Key(InvocationError),
}

impl From<InvocationError> for Failure {
    fn from(e: InvocationError) -> Self {
        match e {
            InvocationError::Transport(TransportError::BadStatus { status: -404 }) => Self::Key(e),
            e => Self::Link(e),
        }
    }
}

enum Event {
    Command(Option<Command>),
    Frame(Result<Vec<u8>, InvocationError>),
    Keepalive,
}

struct Keepalive {
    next_ping: Instant,
    outstanding: Option<(MsgId, Instant)>,
}

impl Keepalive {
    fn new(interval: Duration) -> Self {
        Self { next_ping: Instant::now() + interval, outstanding: None }
    }
}

// ─── Connecting ───────────────────────────────────────────────────────────────

fn dial(config: &Config) -> Dial<'_> {
    Dial {
        connector: config.connector.as_ref(),
        addr: &config.dc_addr,
        dc_id: config.dc_id,
        transport: &config.transport,
        trusted_keys: &config.trusted_keys,
        step_timeout: config.handshake_timeout,
    }
}

async fn open_link(config: &Config) -> Result<Link, InvocationError> {
    time::timeout(config.handshake_timeout, Link::open(config.connector.as_ref(), &config.dc_addr, &config.transport))
        .await
        .map_err(|_| InvocationError::Timeout)?
}

/// Connect with the stored auth key, or negotiate and store a new one.
pub(crate) async fn establish(
    config: &Config,
    state: &watch::Sender<ConnectionState>,
) -> Result<(Link, EncryptedSession), InvocationError> {
    state.send_replace(ConnectionState::Connecting);
    match config.storage.auth_key(config.dc_id)? {
        Some(key) => {
            tracing::info!("[strand] Reusing stored auth key for DC{}", config.dc_id);
            let link = open_link(config).await?;
            Ok((link, EncryptedSession::new(AuthKey::from_bytes(key), 0, 0)?))
        }
        None => negotiate_fresh(config, state).await,
    }
}

async fn negotiate_fresh(
    config: &Config,
    state: &watch::Sender<ConnectionState>,
) -> Result<(Link, EncryptedSession), InvocationError> {
    state.send_replace(ConnectionState::Handshaking);
    let (link, done) = handshake::negotiate(&dial(config)).await?;
    config.storage.set_auth_key(config.dc_id, Some(done.auth_key))?;
    let session = EncryptedSession::new(AuthKey::from_bytes(done.auth_key), done.first_salt, done.time_offset)?;
    Ok((link, session))
}

fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_BACKOFF_BASE
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .min(RECONNECT_BACKOFF_CAP)
}

// ─── Sender ───────────────────────────────────────────────────────────────────

pub(crate) struct Sender {
    config: Config,
    link: Link,
    session: EncryptedSession,
    commands: mpsc::UnboundedReceiver<Command>,
    loopback: mpsc::WeakUnboundedSender<Command>,
    requests: HashMap<RequestId, PendingRequest>,
    by_msg_id: HashMap<MsgId, RequestId>,
    pushes: Option<PushSink>,
    keepalive: Keepalive,
    state: watch::Sender<ConnectionState>,
}

impl Sender {
    pub(crate) fn new(
        config: Config,
        link: Link,
        session: EncryptedSession,
        commands: mpsc::UnboundedReceiver<Command>,
        loopback: mpsc::WeakUnboundedSender<Command>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        let keepalive = Keepalive::new(config.ping_interval);
        Self {
            config,
            link,
            session,
            commands,
            loopback,
            requests: HashMap::new(),
            by_msg_id: HashMap::new(),
            pushes: None,
            keepalive,
            state,
        }
    }

    pub(crate) async fn run(mut self) {
        self.state.send_replace(ConnectionState::Connected);
        loop {
            let deadline = self.keepalive_deadline();
            let event = tokio::select! {
                command = self.commands.recv() => Event::Command(command),
                frame = self.link.recv() => Event::Frame(frame),
                _ = time::sleep_until(deadline) => Event::Keepalive,
            };
            let step = match event {
                Event::Command(None) => {
                    tracing::debug!("[strand] every client handle dropped");
                    break;
                }
                Event::Command(Some(command)) => self.on_command(command).await,
                Event::Frame(Ok(frame)) => self.on_frame(&frame).await,
                Event::Frame(Err(e)) => Err(e.into()),
                Event::Keepalive => self.on_keepalive().await,
            };
            let keep_going = match step {
                Ok(flow) => flow.is_continue(),
                Err(Failure::Link(e)) => self.reconnect(e).await,
                Err(Failure::Key(e)) => self.renegotiate(e).await,
            };
            if !keep_going {
                break;
            }
        }
        self.shutdown().await;
    }

    fn keepalive_deadline(&self) -> Instant {
        match self.keepalive.outstanding {
            Some((_, sent)) => sent + self.config.ping_timeout,
            None => self.keepalive.next_ping,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    async fn on_command(&mut self, first: Command) -> Result<ControlFlow<()>, Failure> {
        if self.accept(first).is_break() {
            return Ok(ControlFlow::Break(()));
        }

        let window = self.config.coalesce_window;
        let deadline = Instant::now() + window;
        loop {
            let next = match self.commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) if !window.is_zero() => {
                    match time::timeout_at(deadline, self.commands.recv()).await {
                        Ok(Some(command)) => command,
                        _ => break,
                    }
                }
                Err(_) => break,
            };
            if self.accept(next).is_break() {
                self.flush().await?;
                return Ok(ControlFlow::Break(()));
            }
        }

        self.flush().await?;
        Ok(ControlFlow::Continue(()))
    }

    fn accept(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Request { id, body, reply } => {
                if reply.is_closed() {
                    return ControlFlow::Continue(());
                }
                let msg_id = self.session.push(body.clone());
                tracing::trace!("[strand] request {id} queued as {msg_id:#x}");
                self.by_msg_id.insert(msg_id, id);
                self.requests.insert(
                    id,
                    PendingRequest {
                        msg_id,
                        body,
                        enqueued_at: Instant::now(),
                        resends: 0,
                        flood_failures: 0,
                        slept: Duration::ZERO,
                        acked: false,
                        delayed: false,
                        reply,
                    },
                );
            }
            Command::Cancel(id) => {
                if let Some(req) = self.requests.remove(&id) {
                    self.by_msg_id.remove(&req.msg_id);
                    tracing::debug!("[strand] request {id} cancelled after {:?}", req.enqueued_at.elapsed());
                    let _ = req.reply.send(Err(InvocationError::Cancelled));
                }
            }
            Command::Resend(id) => {
                if let Some(req) = self.requests.get_mut(&id) {
                    req.delayed = false;
                    req.msg_id = self.session.push(req.body.clone());
                    self.by_msg_id.insert(req.msg_id, id);
                }
            }
            Command::Subscribe(sink) => self.pushes = Some(sink),
            Command::Close => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    // ── Incoming ─────────────────────────────────────────────────────────

    async fn on_frame(&mut self, frame: &[u8]) -> Result<ControlFlow<()>, Failure> {
        match self.session.process(frame) {
            Ok(incoming) => self.dispatch(incoming),
            Err(DeserializeError::Crypto(e)) => return Err(Failure::Key(InvocationError::Crypto(e))),
            Err(e) => tracing::warn!("[strand] dropping undecodable frame: {e}"),
        }
        self.flush().await?;
        Ok(ControlFlow::Continue(()))
    }

    fn dispatch(&mut self, incoming: Deserialization) {
        for msg_id in incoming.acks {
            if let Some(req) = self.by_msg_id.get(&msg_id).and_then(|id| self.requests.get_mut(id)) {
                req.acked = true;
            }
        }
        if let Some(first_msg_id) = incoming.new_session {
            tracing::debug!("[strand] server session restarted at {first_msg_id:#x}");
        }
        for result in incoming.rpc_results {
            self.on_result(result.msg_id, result.result);
        }
        for body in incoming.updates {
            self.forward_push(body);
        }
    }

    fn on_result(&mut self, msg_id: MsgId, result: Result<Vec<u8>, RequestError>) {
        if self.keepalive.outstanding.is_some_and(|(id, _)| id == msg_id) {
            self.keepalive.outstanding = None;
            tracing::trace!("[strand] keepalive answered");
            return;
        }
        let Some(id) = self.by_msg_id.remove(&msg_id) else {
            tracing::debug!("[strand] result for unknown msg_id {msg_id:#x}, dropping");
            return;
        };
        let Some(mut req) = self.requests.remove(&id) else { return };

        match result {
            Ok(body) => {
                tracing::trace!("[strand] request {id} answered (acked: {})", req.acked);
                let _ = req.reply.send(Ok(body));
            }
            Err(RequestError::BadMessage(bad)) if bad.retryable() && req.resends < MAX_RESENDS => {
                req.resends += 1;
                req.acked = false;
                req.msg_id = self.session.push(req.body.clone());
                tracing::debug!(
                    "[strand] resending request {id} as {:#x} after {bad} ({}/{MAX_RESENDS})",
                    req.msg_id,
                    req.resends
                );
                self.by_msg_id.insert(req.msg_id, id);
                self.requests.insert(id, req);
            }
            Err(RequestError::BadMessage(bad)) => {
                let _ = req.reply.send(Err(InvocationError::BadMessage(bad)));
            }
            Err(RequestError::Rpc(e)) => self.on_rpc_error(id, req, RpcError::from(e)),
        }
    }

    fn on_rpc_error(&mut self, id: RequestId, mut req: PendingRequest, error: RpcError) {
        req.flood_failures += 1;
        let ctx = RetryContext {
            fail_count: NonZeroU32::new(req.flood_failures).unwrap_or(NonZeroU32::MIN),
            slept_so_far: req.slept,
            error: InvocationError::Rpc(error),
        };
        match self.config.retry_policy.should_retry(&ctx) {
            ControlFlow::Continue(delay) => {
                let Some(loopback) = self.loopback.upgrade() else {
                    let _ = req.reply.send(Err(ctx.error));
                    return;
                };
                req.slept += delay;
                req.delayed = true;
                self.requests.insert(id, req);
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    let _ = loopback.send(Command::Resend(id));
                });
            }
            ControlFlow::Break(()) => {
                let _ = req.reply.send(Err(ctx.error));
            }
        }
    }

    fn forward_push(&mut self, body: Vec<u8>) {
        match &self.pushes {
            Some(sink) => {
                if !sink.push(body) {
                    tracing::debug!("[strand] update stream closed");
                    self.pushes = None;
                }
            }
            None => tracing::trace!("[strand] no update consumer, dropping push"),
        }
    }

    // ── Outgoing ─────────────────────────────────────────────────────────

    async fn on_keepalive(&mut self) -> Result<ControlFlow<()>, Failure> {
        if let Some((msg_id, sent)) = self.keepalive.outstanding {
            if sent.elapsed() >= self.config.ping_timeout {
                tracing::warn!("[strand] no pong for {msg_id:#x} within {:?}", self.config.ping_timeout);
                return Err(Failure::Link(InvocationError::Timeout));
            }
            return Ok(ControlFlow::Continue(()));
        }

        let ping_id = i64::from_le_bytes(random_bytes().map_err(InvocationError::from)?);
        let disconnect_delay = (self.config.ping_interval + self.config.ping_timeout).as_secs() as i32;
        let msg_id = self.session.push(functions::PingDelayDisconnect { ping_id, disconnect_delay }.to_bytes());
        let now = Instant::now();
        self.keepalive.outstanding = Some((msg_id, now));
        self.keepalive.next_ping = now + self.config.ping_interval;
        self.flush().await?;
        Ok(ControlFlow::Continue(()))
    }

    async fn flush(&mut self) -> Result<(), Failure> {
        let mut payloads = Vec::new();
        while let Some(payload) = self.session.finalize().map_err(InvocationError::from)? {
            payloads.push(payload);
        }
        for (old, new) in self.session.take_renumbered() {
            if let Some(id) = self.by_msg_id.remove(&old) {
                if let Some(req) = self.requests.get_mut(&id) {
                    req.msg_id = new;
                }
                self.by_msg_id.insert(new, id);
            }
            if let Some((ping, _)) = &mut self.keepalive.outstanding {
                if *ping == old {
                    *ping = new;
                }
            }
        }
        if !payloads.is_empty() {
            self.link.send_all(&payloads).await?;
        }
        Ok(())
    }

    // ── Recovery ─────────────────────────────────────────────────────────

    /// Put every unresolved request back on the wire under a new session.
    fn resume(&mut self) -> Result<(), InvocationError> {
        self.session.reset_session()?;
        self.keepalive = Keepalive::new(self.config.ping_interval);
        self.by_msg_id.clear();

        let mut ids: Vec<RequestId> = self.requests.iter().filter(|(_, r)| !r.delayed).map(|(id, _)| *id).collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(req) = self.requests.get_mut(&id) {
                req.msg_id = self.session.push(req.body.clone());
                req.acked = false;
                self.by_msg_id.insert(req.msg_id, id);
            }
        }
        tracing::info!("[strand] resumed with {} request(s) in flight", self.by_msg_id.len());
        Ok(())
    }

    async fn reconnect(&mut self, mut last: InvocationError) -> bool {
        tracing::warn!("[strand] connection lost: {last}");
        self.state.send_replace(ConnectionState::Disconnected);
        for attempt in 1..=self.config.max_reconnect_attempts {
            time::sleep(reconnect_delay(attempt - 1)).await;
            self.state.send_replace(ConnectionState::Connecting);

            let result: Result<(), InvocationError> = async {
                self.link = open_link(&self.config).await?;
                self.resume()?;
                self.flush().await.map_err(|f| match f {
                    Failure::Link(e) | Failure::Key(e) => e,
                })
            }
            .await;

            match result {
                Ok(()) => {
                    tracing::info!("[strand] reconnected on attempt {attempt}");
                    self.state.send_replace(ConnectionState::Connected);
                    return true;
                }
                Err(e) => {
                    tracing::warn!("[strand] reconnect attempt {attempt} failed: {e}");
                    last = e;
                }
            }
        }
        tracing::error!("[strand] giving up after {} reconnect attempts: {last}", self.config.max_reconnect_attempts);
        self.fail_all(&last);
        false
    }

    async fn renegotiate(&mut self, error: InvocationError) -> bool {
        tracing::warn!("[strand] auth key rejected ({error}), negotiating a new one");
        if let Err(e) = self.config.storage.set_auth_key(self.config.dc_id, None) {
            tracing::warn!("[strand] could not forget auth key in {}: {e}", self.config.storage.name());
        }
        self.state.send_replace(ConnectionState::Disconnected);

        match negotiate_fresh(&self.config, &self.state).await {
            Ok((link, session)) => {
                self.link = link;
                self.session = session;
                if let Err(e) = self.resume() {
                    self.fail_all(&e);
                    return false;
                }
                match self.flush().await {
                    Ok(()) => {
                        self.state.send_replace(ConnectionState::Connected);
                        true
                    }
                    Err(Failure::Link(e) | Failure::Key(e)) => self.reconnect(e).await,
                }
            }
            Err(e) => {
                tracing::error!("[strand] re-negotiation failed: {e}");
                self.fail_all(&InvocationError::ReauthenticationNeeded);
                false
            }
        }
    }

    fn fail_all(&mut self, error: &InvocationError) {
        self.by_msg_id.clear();
        for (_, req) in self.requests.drain() {
            let _ = req.reply.send(Err(error.duplicate()));
        }
    }

    async fn shutdown(mut self) {
        self.state.send_replace(ConnectionState::Closing);
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Request { reply, .. } = command {
                let _ = reply.send(Err(InvocationError::Dropped));
            }
        }
        self.fail_all(&InvocationError::Dropped);

        let Self { link, state, .. } = self;
        link.shutdown().await;
        state.send_replace(ConnectionState::Disconnected);
        tracing::info!("[strand] connection closed");
    }
}
