//! Ordered update delivery with gap recovery.
//!
//! Pushes arrive from the session as raw bodies. An [`UpdateDecoder`] turns
//! each into [`UpdateBatch`]es; the [`UpdateManager`] orders them per stream
//! and, on a gap, asks the [`DifferenceFetcher`] for what was missed. Both
//! traits are implemented by the API layer, which knows the schema.
//!
//! The session hands pushes to the update task through a bounded queue. If
//! that queue is full the push is dropped and a global difference is forced
//! before the next one is processed. Events reach the consumer through a
//! second bounded channel; a slow consumer stalls the update task.
//!
//! A stream that reported [`UpdateEvent::ResyncNeeded`] stays silent until
//! the consumer has resynchronised it and calls [`UpdateStream::reset`].

mod manager;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub use manager::{
    Difference, DifferenceRequest, FetchRetry, MAX_DIFFERENCE_ATTEMPTS, Outcome, Phase, UpdateBatch, UpdateEvent,
    UpdateManager, backoff,
};

use crate::connector::BoxFuture;
use crate::errors::UpdateError;
use crate::storage::Stream;

/// Splits a raw push into ordered batches.
pub trait UpdateDecoder: Send + Sync + 'static {
    /// Return [`UpdateError::TooLong`] when the push says updates were
    /// skipped and only a difference can recover them.
    fn decode(&self, body: &[u8]) -> Result<Vec<UpdateBatch>, UpdateError>;
}

/// Fetches what a stream missed.
pub trait DifferenceFetcher: Send + Sync + 'static {
    fn fetch(&self, request: DifferenceRequest) -> BoxFuture<'_, Result<Difference, UpdateError>>;
}

// ─── UpdateStream ─────────────────────────────────────────────────────────────

/// Asynchronous stream of [`UpdateEvent`]s.
pub struct UpdateStream {
    rx: mpsc::Receiver<UpdateEvent>,
    resets: mpsc::UnboundedSender<(Stream, i32)>,
}

impl UpdateStream {
    /// Wait for the next update. Returns `None` when the client has shut down.
    pub async fn next(&mut self) -> Option<UpdateEvent> {
        self.rx.recv().await
    }

    /// Start `stream` over from `counter`, dropping whatever was buffered or
    /// pending for it. Applied before the next push is processed.
    ///
    /// Returns `false` once the update task is gone.
    pub fn reset(&self, stream: Stream, counter: i32) -> bool {
        self.resets.send((stream, counter)).is_ok()
    }
}

// ─── Push queue ───────────────────────────────────────────────────────────────

/// The session side of the push queue.
pub(crate) struct PushSink {
    tx: mpsc::Sender<Vec<u8>>,
    overflow: Arc<AtomicBool>,
}

impl PushSink {
    /// Queue a push. Returns `false` once the update task is gone.
    pub(crate) fn push(&self, body: Vec<u8>) -> bool {
        match self.tx.try_send(body) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.overflow.swap(true, Ordering::AcqRel) {
                    tracing::warn!("[strand] update queue full, dropping pushes until caught up");
                }
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Start the update task. The sink goes to the session, the stream to the
/// consumer.
pub(crate) fn spawn(
    manager: UpdateManager,
    decoder: Arc<dyn UpdateDecoder>,
    fetcher: Arc<dyn DifferenceFetcher>,
    capacity: usize,
) -> (PushSink, UpdateStream) {
    let capacity = capacity.max(1);
    let (push_tx, push_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (reset_tx, reset_rx) = mpsc::unbounded_channel();
    let overflow = Arc::new(AtomicBool::new(false));

    let task = UpdateTask {
        manager,
        decoder,
        fetcher,
        pushes: push_rx,
        resets: reset_rx,
        overflow: overflow.clone(),
        events: event_tx,
        pending: VecDeque::new(),
    };
    tokio::spawn(task.run());

    (PushSink { tx: push_tx, overflow }, UpdateStream { rx: event_rx, resets: reset_tx })
}

struct UpdateTask {
    manager: UpdateManager,
    decoder: Arc<dyn UpdateDecoder>,
    fetcher: Arc<dyn DifferenceFetcher>,
    pushes: mpsc::Receiver<Vec<u8>>,
    resets: mpsc::UnboundedReceiver<(Stream, i32)>,
    overflow: Arc<AtomicBool>,
    events: mpsc::Sender<UpdateEvent>,
    pending: VecDeque<DifferenceRequest>,
}

impl UpdateTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some((stream, counter)) = self.resets.recv() => self.reset(stream, counter),
                body = self.pushes.recv() => {
                    let Some(body) = body else { break };
                    if !self.handle(body).await {
                        return;
                    }
                }
            }
        }
        tracing::debug!("[strand] update task finished");
    }

    /// Returns `false` once the consumer is gone.
    async fn handle(&mut self, body: Vec<u8>) -> bool {
        while let Ok((stream, counter)) = self.resets.try_recv() {
            self.reset(stream, counter);
        }
        if self.overflow.swap(false, Ordering::AcqRel) {
            self.force(Stream::Global);
        }
        match self.decoder.decode(&body) {
            Ok(batches) => {
                for batch in batches {
                    let out = self.manager.handle_batch(batch);
                    if !self.deliver(out).await {
                        return false;
                    }
                }
            }
            Err(UpdateError::TooLong) => self.force(Stream::Global),
            Err(e) => tracing::warn!("[strand] dropping push: {e}"),
        }
        self.catch_up().await
    }

    fn reset(&mut self, stream: Stream, counter: i32) {
        tracing::info!("[strand] {stream:?} reset to {counter}");
        self.pending.retain(|r| r.stream != stream);
        self.manager.reset(stream, counter);
    }

    fn force(&mut self, stream: Stream) {
        if let Some(request) = self.manager.force_difference(stream) {
            self.queue(request);
        }
    }

    fn queue(&mut self, request: DifferenceRequest) {
        if !self.pending.iter().any(|r| r.stream == request.stream) {
            self.pending.push_back(request);
        }
    }

    /// Forward events. Returns `false` once the consumer is gone.
    async fn deliver(&mut self, out: Outcome) -> bool {
        if let Some(request) = out.fetch {
            self.queue(request);
        }
        for event in out.events {
            if self.events.send(event).await.is_err() {
                return false;
            }
        }
        true
    }

    async fn catch_up(&mut self) -> bool {
        while let Some(mut request) = self.pending.pop_front() {
            loop {
                self.manager.fetch_started(request.stream);
                match self.fetcher.fetch(request).await {
                    Ok(diff) => {
                        let out = self.manager.apply_difference(request.stream, diff);
                        if !self.deliver(out).await {
                            return false;
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("[strand] difference for {:?} from {} failed: {e}", request.stream, request.from);
                        match self.manager.fetch_failed(request.stream) {
                            FetchRetry::After { delay, request: next } => {
                                tokio::time::sleep(delay).await;
                                request = next;
                            }
                            FetchRetry::GiveUp(event) => {
                                if self.events.send(event).await.is_err() {
                                    return false;
                                }
                                break;
                            }
                        }
                    }
                }
            }
        }
        true
    }
}
