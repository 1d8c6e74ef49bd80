//! Per-stream gap detection, without I/O.
//!
//! Every stream carries a counter. A batch advances it by `count`:
//!
//! * `counter <= local`: already seen, dropped.
//! * `counter == local + count`: applied.
//! * anything else: a gap. The batch is buffered and a difference must be
//!   fetched from `local` before the stream can move on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::{Storage, Stream, UpdatesState};

/// Failed difference fetches tolerated before a stream needs a full resync.
pub const MAX_DIFFERENCE_ATTEMPTS: u32 = 5;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Updates pushed together under one counter range.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateBatch {
    pub stream: Stream,
    /// Counter after applying this batch (`seq` or channel `pts`).
    pub counter: i32,
    /// How far this batch moves the counter.
    pub count: i32,
    pub date: i32,
    /// Account `pts` carried by a global batch, persisted with it.
    pub pts: Option<i32>,
    pub updates: Vec<Vec<u8>>,
}

/// Ask the server for everything on `stream` after `from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DifferenceRequest {
    pub stream: Stream,
    pub from: i32,
    pub date: i32,
}

/// What the server answered to a [`DifferenceRequest`].
#[derive(Clone, Debug, PartialEq)]
pub struct Difference {
    pub updates: Vec<Vec<u8>>,
    /// Authoritative counter once `updates` are applied.
    pub counter: i32,
    pub date: i32,
    /// `false` when the server has more and another fetch is needed.
    pub is_final: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateEvent {
    Update { stream: Stream, body: Vec<u8> },
    /// Gap recovery gave up; the stream must be resynchronised from scratch.
    ResyncNeeded(Stream),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Normal,
    /// A difference is needed but not being fetched yet.
    GapDetected,
    Recovering,
    NeedsFullResync,
}

/// Updates to deliver, and possibly a difference to fetch next.
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    pub events: Vec<UpdateEvent>,
    pub fetch: Option<DifferenceRequest>,
}

#[derive(Debug, PartialEq)]
pub enum FetchRetry {
    After { delay: Duration, request: DifferenceRequest },
    GiveUp(UpdateEvent),
}

#[derive(Debug)]
struct StreamState {
    phase: Phase,
    buffer: Vec<UpdateBatch>,
    failures: u32,
}

impl Default for StreamState {
    fn default() -> Self {
        Self { phase: Phase::Normal, buffer: Vec::new(), failures: 0 }
    }
}

/// Orders pushed batches per stream and tells the caller when to fetch.
pub struct UpdateManager {
    state: UpdatesState,
    streams: HashMap<Stream, StreamState>,
    storage: Arc<dyn Storage>,
}

impl UpdateManager {
    /// Resume from what `storage` remembers.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let state = storage.updates_state().unwrap_or_else(|e| {
            tracing::warn!("[strand] could not load update state from {}: {e}", storage.name());
            UpdatesState::default()
        });
        Self { state, streams: HashMap::new(), storage }
    }

    pub fn state(&self) -> &UpdatesState { &self.state }

    pub fn phase(&self, stream: Stream) -> Phase {
        self.streams.get(&stream).map_or(Phase::Normal, |s| s.phase)
    }

    pub fn handle_batch(&mut self, batch: UpdateBatch) -> Outcome {
        let stream = batch.stream;
        if stream == Stream::Global && batch.counter == 0 {
            return self.apply_unsequenced(batch);
        }

        let phase = self.phase(stream);
        if phase == Phase::NeedsFullResync {
            tracing::debug!("[strand] {stream:?} awaits a full resync, dropping batch {}", batch.counter);
            return Outcome::default();
        }

        let local = match self.state.counter(stream) {
            Some(local) => local,
            None => {
                let start = batch.counter - batch.count;
                tracing::debug!("[strand] first batch for {stream:?}, starting at {start}");
                self.set_counter(stream, start);
                start
            }
        };

        if batch.counter <= local {
            tracing::trace!("[strand] duplicate batch {} on {stream:?} (local {local})", batch.counter);
            return Outcome::default();
        }
        if phase != Phase::Normal {
            self.stream_mut(stream).buffer.push(batch);
            return Outcome::default();
        }
        if batch.counter == local + batch.count {
            let mut out = Outcome::default();
            self.apply(batch, &mut out.events);
            return out;
        }

        tracing::warn!(
            "[strand] gap on {stream:?}: local {local}, got {} (+{})",
            batch.counter,
            batch.count
        );
        let date = self.state.date;
        let s = self.stream_mut(stream);
        s.phase = Phase::GapDetected;
        s.failures = 0;
        s.buffer.push(batch);
        Outcome { events: Vec::new(), fetch: Some(DifferenceRequest { stream, from: local, date }) }
    }

    /// Mark that a fetch for `stream` is in flight.
    pub fn fetch_started(&mut self, stream: Stream) {
        self.stream_mut(stream).phase = Phase::Recovering;
    }

    /// Deliver a fetched difference, then replay whatever was buffered.
    pub fn apply_difference(&mut self, stream: Stream, diff: Difference) -> Outcome {
        let mut out = Outcome::default();
        out.events.extend(diff.updates.into_iter().map(|body| UpdateEvent::Update { stream, body }));
        self.set_counter(stream, diff.counter);
        if stream == Stream::Global {
            self.state.date = diff.date;
        }
        self.persist(stream, None);

        let mut buffered = std::mem::take(&mut self.stream_mut(stream).buffer);
        buffered.sort_by_key(|b| b.counter);
        let mut remaining = Vec::new();
        for batch in buffered {
            let local = self.state.counter(stream).unwrap_or(diff.counter);
            if !remaining.is_empty() {
                remaining.push(batch);
            } else if batch.counter <= local {
                tracing::trace!("[strand] buffered batch {} already covered", batch.counter);
            } else if batch.counter == local + batch.count {
                self.apply(batch, &mut out.events);
            } else {
                remaining.push(batch);
            }
        }

        let counter = self.state.counter(stream).unwrap_or(diff.counter);
        let date = self.state.date;
        let still_gapped = !remaining.is_empty();
        let s = self.stream_mut(stream);
        s.buffer = remaining;
        s.failures = 0;
        if still_gapped || !diff.is_final {
            s.phase = Phase::GapDetected;
            out.fetch = Some(DifferenceRequest { stream, from: counter, date });
        } else {
            s.phase = Phase::Normal;
        }
        out
    }

    /// Record a failed fetch and decide whether to try again.
    pub fn fetch_failed(&mut self, stream: Stream) -> FetchRetry {
        let from = self.state.counter(stream).unwrap_or_default();
        let date = self.state.date;
        let s = self.stream_mut(stream);
        s.failures += 1;
        if s.failures >= MAX_DIFFERENCE_ATTEMPTS {
            tracing::error!("[strand] giving up on {stream:?} after {} failed fetches", s.failures);
            s.phase = Phase::NeedsFullResync;
            s.buffer.clear();
            return FetchRetry::GiveUp(UpdateEvent::ResyncNeeded(stream));
        }
        s.phase = Phase::GapDetected;
        FetchRetry::After { delay: backoff(s.failures - 1), request: DifferenceRequest { stream, from, date } }
    }

    /// Request a difference for `stream` even though no gap was seen, e.g.
    /// after pushes were lost. `None` if one is already pending.
    pub fn force_difference(&mut self, stream: Stream) -> Option<DifferenceRequest> {
        let from = self.state.counter(stream)?;
        let date = self.state.date;
        let s = self.stream_mut(stream);
        if s.phase != Phase::Normal {
            return None;
        }
        s.phase = Phase::GapDetected;
        s.failures = 0;
        Some(DifferenceRequest { stream, from, date })
    }

    /// Start `stream` over from `counter` after an external resync.
    pub fn reset(&mut self, stream: Stream, counter: i32) {
        self.set_counter(stream, counter);
        self.persist(stream, None);
        self.streams.remove(&stream);
    }

    fn apply_unsequenced(&mut self, batch: UpdateBatch) -> Outcome {
        if batch.date > self.state.date {
            self.state.date = batch.date;
        }
        self.persist(Stream::Global, batch.pts);
        let events = batch
            .updates
            .into_iter()
            .map(|body| UpdateEvent::Update { stream: Stream::Global, body })
            .collect();
        Outcome { events, fetch: None }
    }

    fn apply(&mut self, batch: UpdateBatch, events: &mut Vec<UpdateEvent>) {
        let stream = batch.stream;
        self.set_counter(stream, batch.counter);
        if stream == Stream::Global {
            self.state.date = batch.date;
        }
        self.persist(stream, batch.pts);
        events.extend(batch.updates.into_iter().map(|body| UpdateEvent::Update { stream, body }));
    }

    fn set_counter(&mut self, stream: Stream, counter: i32) {
        match stream {
            Stream::Global => self.state.seq = counter,
            Stream::Channel(id) => {
                self.state.channels.insert(id, counter);
            }
        }
    }

    fn persist(&mut self, stream: Stream, pts: Option<i32>) {
        let result = match stream {
            Stream::Global => {
                if let Some(pts) = pts {
                    self.state.pts = pts;
                }
                self.storage
                    .set_seq_date(self.state.seq, self.state.date)
                    .and_then(|()| pts.map_or(Ok(()), |pts| self.storage.set_pts(Stream::Global, pts)))
            }
            Stream::Channel(id) => {
                let pts = self.state.channels.get(&id).copied().unwrap_or_default();
                self.storage.set_pts(stream, pts)
            }
        };
        if let Err(e) = result {
            tracing::warn!("[strand] could not persist {stream:?} state to {}: {e}", self.storage.name());
        }
    }

    fn stream_mut(&mut self, stream: Stream) -> &mut StreamState {
        self.streams.entry(stream).or_default()
    }
}

/// `500 ms · 2^n`, capped at 30 s.
pub fn backoff(n: u32) -> Duration {
    BACKOFF_BASE.saturating_mul(1u32.checked_shl(n).unwrap_or(u32::MAX)).min(BACKOFF_CAP)
}
