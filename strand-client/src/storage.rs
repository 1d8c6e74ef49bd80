//! Pluggable persistence for auth keys, update state and the peer cache.
//!
//! The [`Storage`] trait abstracts over where these live so that callers can
//! plug in a database, a file, or anything else. [`InMemoryStorage`] keeps
//! everything in process memory.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

// ─── Update state ─────────────────────────────────────────────────────────────

/// An independently ordered sequence of updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stream {
    /// The account-wide stream, ordered by `seq`.
    Global,
    /// A channel's stream, ordered by that channel's `pts`.
    Channel(i64),
}

/// Everything needed to resume processing updates in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UpdatesState {
    /// Account-wide persistent timestamp.
    pub pts: i32,
    /// Account-wide sequence number.
    pub seq: i32,
    /// Date of the last applied global batch.
    pub date: i32,
    /// `pts` of every channel seen so far.
    pub channels: BTreeMap<i64, i32>,
}

impl UpdatesState {
    /// The ordering counter of `stream`, or `None` for a channel never seen.
    pub fn counter(&self, stream: Stream) -> Option<i32> {
        match stream {
            Stream::Global => Some(self.seq),
            Stream::Channel(id) => self.channels.get(&id).copied(),
        }
    }
}

// ─── Peer cache ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PeerKind {
    User,
    Chat,
    Channel,
}

/// A cached peer. The entity bytes are opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerCacheEntry {
    pub id: i64,
    pub access_hash: i64,
    pub kind: PeerKind,
    /// The serialized entity as last received.
    pub entity: Vec<u8>,
    /// Unix time of the last refresh.
    pub updated_at: i64,
    /// Seconds a resolved username stays valid, if the server said.
    pub username_ttl: Option<u32>,
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// Where auth keys, update state and cached peers are kept between runs.
pub trait Storage: Send + Sync {
    /// The auth key for `dc_id`, if one was negotiated before.
    fn auth_key(&self, dc_id: i32) -> io::Result<Option<[u8; 256]>>;

    /// Store the auth key for `dc_id`, or forget it with `None`.
    fn set_auth_key(&self, dc_id: i32, key: Option<[u8; 256]>) -> io::Result<()>;

    fn updates_state(&self) -> io::Result<UpdatesState>;

    /// Persist `pts` for `stream`. For [`Stream::Global`] this is the
    /// account-wide `pts`, not the `seq`.
    fn set_pts(&self, stream: Stream, pts: i32) -> io::Result<()>;

    fn set_seq_date(&self, seq: i32, date: i32) -> io::Result<()>;

    fn peer(&self, id: i64) -> io::Result<Option<PeerCacheEntry>>;

    fn set_peer(&self, entry: PeerCacheEntry) -> io::Result<()>;

    /// Human-readable name of this storage (for log messages).
    fn name(&self) -> &str;
}

// ─── InMemoryStorage ──────────────────────────────────────────────────────────

/// Storage that lives as long as the process.
///
/// Useful for tests, or for clients that should always start fresh.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: Mutex<Data>,
}

#[derive(Debug, Default)]
struct Data {
    auth_keys: HashMap<i32, [u8; 256]>,
    state:     UpdatesState,
    peers:     HashMap<i64, PeerCacheEntry>,
}

impl InMemoryStorage {
    pub fn new() -> Self { Self::default() }

    /// Storage that already holds `key` for `dc_id`.
    pub fn with_auth_key(dc_id: i32, key: [u8; 256]) -> Self {
        let storage = Self::new();
        storage.lock().auth_keys.insert(dc_id, key);
        storage
    }

    fn lock(&self) -> MutexGuard<'_, Data> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for InMemoryStorage {
    fn auth_key(&self, dc_id: i32) -> io::Result<Option<[u8; 256]>> {
        Ok(self.lock().auth_keys.get(&dc_id).copied())
    }

    fn set_auth_key(&self, dc_id: i32, key: Option<[u8; 256]>) -> io::Result<()> {
        let mut data = self.lock();
        match key {
            Some(key) => data.auth_keys.insert(dc_id, key),
            None => data.auth_keys.remove(&dc_id),
        };
        Ok(())
    }

    fn updates_state(&self) -> io::Result<UpdatesState> {
        Ok(self.lock().state.clone())
    }

    fn set_pts(&self, stream: Stream, pts: i32) -> io::Result<()> {
        let mut data = self.lock();
        match stream {
            Stream::Global => data.state.pts = pts,
            Stream::Channel(id) => {
                data.state.channels.insert(id, pts);
            }
        }
        Ok(())
    }

    fn set_seq_date(&self, seq: i32, date: i32) -> io::Result<()> {
        let mut data = self.lock();
        data.state.seq = seq;
        data.state.date = date;
        Ok(())
    }

    fn peer(&self, id: i64) -> io::Result<Option<PeerCacheEntry>> {
        Ok(self.lock().peers.get(&id).cloned())
    }

    fn set_peer(&self, entry: PeerCacheEntry) -> io::Result<()> {
        self.lock().peers.insert(entry.id, entry);
        Ok(())
    }

    fn name(&self) -> &str { "in-memory" }
}
