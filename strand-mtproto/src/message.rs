//! Message identifiers, sequence numbers and the inner message layout.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Client message ids are always divisible by four.
pub type MsgId = i64;

/// Generates strictly increasing message ids from (server-corrected) time.
///
/// `msg_id = (unix_secs << 32) | (nanos << 2)`; when the clock did not move
/// forward the previous id plus four is used instead.
#[derive(Clone, Debug, Default)]
pub struct MsgIdGenerator {
    last: i64,
    time_offset: i32,
}

impl MsgIdGenerator {
    /// Create a generator with the given clock skew (server − local seconds).
    pub fn new(time_offset: i32) -> Self {
        Self { last: 0, time_offset }
    }

    /// Next id for the current wall-clock time.
    pub fn next(&mut self) -> MsgId {
        self.next_at(now())
    }

    /// Next id as if the local clock read `since_epoch`.
    pub fn next_at(&mut self, since_epoch: Duration) -> MsgId {
        let secs = (since_epoch.as_secs() as i64).wrapping_add(i64::from(self.time_offset));
        let nanos = i64::from(since_epoch.subsec_nanos());
        let mut id = (secs << 32) | (nanos << 2);
        if id <= self.last {
            id = self.last + 4;
        }
        self.last = id;
        id
    }

    /// Recompute the clock skew from a message id the server generated.
    ///
    /// Returns the new offset. Ids issued before the correction are
    /// forgotten, so the next id follows the corrected clock even when it
    /// moved backwards.
    pub fn correct(&mut self, server_msg_id: i64) -> i32 {
        let server_secs = server_msg_id >> 32;
        self.time_offset = (server_secs - now().as_secs() as i64) as i32;
        self.last = 0;
        self.time_offset
    }

    /// Current clock skew in seconds.
    pub fn time_offset(&self) -> i32 { self.time_offset }

    /// Server time, in seconds, according to the current skew.
    pub fn server_time(&self) -> i32 {
        (now().as_secs() as i64 + i64::from(self.time_offset)) as i32
    }
}

fn now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Sequence number counter.
///
/// Content messages take `2n + 1` and advance the counter; service messages
/// (acks, containers) take `2n` and leave it unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeqNo {
    sequence: i32,
}

impl SeqNo {
    pub fn next(&mut self, content_related: bool) -> i32 {
        if content_related {
            let n = self.sequence * 2 + 1;
            self.sequence += 1;
            n
        } else {
            self.sequence * 2
        }
    }

    pub fn reset(&mut self) { self.sequence = 0; }
}

/// One message as it appears inside a container or an encrypted envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_id: MsgId,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    /// Size of `msg_id ‖ seq_no ‖ bytes` before the body.
    pub const HEADER_LEN: usize = 8 + 4 + 4;

    /// Bytes this message takes inside a container.
    pub fn wire_len(&self) -> usize { Self::HEADER_LEN + self.body.len() }

    /// Whether the server must acknowledge it.
    pub fn requires_ack(&self) -> bool { self.seq_no & 1 == 1 }

    /// Append `msg_id ‖ seq_no ‖ len ‖ body`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend(self.msg_id.to_le_bytes());
        out.extend(self.seq_no.to_le_bytes());
        out.extend((self.body.len() as i32).to_le_bytes());
        out.extend_from_slice(&self.body);
    }
}
