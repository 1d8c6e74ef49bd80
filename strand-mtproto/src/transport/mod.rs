//! Sans-IO transport framings.
//!
//! A [`Transport`] turns MTProto payloads into bytes for a stream socket and
//! reassembles frames from whatever chunks the socket hands back. No I/O
//! happens here; the async driver owns the socket.
//!
//! ```rust
//! use strand_mtproto::transport::{Abridged, Transport};
//!
//! let mut client = Abridged::new();
//! let mut wire = client.init();
//! client.pack(&[1, 2, 3, 4], &mut wire);
//!
//! let mut server = Abridged::new();
//! server.feed(&wire[1..]);
//! assert_eq!(server.next_frame().unwrap(), Some(vec![1, 2, 3, 4]));
//! ```

mod abridged;
mod full;
mod intermediate;
mod obfuscated;

use std::fmt;

pub use abridged::Abridged;
pub use full::Full;
pub use intermediate::Intermediate;
pub use obfuscated::Obfuscated;

/// Largest frame accepted from the server.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Everything a framing can reject.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportError {
    /// A length header that is negative, too small or above [`MAX_FRAME_LEN`].
    BadLen { got: i64 },
    /// Full framing: CRC-32 trailer mismatch.
    BadCrc { expected: u32, got: u32 },
    /// Full framing: out-of-order sequence number.
    BadSeq { expected: i32, got: i32 },
    /// The server replied with a bare negative status code (e.g. -404).
    BadStatus { status: i32 },
    /// The requested combination cannot be built.
    Unsupported { reason: &'static str },
    /// The OS random source failed.
    Rng,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLen { got } => write!(f, "bad frame length: {got}"),
            Self::BadCrc { expected, got } => {
                write!(f, "bad crc: expected {expected:#010x}, got {got:#010x}")
            }
            Self::BadSeq { expected, got } => write!(f, "bad seq: expected {expected}, got {got}"),
            Self::BadStatus { status } => write!(f, "transport status {status}"),
            Self::Unsupported { reason } => write!(f, "unsupported transport: {reason}"),
            Self::Rng => write!(f, "random number generator failure"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A framing over a reliable byte stream.
pub trait Transport: Send {
    /// Bytes to write right after connecting, before the first frame.
    fn init(&mut self) -> Vec<u8>;

    /// Append the framed `payload` to `out`.
    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>);

    /// Buffer bytes read from the stream.
    fn feed(&mut self, bytes: &[u8]);

    /// Pop the next complete frame, or `None` if more bytes are needed.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Tag that announces this framing inside an obfuscated header.
    fn obfuscation_tag(&self) -> Option<[u8; 4]> { None }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn init(&mut self) -> Vec<u8> { (**self).init() }

    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>) { (**self).pack(payload, out) }

    fn feed(&mut self, bytes: &[u8]) { (**self).feed(bytes) }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> { (**self).next_frame() }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { (**self).obfuscation_tag() }
}

/// A 4-byte frame holding a negative integer is a status code, not a payload.
fn check_status(frame: Vec<u8>) -> Result<Vec<u8>, TransportError> {
    if frame.len() == 4 {
        let status = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if status < 0 {
            return Err(TransportError::BadStatus { status });
        }
    }
    Ok(frame)
}

fn check_len(len: usize) -> Result<(), TransportError> {
    if len > MAX_FRAME_LEN {
        return Err(TransportError::BadLen { got: len as i64 });
    }
    Ok(())
}
