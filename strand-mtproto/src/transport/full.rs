use strand_crypto::crc32;

use super::{MAX_FRAME_LEN, Transport, TransportError, check_status};

/// [Full] framing: `len ‖ seq ‖ payload ‖ crc32`, no init bytes.
///
/// `len` counts all four parts. Each direction numbers its frames from zero;
/// a wrong number or checksum is fatal for the connection.
///
/// Under obfuscation it is announced with `0xdddddddd`. Telegram's servers
/// read that tag as padded intermediate, so obfuscated Full only works with
/// peers that expect it.
///
/// [Full]: https://core.telegram.org/mtproto/mtproto-transports#full
#[derive(Debug, Default)]
pub struct Full {
    send_seq: i32,
    recv_seq: i32,
    buffer: Vec<u8>,
}

impl Full {
    pub fn new() -> Self { Self::default() }
}

impl Transport for Full {
    fn init(&mut self) -> Vec<u8> { Vec::new() }

    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&((payload.len() + 12) as i32).to_le_bytes());
        out.extend_from_slice(&self.send_seq.to_le_bytes());
        out.extend_from_slice(payload);
        let crc = crc32(&[&out[start..]]);
        out.extend_from_slice(&crc.to_le_bytes());
        self.send_seq += 1;
    }

    fn feed(&mut self, bytes: &[u8]) { self.buffer.extend_from_slice(bytes); }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let word = |at: usize| {
            let b = &self.buffer[at..at + 4];
            [b[0], b[1], b[2], b[3]]
        };

        let len = i32::from_le_bytes(word(0));
        if len < 12 || len as usize > MAX_FRAME_LEN + 12 {
            return Err(TransportError::BadLen { got: i64::from(len) });
        }
        let len = len as usize;
        if self.buffer.len() < len {
            return Ok(None);
        }

        let got = u32::from_le_bytes(word(len - 4));
        let expected = crc32(&[&self.buffer[..len - 4]]);
        if got != expected {
            return Err(TransportError::BadCrc { expected, got });
        }

        let seq = i32::from_le_bytes(word(4));
        if seq != self.recv_seq {
            return Err(TransportError::BadSeq { expected: self.recv_seq, got: seq });
        }
        self.recv_seq += 1;

        let frame = self.buffer[8..len - 4].to_vec();
        self.buffer.drain(..len);
        check_status(frame).map(Some)
    }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { Some([0xdd; 4]) }
}
