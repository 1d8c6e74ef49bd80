use super::{Transport, TransportError, check_len, check_status};

/// [Intermediate] framing: `0xeeeeeeee` once, then a 4-byte little-endian
/// length before each payload.
///
/// [Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
#[derive(Debug, Default)]
pub struct Intermediate {
    buffer: Vec<u8>,
}

impl Intermediate {
    pub fn new() -> Self { Self::default() }
}

impl Transport for Intermediate {
    fn init(&mut self) -> Vec<u8> { vec![0xee; 4] }

    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }

    fn feed(&mut self, bytes: &[u8]) { self.buffer.extend_from_slice(bytes); }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let b = &self.buffer[..4];
        let len = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        if len < 0 {
            return Err(TransportError::BadLen { got: i64::from(len) });
        }
        let len = len as usize;
        check_len(len)?;
        if self.buffer.len() < 4 + len {
            return Ok(None);
        }
        let frame = self.buffer[4..4 + len].to_vec();
        self.buffer.drain(..4 + len);
        check_status(frame).map(Some)
    }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { Some([0xee; 4]) }
}
