use super::{Transport, TransportError, check_len, check_status};

/// [Abridged] framing: `0xef` once, then `len/4` as one byte (or `0x7f` and
/// three little-endian bytes) before each payload.
///
/// [Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
#[derive(Debug, Default)]
pub struct Abridged {
    buffer: Vec<u8>,
}

impl Abridged {
    pub fn new() -> Self { Self::default() }
}

impl Transport for Abridged {
    fn init(&mut self) -> Vec<u8> { vec![0xef] }

    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        debug_assert_eq!(payload.len() % 4, 0);
        let words = payload.len() / 4;
        if words < 0x7f {
            out.push(words as u8);
        } else {
            out.push(0x7f);
            out.extend_from_slice(&(words as u32).to_le_bytes()[..3]);
        }
        out.extend_from_slice(payload);
    }

    fn feed(&mut self, bytes: &[u8]) { self.buffer.extend_from_slice(bytes); }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(&first) = self.buffer.first() else {
            return Ok(None);
        };
        let (header, words) = match first {
            0x7f => {
                if self.buffer.len() < 4 {
                    return Ok(None);
                }
                let b = &self.buffer[1..4];
                (4, u32::from_le_bytes([b[0], b[1], b[2], 0]) as usize)
            }
            w if w < 0x7f => (1, w as usize),
            other => return Err(TransportError::BadLen { got: i64::from(other) }),
        };
        let len = words * 4;
        check_len(len)?;
        if self.buffer.len() < header + len {
            return Ok(None);
        }
        let frame = self.buffer[header..header + len].to_vec();
        self.buffer.drain(..header + len);
        check_status(frame).map(Some)
    }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { Some([0xef; 4]) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_header() {
        let mut out = Vec::new();
        Abridged::new().pack(&[0; 8], &mut out);
        assert_eq!(out[0], 2);
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn long_header_from_0x7f_words() {
        let payload = vec![7u8; 0x7f * 4];
        let mut out = Vec::new();
        Abridged::new().pack(&payload, &mut out);
        assert_eq!(&out[..4], &[0x7f, 0x7f, 0, 0]);

        let mut rx = Abridged::new();
        rx.feed(&out);
        assert_eq!(rx.next_frame().unwrap(), Some(payload));
    }

    #[test]
    fn high_bit_header_is_rejected() {
        let mut rx = Abridged::new();
        rx.feed(&[0x80]);
        assert_eq!(rx.next_frame(), Err(TransportError::BadLen { got: 0x80 }));
    }
}
