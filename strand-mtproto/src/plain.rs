//! Plaintext messages, used only while negotiating an auth key.
//!
//! ```text
//! auth_key_id:long (= 0)  message_id:long  message_data_length:int  message_data
//! ```

use std::fmt;

use crate::message::MsgIdGenerator;

/// Errors in a plaintext server frame.
#[derive(Clone, Debug, PartialEq)]
pub enum PlainError {
    /// Fewer than 20 bytes.
    TooShort { len: usize },
    /// `auth_key_id` was not zero.
    EncryptedFrame { auth_key_id: i64 },
    /// The length field disagrees with the frame.
    BadLength { declared: i32, available: usize },
}

impl fmt::Display for PlainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(f, "plaintext frame of {len} bytes is too short"),
            Self::EncryptedFrame { auth_key_id } => {
                write!(f, "expected plaintext frame, got auth_key_id {auth_key_id:#x}")
            }
            Self::BadLength { declared, available } => {
                write!(f, "declared length {declared} but only {available} bytes follow")
            }
        }
    }
}

impl std::error::Error for PlainError {}

/// Frames plaintext handshake messages.
#[derive(Debug, Default)]
pub struct PlainSession {
    msg_ids: MsgIdGenerator,
}

impl PlainSession {
    pub fn new() -> Self { Self::default() }

    /// Wrap a serialized request.
    pub fn pack(&mut self, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20 + body.len());
        buf.extend(0i64.to_le_bytes());
        buf.extend(self.msg_ids.next().to_le_bytes());
        buf.extend((body.len() as i32).to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    /// Extract the body of a server frame.
    pub fn unpack(frame: &[u8]) -> Result<&[u8], PlainError> {
        if frame.len() < 20 {
            return Err(PlainError::TooShort { len: frame.len() });
        }
        let auth_key_id = i64::from_le_bytes(le_array(&frame[..8]));
        if auth_key_id != 0 {
            return Err(PlainError::EncryptedFrame { auth_key_id });
        }
        let declared = i32::from_le_bytes(le_array(&frame[16..20]));
        let available = frame.len() - 20;
        if declared < 0 || declared as usize > available {
            return Err(PlainError::BadLength { declared, available });
        }
        Ok(&frame[20..20 + declared as usize])
    }
}

pub(crate) fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_layout() {
        let mut s = PlainSession::new();
        let wire = s.pack(&[0xaa, 0xbb, 0xcc, 0xdd]);
        assert_eq!(wire.len(), 8 + 8 + 4 + 4);
        assert_eq!(&wire[..8], &[0u8; 8]);
        assert_eq!(i64::from_le_bytes(le_array(&wire[8..16])) % 4, 0);
        assert_eq!(PlainSession::unpack(&wire).unwrap(), &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn rejects_encrypted_and_truncated_frames() {
        let mut frame = PlainSession::new().pack(&[1, 2, 3, 4]);
        assert_eq!(
            PlainSession::unpack(&frame[..23]),
            Err(PlainError::BadLength { declared: 4, available: 3 })
        );
        frame[0] = 1;
        assert_eq!(PlainSession::unpack(&frame), Err(PlainError::EncryptedFrame { auth_key_id: 1 }));
        assert_eq!(PlainSession::unpack(&[0; 4]), Err(PlainError::TooShort { len: 4 }));
    }
}
