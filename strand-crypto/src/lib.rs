//! Cryptographic primitives for MTProto 2.0.
//!
//! Provides:
//! - AES-256-IGE encryption/decryption and the AES-256-CTR obfuscation stream
//! - SHA-1 / SHA-256 hash macros and CRC-32
//! - Pollard-rho PQ factorization
//! - RSA padding (RSA_PAD) and the pinned server key set
//! - DH group and public value validation
//! - `AuthKey`, the 256-byte session key
//! - MTProto 2.0 message encryption / decryption
//! - DH nonce→key derivation
//!
//! Everything here is a pure function of its inputs, apart from the random
//! padding drawn by [`encrypt_data_v2`].

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
pub mod dh;
mod factorize;
mod hash;
pub mod rsa;

pub use auth_key::AuthKey;
pub use factorize::factorize;
pub use hash::crc32;

#[doc(hidden)]
pub mod __private {
    pub use sha1;
    pub use sha2;
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Everything the crypto layer can reject.
#[derive(Clone, Debug, PartialEq)]
pub enum CryptoError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The `msg_key` in the ciphertext does not match the decrypted content.
    IntegrityMismatch,
    /// The server's DH group or public value failed validation.
    InvalidDhParameters { reason: &'static str },
    /// None of the offered RSA fingerprints is trusted.
    UnknownFingerprint { offered: Vec<i64> },
    /// RSA_PAD payload over 144 bytes.
    RsaPayloadTooLarge { len: usize },
    /// The OS random source failed.
    Rng,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::IntegrityMismatch => write!(f, "msg_key mismatch"),
            Self::InvalidDhParameters { reason } => write!(f, "insecure DH parameters: {reason}"),
            Self::UnknownFingerprint { offered } => {
                write!(f, "no trusted RSA key among fingerprints {offered:?}")
            }
            Self::RsaPayloadTooLarge { len } => write!(f, "RSA_PAD payload of {len} bytes exceeds 144"),
            Self::Rng => write!(f, "random number generator failure"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Fill an array from the OS random source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).map_err(|_| CryptoError::Rng)?;
    Ok(buf)
}

// ─── MTProto 2.0 encrypt / decrypt ───────────────────────────────────────────

/// Which end of the connection produced a message; selects the `x` offset
/// into the auth key (0 for client→server, 8 for server→client).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// `msg_key = SHA256(auth_key[88+x .. 120+x] ‖ plaintext)[8..24]`.
pub fn derive_message_key(auth_key: &AuthKey, plaintext: &[u8], side: Side) -> [u8; 16] {
    let x = side.x();
    let large = sha256!(&auth_key.data[88 + x..120 + x], plaintext);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&large[8..24]);
    msg_key
}

/// AES key and IV for one message, from the auth key and its `msg_key`.
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let sha_a = sha256!(msg_key, &auth_key.data[x..x + 36]);
    let sha_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..24].copy_from_slice(&sha_b[8..24]);
    aes_key[24..].copy_from_slice(&sha_a[24..]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..8].copy_from_slice(&sha_b[..8]);
    aes_iv[8..24].copy_from_slice(&sha_a[8..24]);
    aes_iv[24..].copy_from_slice(&sha_b[24..]);

    (aes_key, aes_iv)
}

/// 12..=1024 bytes are allowed; this always lands in 17..=32.
fn padding_len(len: usize) -> usize {
    16 + (16 - (len % 16))
}

/// Encrypt a client message: `key_id ‖ msg_key ‖ AES-IGE(plaintext ‖ padding)`.
pub fn encrypt_data_v2(plaintext: &[u8], auth_key: &AuthKey) -> Result<Vec<u8>, CryptoError> {
    encrypt_as(Side::Client, plaintext, auth_key, &random_bytes::<32>()?)
}

/// Encrypt a message as the server would (used to simulate the peer).
pub fn encrypt_data_v2_as_server(plaintext: &[u8], auth_key: &AuthKey) -> Result<Vec<u8>, CryptoError> {
    encrypt_as(Side::Server, plaintext, auth_key, &random_bytes::<32>()?)
}

pub(crate) fn encrypt_as(side: Side, plaintext: &[u8], auth_key: &AuthKey, rnd: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let pad = padding_len(plaintext.len());
    let mut padded = Vec::with_capacity(24 + plaintext.len() + pad);
    padded.extend_from_slice(&auth_key.key_id);
    padded.extend_from_slice(&[0u8; 16]);
    padded.extend_from_slice(plaintext);
    padded.extend_from_slice(&rnd[..pad]);

    let msg_key = derive_message_key(auth_key, &padded[24..], side);
    let (key, iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_encrypt(&mut padded[24..], &key, &iv);
    padded[8..24].copy_from_slice(&msg_key);
    Ok(padded)
}

/// Decrypt a server message. Returns the plaintext including its padding.
pub fn decrypt_data_v2(frame: &[u8], auth_key: &AuthKey) -> Result<Vec<u8>, CryptoError> {
    decrypt_from(Side::Server, frame, auth_key)
}

/// Decrypt a client message as the server would (used to simulate the peer).
pub fn decrypt_data_v2_from_client(frame: &[u8], auth_key: &AuthKey) -> Result<Vec<u8>, CryptoError> {
    decrypt_from(Side::Client, frame, auth_key)
}

fn decrypt_from(side: Side, frame: &[u8], auth_key: &AuthKey) -> Result<Vec<u8>, CryptoError> {
    if frame.len() < 24 + 16 || (frame.len() - 24) % 16 != 0 {
        return Err(CryptoError::InvalidBuffer);
    }
    if auth_key.key_id != frame[..8] {
        return Err(CryptoError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&frame[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    let mut plaintext = frame[24..].to_vec();
    aes::ige_decrypt(&mut plaintext, &key, &iv);

    if derive_message_key(auth_key, &plaintext, side) != msg_key {
        return Err(CryptoError::IntegrityMismatch);
    }
    Ok(plaintext)
}

/// Derive `(key, iv)` from nonces for the `server_DH_params_ok` envelope.
pub fn generate_key_data_from_nonce(server_nonce: &[u8; 16], new_nonce: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}
