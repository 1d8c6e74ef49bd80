//! AES-256 in the two modes MTProto needs.
//!
//! * IGE, for message encryption and the key-exchange envelopes.
//! * CTR, as the keystream of the obfuscated transport.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use ctr::cipher::{KeyIvInit, StreamCipher};

type Block = [u8; 16];

fn xor(a: &Block, b: &Block) -> Block {
    std::array::from_fn(|i| a[i] ^ b[i])
}

fn load(chunk: &[u8]) -> Block {
    std::array::from_fn(|i| chunk[i])
}

/// Encrypt `buffer` in place with AES-256-IGE.
///
/// `iv` is `c₀ ‖ p₀` (the previous ciphertext block, then the previous
/// plaintext block).
///
/// # Panics
///
/// If `buffer.len()` is not a multiple of 16.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % 16, 0, "IGE input must be block-aligned");
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher = load(&iv[..16]);
    let mut prev_plain = load(&iv[16..]);

    for chunk in buffer.chunks_exact_mut(16) {
        let plain = load(chunk);
        let mut block = xor(&plain, &prev_cipher);
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        let out = xor(&block, &prev_plain);
        chunk.copy_from_slice(&out);
        prev_cipher = out;
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in place with AES-256-IGE.
///
/// # Panics
///
/// If `buffer.len()` is not a multiple of 16.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % 16, 0, "IGE input must be block-aligned");
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher = load(&iv[..16]);
    let mut prev_plain = load(&iv[16..]);

    for chunk in buffer.chunks_exact_mut(16) {
        let encrypted = load(chunk);
        let mut block = xor(&encrypted, &prev_plain);
        cipher.decrypt_block(GenericArray::from_mut_slice(&mut block));
        let out = xor(&block, &prev_cipher);
        chunk.copy_from_slice(&out);
        prev_cipher = encrypted;
        prev_plain = out;
    }
}

// ─── CTR ─────────────────────────────────────────────────────────────────────

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// AES-256-CTR keystream (128-bit big-endian counter).
///
/// Stateful: successive [`CtrCipher::apply`] calls continue the stream, so a
/// connection keeps one instance per direction for its whole lifetime.
pub struct CtrCipher {
    inner: Aes256Ctr,
}

impl CtrCipher {
    pub fn new(key: &[u8; 32], iv: &[u8; 16]) -> Self {
        Self {
            inner: Aes256Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
        }
    }

    /// XOR `data` in place with the next `data.len()` keystream bytes.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

impl std::fmt::Debug for CtrCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CtrCipher { .. }")
    }
}
