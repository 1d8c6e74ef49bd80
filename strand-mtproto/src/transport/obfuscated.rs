use strand_crypto::aes::CtrCipher;
use strand_crypto::sha256;

use super::{Transport, TransportError};

/// First words a random header must never start with, because servers and
/// middleboxes would mistake them for another protocol.
const RESERVED_PREFIXES: [[u8; 4]; 7] = [
    *b"HEAD",
    *b"POST",
    *b"GET ",
    *b"OPTI",
    [0xee, 0xee, 0xee, 0xee],
    [0xdd, 0xdd, 0xdd, 0xdd],
    [0x16, 0x03, 0x01, 0x02],
];

/// [Obfuscated] wrapper: AES-256-CTR over an inner framing, keyed from a
/// random 64-byte header that is sent first.
///
/// Any framing that reports an obfuscation tag can be wrapped; all three
/// built-in ones do. An optional 16-byte proxy secret is mixed into both
/// keys.
///
/// [Obfuscated]: https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation
pub struct Obfuscated<T: Transport> {
    inner: T,
    header: Option<[u8; 64]>,
    encrypt: CtrCipher,
    decrypt: CtrCipher,
}

impl<T: Transport> Obfuscated<T> {
    /// Wrap `inner` with a freshly generated header.
    pub fn new(inner: T, secret: Option<&[u8; 16]>) -> Result<Self, TransportError> {
        let mut random = [0u8; 64];
        loop {
            getrandom::getrandom(&mut random).map_err(|_| TransportError::Rng)?;
            if is_valid_header(&random) {
                break;
            }
        }
        Self::with_header(inner, random, secret)
    }

    /// Wrap `inner` using `random` as the header material. Bytes 56..64 are
    /// overwritten with the encrypted tag.
    pub fn with_header(inner: T, random: [u8; 64], secret: Option<&[u8; 16]>) -> Result<Self, TransportError> {
        let tag = inner
            .obfuscation_tag()
            .ok_or(TransportError::Unsupported { reason: "framing has no obfuscation tag" })?;

        let (mut encrypt, decrypt) = derive_ciphers(&random, secret, false);

        let mut header = random;
        header[56..60].copy_from_slice(&tag);
        let mut encrypted = header;
        encrypt.apply(&mut encrypted);
        header[56..64].copy_from_slice(&encrypted[56..64]);

        Ok(Self { inner, header: Some(header), encrypt, decrypt })
    }

    /// The server end of a connection whose client sent `header`.
    ///
    /// Fails unless the decrypted tag matches `inner`'s framing.
    pub fn server(inner: T, header: &[u8; 64], secret: Option<&[u8; 16]>) -> Result<Self, TransportError> {
        let tag = inner
            .obfuscation_tag()
            .ok_or(TransportError::Unsupported { reason: "framing has no obfuscation tag" })?;

        let (encrypt, mut decrypt) = derive_ciphers(header, secret, true);

        let mut plain = *header;
        decrypt.apply(&mut plain);
        if plain[56..60] != tag {
            return Err(TransportError::Unsupported { reason: "obfuscation tag mismatch" });
        }

        Ok(Self { inner, header: None, encrypt, decrypt })
    }
}

/// Client direction keys come from `header[8..56]`; the reverse direction
/// from the same 48 bytes reversed.
fn derive_ciphers(header: &[u8; 64], secret: Option<&[u8; 16]>, server: bool) -> (CtrCipher, CtrCipher) {
    let mut reversed = [0u8; 48];
    reversed.copy_from_slice(&header[8..56]);
    reversed.reverse();

    let cipher = |key_iv: &[u8]| {
        let mut key = [0u8; 32];
        key.copy_from_slice(&key_iv[..32]);
        if let Some(secret) = secret {
            key = sha256!(&key, secret);
        }
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&key_iv[32..48]);
        CtrCipher::new(&key, &iv)
    };

    let forward = cipher(&header[8..56]);
    let backward = cipher(&reversed);
    if server { (backward, forward) } else { (forward, backward) }
}

fn is_valid_header(random: &[u8; 64]) -> bool {
    let first = [random[0], random[1], random[2], random[3]];
    random[0] != 0xef && !RESERVED_PREFIXES.contains(&first) && random[4..8] != [0; 4]
}

impl<T: Transport> Transport for Obfuscated<T> {
    fn init(&mut self) -> Vec<u8> {
        self.header.take().map(Vec::from).unwrap_or_default()
    }

    fn pack(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        self.inner.pack(payload, out);
        self.encrypt.apply(&mut out[start..]);
    }

    fn feed(&mut self, bytes: &[u8]) {
        let mut plain = bytes.to_vec();
        self.decrypt.apply(&mut plain);
        self.inner.feed(&plain);
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> { self.inner.next_frame() }
}

impl<T: Transport> std::fmt::Debug for Obfuscated<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Obfuscated").field("header_sent", &self.header.is_none()).finish()
    }
}
