//! RSA public keys and the RSA_PAD scheme used by the key exchange.
//!
//! The server proves its identity by offering fingerprints of keys the
//! client already trusts; nothing else about the key is negotiated.

use num_bigint::BigUint;

use crate::{CryptoError, aes, sha1, sha256};

/// Production DC key (fingerprint `-3414540481677951611`).
const PRODUCTION_N: &str = "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323";

/// Test DC key (fingerprint `-5595554452916591101`).
const TEST_N: &str = "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949";

/// Largest payload RSA_PAD accepts.
pub const MAX_PAYLOAD_LEN: usize = 144;

/// An RSA public key (n, e).
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    n: BigUint,
    e: BigUint,
    fingerprint: i64,
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self::from_parts(
            BigUint::parse_bytes(n.as_bytes(), 10)?,
            BigUint::parse_bytes(e.as_bytes(), 10)?,
        ))
    }

    pub fn from_parts(n: BigUint, e: BigUint) -> Self {
        let fingerprint = compute_fingerprint(&n, &e);
        Self { n, e, fingerprint }
    }

    /// Low 64 bits of SHA-1 over `rsa_public_key n:bytes e:bytes`, read as a
    /// little-endian `long`.
    pub fn fingerprint(&self) -> i64 { self.fingerprint }

    pub fn modulus(&self) -> &BigUint { &self.n }

    pub fn exponent(&self) -> &BigUint { &self.e }
}

fn compute_fingerprint(n: &BigUint, e: &BigUint) -> i64 {
    let mut buf = Vec::new();
    tl_bytes(&n.to_bytes_be(), &mut buf);
    tl_bytes(&e.to_bytes_be(), &mut buf);
    let sha = sha1!(&buf);
    let mut low = [0u8; 8];
    low.copy_from_slice(&sha[12..20]);
    i64::from_le_bytes(low)
}

// Same encoding as TL `bytes`; kept local so this crate stays schema-free.
fn tl_bytes(data: &[u8], out: &mut Vec<u8>) {
    let len = data.len();
    let header = if len <= 253 {
        out.push(len as u8);
        1
    } else {
        out.extend([0xfe, len as u8, (len >> 8) as u8, (len >> 16) as u8]);
        4
    };
    out.extend_from_slice(data);
    out.resize(out.len() + (4 - (header + len) % 4) % 4, 0);
}

// ─── TrustedKeys ─────────────────────────────────────────────────────────────

/// The pinned set of server keys, looked up by fingerprint.
#[derive(Clone, Debug)]
pub struct TrustedKeys {
    keys: Vec<Key>,
}

impl TrustedKeys {
    /// An empty set; every negotiation fails until keys are added.
    pub fn empty() -> Self { Self { keys: Vec::new() } }

    /// Both well-known server keys (production and test DCs).
    pub fn builtin() -> Self {
        let keys = [PRODUCTION_N, TEST_N]
            .into_iter()
            .filter_map(|n| Key::new(n, "65537"))
            .collect();
        Self { keys }
    }

    pub fn with(mut self, key: Key) -> Self {
        self.add(key);
        self
    }

    pub fn add(&mut self, key: Key) {
        if self.get(key.fingerprint).is_none() {
            self.keys.push(key);
        }
    }

    pub fn get(&self, fingerprint: i64) -> Option<&Key> {
        self.keys.iter().find(|k| k.fingerprint == fingerprint)
    }

    /// First offered fingerprint that is trusted, in the server's order.
    pub fn select(&self, offered: &[i64]) -> Result<&Key, CryptoError> {
        offered
            .iter()
            .find_map(|&fp| self.get(fp))
            .ok_or_else(|| CryptoError::UnknownFingerprint { offered: offered.to_vec() })
    }

    pub fn len(&self) -> usize { self.keys.len() }

    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
}

impl Default for TrustedKeys {
    fn default() -> Self { Self::builtin() }
}

// ─── RSA_PAD ─────────────────────────────────────────────────────────────────

/// RSA-encrypt `data` using the MTProto RSA_PAD scheme.
///
/// `random_bytes` supplies the padding (first 192 bytes) and the initial
/// temporary AES key (last 32 bytes).
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 224]) -> Result<Vec<u8>, CryptoError> {
    if data.len() > MAX_PAYLOAD_LEN {
        return Err(CryptoError::RsaPayloadTooLarge { len: data.len() });
    }

    let mut data_with_padding = Vec::with_capacity(192);
    data_with_padding.extend_from_slice(data);
    data_with_padding.extend_from_slice(&random_bytes[..192 - data.len()]);

    let data_pad_reversed: Vec<u8> = data_with_padding.iter().rev().copied().collect();

    let mut temp_key = [0u8; 32];
    temp_key.copy_from_slice(&random_bytes[192..]);

    let key_aes_encrypted = loop {
        let mut data_with_hash = Vec::with_capacity(224);
        data_with_hash.extend_from_slice(&data_pad_reversed);
        data_with_hash.extend_from_slice(&sha256!(&temp_key, &data_with_padding));

        aes::ige_encrypt(&mut data_with_hash, &temp_key, &[0u8; 32]);

        let hash = sha256!(&data_with_hash);
        let mut candidate = Vec::with_capacity(256);
        candidate.extend(temp_key.iter().zip(hash.iter()).map(|(a, b)| a ^ b));
        candidate.extend_from_slice(&data_with_hash);

        if BigUint::from_bytes_be(&candidate) < key.n {
            break candidate;
        }
        // Too large for the modulus: derive a fresh temporary key and retry.
        temp_key = sha256!(&temp_key);
    };

    let encrypted = BigUint::from_bytes_be(&key_aes_encrypted).modpow(&key.e, &key.n);
    Ok(left_pad_256(&encrypted.to_bytes_be()))
}

fn left_pad_256(bytes: &[u8]) -> Vec<u8> {
    let mut block = vec![0u8; 256usize.saturating_sub(bytes.len())];
    block.extend_from_slice(bytes);
    block
}
