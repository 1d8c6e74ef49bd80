//! Sans-IO MTProto authorization key generation.
//!
//! # Flow
//!
//! ```text
//! let (req, s1) = authentication::step1()?;
//! // send req, receive resp
//! let (req, s2) = authentication::step2(s1, resp, dc_id, &trusted)?;
//! // send req, receive resp
//! let (req, s3) = authentication::step3(s2, resp)?;
//! // send req, receive resp
//! let done = authentication::finish(s3, resp)?;
//! // done.auth_key is ready
//! ```
//!
//! Every step checks that the server echoed our nonces. The caller restarts
//! from [`step1`] when [`NegotiationError::VerificationFailed`] is returned.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;
use strand_crypto::rsa::TrustedKeys;
use strand_crypto::{AuthKey, CryptoError, aes, dh, factorize, generate_key_data_from_nonce, random_bytes, rsa, sha1};
use strand_tl::{Cursor, Deserializable, Serializable, enums, functions, types};

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors that can occur during auth key generation.
#[derive(Clone, Debug, PartialEq)]
pub enum NegotiationError {
    InvalidNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidServerNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidPqSize { size: usize },
    /// `pq` did not split into two factors.
    Factorization { pq: u64 },
    /// None of the offered fingerprints belongs to a trusted key.
    NoTrustedKey { offered: Vec<i64> },
    /// The server answered `server_DH_params_fail`.
    DhParamsFail,
    EncryptedResponseNotPadded { len: usize },
    InvalidDhInnerData { error: strand_tl::deserialize::Error },
    InvalidAnswerHash { got: [u8; 20], expected: [u8; 20] },
    /// The DH group or a public value failed validation.
    InsecureParameters(CryptoError),
    /// `new_nonce_hash` mismatch, `dh_gen_retry` or `dh_gen_fail`.
    VerificationFailed { reason: &'static str },
    /// Randomness or RSA encryption failed locally.
    Crypto(CryptoError),
}

impl std::error::Error for NegotiationError {}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNonce { got, expected } => {
                write!(f, "nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidServerNonce { got, expected } => {
                write!(f, "server_nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidPqSize { size } => write!(f, "pq size {size} invalid (expected 8)"),
            Self::Factorization { pq } => write!(f, "could not factorize pq={pq}"),
            Self::NoTrustedKey { offered } => write!(f, "no trusted key among fingerprints {offered:?}"),
            Self::DhParamsFail => write!(f, "server returned DH params failure"),
            Self::EncryptedResponseNotPadded { len } => {
                write!(f, "encrypted answer len {len} is not 16-byte aligned")
            }
            Self::InvalidDhInnerData { error } => write!(f, "DH inner data deserialization error: {error}"),
            Self::InvalidAnswerHash { got, expected } => {
                write!(f, "answer hash mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InsecureParameters(e) => write!(f, "{e}"),
            Self::VerificationFailed { reason } => write!(f, "key verification failed: {reason}"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
        }
    }
}

impl From<CryptoError> for NegotiationError {
    fn from(e: CryptoError) -> Self { Self::Crypto(e) }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// State after step 1.
pub struct Step1 {
    nonce: [u8; 16],
}

/// State after step 2.
pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

/// State after step 3.
pub struct Step3 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    gab: BigUint,
    time_offset: i32,
}

/// The final output of a successful auth key handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    /// The 256-byte authorization key.
    pub auth_key: [u8; 256],
    /// Clock skew in seconds relative to the server.
    pub time_offset: i32,
    /// Initial server salt.
    pub first_salt: i64,
}

// ─── Step 1: req_pq_multi ────────────────────────────────────────────────────

/// Generate a `req_pq_multi` request. Returns the request + opaque state.
pub fn step1() -> Result<(functions::ReqPqMulti, Step1), NegotiationError> {
    let nonce = random_bytes::<16>()?;
    Ok((functions::ReqPqMulti { nonce }, Step1 { nonce }))
}

// ─── Step 2: req_DH_params ───────────────────────────────────────────────────

/// Process `ResPQ` and generate `req_DH_params` for data center `dc_id`.
pub fn step2(
    data: Step1,
    response: types::ResPq,
    dc_id: i32,
    trusted: &TrustedKeys,
) -> Result<(functions::ReqDhParams, Step2), NegotiationError> {
    do_step2(data, response, dc_id, trusted, &random_bytes::<256>()?)
}

fn do_step2(
    data: Step1,
    res_pq: types::ResPq,
    dc_id: i32,
    trusted: &TrustedKeys,
    random: &[u8; 256],
) -> Result<(functions::ReqDhParams, Step2), NegotiationError> {
    let Step1 { nonce } = data;
    check_nonce(&res_pq.nonce, &nonce)?;

    let pq_bytes: [u8; 8] = res_pq
        .pq
        .as_slice()
        .try_into()
        .map_err(|_| NegotiationError::InvalidPqSize { size: res_pq.pq.len() })?;
    let pq = u64::from_be_bytes(pq_bytes);
    let (p, q) = factorize(pq).ok_or(NegotiationError::Factorization { pq })?;

    let key = trusted.select(&res_pq.server_public_key_fingerprints).map_err(|_| {
        NegotiationError::NoTrustedKey { offered: res_pq.server_public_key_fingerprints.clone() }
    })?;

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);
    let mut rsa_random = [0u8; 224];
    rsa_random.copy_from_slice(&random[32..]);

    let p_bytes = trim_be(p);
    let q_bytes = trim_be(q);

    let pq_inner = types::PQInnerDataDc {
        pq: pq_bytes.to_vec(),
        p: p_bytes.clone(),
        q: q_bytes.clone(),
        nonce,
        server_nonce: res_pq.server_nonce,
        new_nonce,
        dc: dc_id,
    }
    .to_bytes();

    let encrypted_data = rsa::encrypt_hashed(&pq_inner, key, &rsa_random)?;
    log::debug!("[strand] step2: pq factorized, using key {:#x}", key.fingerprint());

    Ok((
        functions::ReqDhParams {
            nonce,
            server_nonce: res_pq.server_nonce,
            p: p_bytes,
            q: q_bytes,
            public_key_fingerprint: key.fingerprint(),
            encrypted_data,
        },
        Step2 { nonce, server_nonce: res_pq.server_nonce, new_nonce },
    ))
}

fn trim_be(v: u64) -> Vec<u8> {
    let b = v.to_be_bytes();
    let skip = b.iter().position(|&x| x != 0).unwrap_or(7);
    b[skip..].to_vec()
}

// ─── Step 3: set_client_DH_params ────────────────────────────────────────────

/// Process `Server_DH_Params` and generate `set_client_DH_params`.
pub fn step3(
    data: Step2,
    response: enums::ServerDhParams,
) -> Result<(functions::SetClientDhParams, Step3), NegotiationError> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i32;
    do_step3(data, response, &random_bytes::<272>()?, now)
}

fn do_step3(
    data: Step2,
    response: enums::ServerDhParams,
    random: &[u8; 272],
    now: i32,
) -> Result<(functions::SetClientDhParams, Step3), NegotiationError> {
    let Step2 { nonce, server_nonce, new_nonce } = data;

    let mut server_dh_ok = match response {
        enums::ServerDhParams::Fail(f) => {
            check_nonce(&f.nonce, &nonce)?;
            check_server_nonce(&f.server_nonce, &server_nonce)?;
            let digest = sha1!(new_nonce);
            if f.new_nonce_hash[..] != digest[4..] {
                return Err(NegotiationError::VerificationFailed { reason: "server_DH_params_fail hash mismatch" });
            }
            return Err(NegotiationError::DhParamsFail);
        }
        enums::ServerDhParams::Ok(x) => x,
    };

    check_nonce(&server_dh_ok.nonce, &nonce)?;
    check_server_nonce(&server_dh_ok.server_nonce, &server_nonce)?;

    let len = server_dh_ok.encrypted_answer.len();
    if len % 16 != 0 || len < 32 {
        return Err(NegotiationError::EncryptedResponseNotPadded { len });
    }

    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    aes::ige_decrypt(&mut server_dh_ok.encrypted_answer, &key, &iv);
    let plain = server_dh_ok.encrypted_answer;

    let mut got_hash = [0u8; 20];
    got_hash.copy_from_slice(&plain[..20]);
    let mut cursor = Cursor::from_slice(&plain[20..]);
    let inner = types::ServerDhInnerData::deserialize(&mut cursor)
        .map_err(|error| NegotiationError::InvalidDhInnerData { error })?;

    let expected_hash = sha1!(&plain[20..20 + cursor.pos()]);
    if got_hash != expected_hash {
        return Err(NegotiationError::InvalidAnswerHash { got: got_hash, expected: expected_hash });
    }

    check_nonce(&inner.nonce, &nonce)?;
    check_server_nonce(&inner.server_nonce, &server_nonce)?;

    let g = u32::try_from(inner.g).map_err(|_| {
        NegotiationError::InsecureParameters(CryptoError::InvalidDhParameters { reason: "generator outside 2..=7" })
    })?;
    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    let g_a = BigUint::from_bytes_be(&inner.g_a);
    let b = BigUint::from_bytes_be(&random[..256]);

    let (g_b, gab) =
        dh::compute_shared_secret(g, &dh_prime, &b, &g_a).map_err(NegotiationError::InsecureParameters)?;
    let time_offset = inner.server_time.wrapping_sub(now);

    let client_dh_inner = types::ClientDhInnerData {
        nonce,
        server_nonce,
        retry_id: 0,
        g_b: g_b.to_bytes_be(),
    }
    .to_bytes();

    let digest = sha1!(&client_dh_inner);
    let pad_len = (16 - ((20 + client_dh_inner.len()) % 16)) % 16;

    let mut hashed = Vec::with_capacity(20 + client_dh_inner.len() + pad_len);
    hashed.extend_from_slice(&digest);
    hashed.extend_from_slice(&client_dh_inner);
    hashed.extend_from_slice(&random[256..256 + pad_len]);

    aes::ige_encrypt(&mut hashed, &key, &iv);

    Ok((
        functions::SetClientDhParams { nonce, server_nonce, encrypted_data: hashed },
        Step3 { nonce, server_nonce, new_nonce, gab, time_offset },
    ))
}

// ─── finish: create_key ──────────────────────────────────────────────────────

/// Finalise the handshake. Returns the ready [`Finished`] on success.
pub fn finish(data: Step3, response: enums::SetClientDhParamsAnswer) -> Result<Finished, NegotiationError> {
    let Step3 { nonce, server_nonce, new_nonce, gab, time_offset } = data;

    let (answer_nonce, answer_server_nonce, hash, num) = match response {
        enums::SetClientDhParamsAnswer::DhGenOk(x) => (x.nonce, x.server_nonce, x.new_nonce_hash1, 1),
        enums::SetClientDhParamsAnswer::DhGenRetry(x) => (x.nonce, x.server_nonce, x.new_nonce_hash2, 2),
        enums::SetClientDhParamsAnswer::DhGenFail(x) => (x.nonce, x.server_nonce, x.new_nonce_hash3, 3),
    };

    check_nonce(&answer_nonce, &nonce)?;
    check_server_nonce(&answer_server_nonce, &server_nonce)?;

    let mut key_bytes = [0u8; 256];
    let gab_bytes = gab.to_bytes_be();
    let skip = 256usize.saturating_sub(gab_bytes.len());
    key_bytes[skip..].copy_from_slice(&gab_bytes[gab_bytes.len().saturating_sub(256)..]);

    let auth_key = AuthKey::from_bytes(key_bytes);
    if auth_key.calc_new_nonce_hash(&new_nonce, num) != hash {
        return Err(NegotiationError::VerificationFailed { reason: "new_nonce_hash mismatch" });
    }

    match num {
        1 => {
            let mut salt = [0u8; 8];
            for ((dst, a), b) in salt.iter_mut().zip(&new_nonce[..8]).zip(&server_nonce[..8]) {
                *dst = a ^ b;
            }
            Ok(Finished { auth_key: key_bytes, time_offset, first_salt: i64::from_le_bytes(salt) })
        }
        2 => Err(NegotiationError::VerificationFailed { reason: "server asked for dh_gen_retry" }),
        _ => Err(NegotiationError::VerificationFailed { reason: "server answered dh_gen_fail" }),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), NegotiationError> {
    if got == expected {
        Ok(())
    } else {
        Err(NegotiationError::InvalidNonce { got: *got, expected: *expected })
    }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), NegotiationError> {
    if got == expected {
        Ok(())
    } else {
        Err(NegotiationError::InvalidServerNonce { got: *got, expected: *expected })
    }
}
