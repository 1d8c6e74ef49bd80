//! Key exchange against a simulated server holding a private test key.

use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;
use strand_crypto::rsa::{Key, TrustedKeys};
use strand_crypto::{AuthKey, aes, dh, generate_key_data_from_nonce, sha1, sha256};
use strand_mtproto::authentication::{self, NegotiationError};
use strand_tl::{Deserializable, Serializable, enums, functions, types};

const TEST_N: &str = "23102039057924439442447123106608558475198675679113884951812013274344671174758065466485187260519700642496989641222333385086089063785360321628668276673160974278248647696872276551345288390618669289346279737617339553109347039203358067246176168785998224926409900776019883212040832174074708622496391903552886950658573870582708380310503264135017678002508102070486187440784385313626266529333130777241114210888063494651089836757476732545563672248464512845826448686845075053265943776704524180973053160555159251052923629578840629773604998585493151024077792043800324985552070846995440047961349217074971695343473292268900898812781";
const TEST_D: &str = "1638378735697236784135991684275022430580856281346030765448478503699309410588619588079691413842849311120215934318952680953496410988658679548089049523130547349073856595822912187485354474951001801709974780258822619582730266572735112535143290098049276232059225839197365567374619647014717893087255751240722437689160759117870980932510774362593449883609533989980065031459621377389164131326527613850314929647675363883534939334822715303593094649020519779626982215729612402035854729537996287232406825511013762667028062321865722974595526517070497477684221007302849476177809748857272029212963280530296769118444397826687822444775";
const TEST_FINGERPRINT: i64 = 2794682364011971714;

const PQ: u64 = 1470626929934143021;

fn test_key() -> Key {
    Key::new(TEST_N, "65537").unwrap()
}

fn trusted() -> TrustedKeys {
    TrustedKeys::empty().with(test_key())
}

fn now() -> i32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i32
}

/// Undo RSA_PAD with the private exponent.
fn rsa_pad_decrypt(encrypted: &[u8]) -> Vec<u8> {
    let n = BigUint::parse_bytes(TEST_N.as_bytes(), 10).unwrap();
    let d = BigUint::parse_bytes(TEST_D.as_bytes(), 10).unwrap();
    let m = BigUint::from_bytes_be(encrypted).modpow(&d, &n).to_bytes_be();
    let mut block = vec![0u8; 256 - m.len()];
    block.extend(m);

    let (temp_key_xor, aes_encrypted) = block.split_at(32);
    let hash = sha256!(aes_encrypted);
    let mut temp_key = [0u8; 32];
    for i in 0..32 {
        temp_key[i] = temp_key_xor[i] ^ hash[i];
    }

    let mut data_with_hash = aes_encrypted.to_vec();
    aes::ige_decrypt(&mut data_with_hash, &temp_key, &[0; 32]);
    let mut data_with_padding = data_with_hash[..192].to_vec();
    data_with_padding.reverse();
    assert_eq!(&data_with_hash[192..], &sha256!(&temp_key, &data_with_padding));
    data_with_padding
}

#[derive(Clone, Copy, PartialEq)]
enum Verdict {
    Ok,
    Retry,
    WrongHash,
}

struct Server {
    g: u32,
    a: BigUint,
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    auth_key: Option<AuthKey>,
    verdict: Verdict,
}

impl Server {
    fn new(g: u32) -> Self {
        Self {
            g,
            a: BigUint::from_bytes_be(&[0x3c; 256]),
            nonce: [0; 16],
            server_nonce: [0x77; 16],
            new_nonce: [0; 32],
            auth_key: None,
            verdict: Verdict::Ok,
        }
    }

    fn res_pq(&mut self, req: &functions::ReqPqMulti) -> types::ResPq {
        self.nonce = req.nonce;
        types::ResPq {
            nonce: req.nonce,
            server_nonce: self.server_nonce,
            pq: PQ.to_be_bytes().to_vec(),
            server_public_key_fingerprints: vec![12345, TEST_FINGERPRINT],
        }
    }

    fn dh_params(&mut self, req: &functions::ReqDhParams) -> enums::ServerDhParams {
        assert_eq!(req.public_key_fingerprint, TEST_FINGERPRINT);
        let data = rsa_pad_decrypt(&req.encrypted_data);
        let inner = types::PQInnerDataDc::from_bytes(&data).unwrap();
        assert_eq!(inner.dc, 2);
        assert_eq!(inner.pq, PQ.to_be_bytes().to_vec());
        assert_eq!(inner.p, req.p);
        assert_eq!(inner.q, req.q);
        assert_eq!(inner.server_nonce, self.server_nonce);
        self.new_nonce = inner.new_nonce;

        let prime = dh::known_prime();
        let g_a = BigUint::from(self.g).modpow(&self.a, &prime);
        let answer = types::ServerDhInnerData {
            nonce: self.nonce,
            server_nonce: self.server_nonce,
            g: self.g as i32,
            dh_prime: prime.to_bytes_be(),
            g_a: g_a.to_bytes_be(),
            server_time: now() + 30,
        }
        .to_bytes();

        let mut encrypted_answer = sha1!(&answer).to_vec();
        encrypted_answer.extend(answer);
        encrypted_answer.resize(encrypted_answer.len().div_ceil(16) * 16, 0);
        let (key, iv) = generate_key_data_from_nonce(&self.server_nonce, &self.new_nonce);
        aes::ige_encrypt(&mut encrypted_answer, &key, &iv);

        enums::ServerDhParams::Ok(types::ServerDhParamsOk {
            nonce: self.nonce,
            server_nonce: self.server_nonce,
            encrypted_answer,
        })
    }

    fn dh_answer(&mut self, req: &functions::SetClientDhParams) -> enums::SetClientDhParamsAnswer {
        let (key, iv) = generate_key_data_from_nonce(&self.server_nonce, &self.new_nonce);
        let mut plain = req.encrypted_data.clone();
        aes::ige_decrypt(&mut plain, &key, &iv);
        let inner = types::ClientDhInnerData::from_bytes(&plain[20..]).unwrap();
        assert_eq!(&plain[..20], &sha1!(&inner.to_bytes()));

        let prime = dh::known_prime();
        let g_ab = BigUint::from_bytes_be(&inner.g_b).modpow(&self.a, &prime).to_bytes_be();
        let mut bytes = [0u8; 256];
        bytes[256 - g_ab.len()..].copy_from_slice(&g_ab);
        let auth_key = AuthKey::from_bytes(bytes);

        let answer = match self.verdict {
            Verdict::Ok => enums::SetClientDhParamsAnswer::DhGenOk(types::DhGenOk {
                nonce: self.nonce,
                server_nonce: self.server_nonce,
                new_nonce_hash1: auth_key.calc_new_nonce_hash(&self.new_nonce, 1),
            }),
            Verdict::Retry => enums::SetClientDhParamsAnswer::DhGenRetry(types::DhGenRetry {
                nonce: self.nonce,
                server_nonce: self.server_nonce,
                new_nonce_hash2: auth_key.calc_new_nonce_hash(&self.new_nonce, 2),
            }),
            Verdict::WrongHash => enums::SetClientDhParamsAnswer::DhGenOk(types::DhGenOk {
                nonce: self.nonce,
                server_nonce: self.server_nonce,
                new_nonce_hash1: [0; 16],
            }),
        };
        self.auth_key = Some(auth_key);
        answer
    }
}

/// Run every step, sending each request through its wire encoding.
fn negotiate(server: &mut Server) -> Result<authentication::Finished, NegotiationError> {
    let (req, s1) = authentication::step1()?;
    let req = functions::ReqPqMulti::from_bytes(&req.to_bytes()).unwrap();
    let res_pq = server.res_pq(&req);

    let (req, s2) = authentication::step2(s1, res_pq, 2, &trusted())?;
    let req = functions::ReqDhParams::from_bytes(&req.to_bytes()).unwrap();
    let params = server.dh_params(&req);

    let (req, s3) = authentication::step3(s2, params)?;
    let answer = server.dh_answer(&req);

    authentication::finish(s3, answer)
}

#[test]
fn test_key_fingerprint() {
    assert_eq!(test_key().fingerprint(), TEST_FINGERPRINT);
}

#[test]
fn negotiation_converges_on_one_key() {
    let mut server = Server::new(3);
    let done = negotiate(&mut server).unwrap();

    let server_key = server.auth_key.unwrap();
    assert_eq!(done.auth_key, server_key.to_bytes());

    let sha = sha1!(&done.auth_key);
    assert_eq!(&AuthKey::from_bytes(done.auth_key).key_id()[..], &sha[12..20]);

    let mut salt = [0u8; 8];
    for i in 0..8 {
        salt[i] = server.new_nonce[i] ^ server.server_nonce[i];
    }
    assert_eq!(done.first_salt, i64::from_le_bytes(salt));
    assert!((29..=31).contains(&done.time_offset));
}

#[test]
fn generator_without_residue_condition_is_insecure() {
    let err = negotiate(&mut Server::new(2)).unwrap_err();
    assert!(matches!(err, NegotiationError::InsecureParameters(_)), "{err}");
}

#[test]
fn dh_gen_retry_fails_verification() {
    let mut server = Server::new(3);
    server.verdict = Verdict::Retry;
    let err = negotiate(&mut server).unwrap_err();
    assert!(matches!(err, NegotiationError::VerificationFailed { .. }), "{err}");
}

#[test]
fn wrong_new_nonce_hash_fails_verification() {
    let mut server = Server::new(3);
    server.verdict = Verdict::WrongHash;
    let err = negotiate(&mut server).unwrap_err();
    assert_eq!(err, NegotiationError::VerificationFailed { reason: "new_nonce_hash mismatch" });
}

#[test]
fn untrusted_server_key_is_refused() {
    let mut server = Server::new(3);
    let (req, s1) = authentication::step1().unwrap();
    let res_pq = server.res_pq(&req);
    let err = authentication::step2(s1, res_pq, 2, &TrustedKeys::builtin()).err().unwrap();
    assert_eq!(err, NegotiationError::NoTrustedKey { offered: vec![12345, TEST_FINGERPRINT] });
}
