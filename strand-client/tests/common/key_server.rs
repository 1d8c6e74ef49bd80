//! The server half of auth key negotiation, holding a private test key.

use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;
use strand_crypto::rsa::{Key, TrustedKeys};
use strand_crypto::{AuthKey, aes, dh, generate_key_data_from_nonce, sha1, sha256};
use strand_tl::{Deserializable, Serializable, enums, functions, types};

use super::ServerConn;

const TEST_N: &str = "23102039057924439442447123106608558475198675679113884951812013274344671174758065466485187260519700642496989641222333385086089063785360321628668276673160974278248647696872276551345288390618669289346279737617339553109347039203358067246176168785998224926409900776019883212040832174074708622496391903552886950658573870582708380310503264135017678002508102070486187440784385313626266529333130777241114210888063494651089836757476732545563672248464512845826448686845075053265943776704524180973053160555159251052923629578840629773604998585493151024077792043800324985552070846995440047961349217074971695343473292268900898812781";
const TEST_D: &str = "1638378735697236784135991684275022430580856281346030765448478503699309410588619588079691413842849311120215934318952680953496410988658679548089049523130547349073856595822912187485354474951001801709974780258822619582730266572735112535143290098049276232059225839197365567374619647014717893087255751240722437689160759117870980932510774362593449883609533989980065031459621377389164131326527613850314929647675363883534939334822715303593094649020519779626982215729612402035854729537996287232406825511013762667028062321865722974595526517070497477684221007302849476177809748857272029212963280530296769118444397826687822444775";
const TEST_FINGERPRINT: i64 = 2794682364011971714;
const PQ: u64 = 1470626929934143021;

/// Trust only the key this server holds.
pub fn trusted() -> TrustedKeys {
    TrustedKeys::empty().with(Key::new(TEST_N, "65537").unwrap())
}

/// How the last step is answered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    Ok,
    /// `dh_gen_retry`, which the client treats as failed verification.
    Retry,
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
    let mut data = data_with_hash[..192].to_vec();
    data.reverse();
    data
}

/// Answer one full negotiation on `conn`. Returns the key both sides derived.
pub async fn serve(conn: &mut ServerConn, verdict: Verdict) -> AuthKey {
    let server_nonce = [0x77; 16];
    let a = BigUint::from_bytes_be(&[0x3c; 256]);
    let prime = dh::known_prime();

    let req = functions::ReqPqMulti::from_bytes(&conn.recv_plain().await).unwrap();
    let nonce = req.nonce;
    let res_pq = types::ResPq {
        nonce,
        server_nonce,
        pq: PQ.to_be_bytes().to_vec(),
        server_public_key_fingerprints: vec![TEST_FINGERPRINT],
    };
    conn.send_plain(&res_pq.to_bytes()).await;

    let req = functions::ReqDhParams::from_bytes(&conn.recv_plain().await).unwrap();
    let inner = types::PQInnerDataDc::from_bytes(&rsa_pad_decrypt(&req.encrypted_data)).unwrap();
    let new_nonce = inner.new_nonce;
    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);

    let answer = types::ServerDhInnerData {
        nonce,
        server_nonce,
        g: 3,
        dh_prime: prime.to_bytes_be(),
        g_a: BigUint::from(3u32).modpow(&a, &prime).to_bytes_be(),
        server_time: now(),
    }
    .to_bytes();
    let mut encrypted_answer = sha1!(&answer).to_vec();
    encrypted_answer.extend(answer);
    encrypted_answer.resize(encrypted_answer.len().div_ceil(16) * 16, 0);
    aes::ige_encrypt(&mut encrypted_answer, &key, &iv);
    let params = enums::ServerDhParams::Ok(types::ServerDhParamsOk { nonce, server_nonce, encrypted_answer });
    conn.send_plain(&params.to_bytes()).await;

    let req = functions::SetClientDhParams::from_bytes(&conn.recv_plain().await).unwrap();
    let mut plain = req.encrypted_data.clone();
    aes::ige_decrypt(&mut plain, &key, &iv);
    let client = types::ClientDhInnerData::from_bytes(&plain[20..]).unwrap();
    let g_ab = BigUint::from_bytes_be(&client.g_b).modpow(&a, &prime).to_bytes_be();
    let mut bytes = [0u8; 256];
    bytes[256 - g_ab.len()..].copy_from_slice(&g_ab);
    let auth_key = AuthKey::from_bytes(bytes);

    let answer = match verdict {
        Verdict::Ok => enums::SetClientDhParamsAnswer::DhGenOk(types::DhGenOk {
            nonce,
            server_nonce,
            new_nonce_hash1: auth_key.calc_new_nonce_hash(&new_nonce, 1),
        }),
        Verdict::Retry => enums::SetClientDhParamsAnswer::DhGenRetry(types::DhGenRetry {
            nonce,
            server_nonce,
            new_nonce_hash2: auth_key.calc_new_nonce_hash(&new_nonce, 2),
        }),
    };
    conn.send_plain(&answer.to_bytes()).await;
    auth_key
}
