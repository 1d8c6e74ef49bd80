mod common;

use std::sync::Arc;
use std::time::Duration;

use strand_client::{Client, InMemoryStorage, InvocationError, MAX_HANDSHAKE_ATTEMPTS, Storage};
use strand_mtproto::NegotiationError;
use strand_tl::{Identifiable, Serializable, functions, types};

use common::constructor;
use common::key_server::{self, Verdict};

fn without_key() -> common::Harness {
    let mut h = common::harness();
    h.config.storage = Arc::new(InMemoryStorage::new());
    h.config.handshake_timeout = Duration::from_millis(200);
    h
}

#[tokio::test]
async fn wrong_nonce_fails_without_retrying() {
    let mut h = without_key();
    let connect = tokio::spawn(Client::connect(h.config.clone()));

    let mut server = h.accept().await;
    let req_pq = server.recv_plain().await;
    assert_eq!(constructor(&req_pq), functions::ReqPqMulti::CONSTRUCTOR_ID);
    let res_pq = types::ResPq {
        nonce: [0xff; 16],
        server_nonce: [7; 16],
        pq: 1470626929934143021u64.to_be_bytes().to_vec(),
        server_public_key_fingerprints: vec![1],
    };
    server.send_plain(&res_pq.to_bytes()).await;

    match connect.await.unwrap() {
        Err(InvocationError::Negotiation(NegotiationError::InvalidNonce { got, .. })) => assert_eq!(got, [0xff; 16]),
        Err(e) => panic!("expected a nonce mismatch, got {e}"),
        Ok(_) => panic!("negotiation should fail"),
    }
    assert!(!h.has_pending_connection());
}

#[tokio::test]
async fn silent_server_times_out() {
    let mut h = without_key();
    let connect = tokio::spawn(Client::connect(h.config.clone()));

    let mut server = h.accept().await;
    let _ = server.recv_plain().await;

    assert!(matches!(connect.await.unwrap(), Err(InvocationError::Timeout)));
}

#[tokio::test]
async fn stored_key_skips_negotiation() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    // The first frame is already encrypted under the stored key.
    let handle = client.send(vec![1; 8]);
    let request = server.recv_request().await;
    server.reply(request.msg_id, &[2; 8]).await;
    assert_eq!(handle.result().await.unwrap(), vec![2; 8]);
}

fn negotiating() -> common::Harness {
    let mut h = without_key();
    h.config.trusted_keys = key_server::trusted();
    h.config.handshake_timeout = Duration::from_secs(30);
    h
}

#[tokio::test]
async fn failed_verification_starts_over_on_a_new_connection() {
    let mut h = negotiating();
    let connect = tokio::spawn(Client::connect(h.config.clone()));

    let mut key = None;
    for verdict in [Verdict::Retry, Verdict::Retry, Verdict::Ok] {
        let mut server = h.accept().await;
        key = Some(key_server::serve(&mut server, verdict).await);
    }

    let client = connect.await.unwrap().unwrap();
    let key = key.unwrap();
    assert_eq!(client.storage().auth_key(common::DC).unwrap(), Some(key.to_bytes()));
    assert_eq!(h.connection_attempts(), 3);
    assert!(!h.has_pending_connection());
}

#[tokio::test]
async fn verification_failures_stop_at_the_attempt_limit() {
    let mut h = negotiating();
    let connect = tokio::spawn(Client::connect(h.config.clone()));

    for _ in 0..MAX_HANDSHAKE_ATTEMPTS {
        let mut server = h.accept().await;
        key_server::serve(&mut server, Verdict::Retry).await;
    }

    match connect.await.unwrap() {
        Err(InvocationError::Negotiation(NegotiationError::VerificationFailed { .. })) => {}
        Err(e) => panic!("expected failed verification, got {e}"),
        Ok(_) => panic!("negotiation should give up"),
    }
    assert_eq!(h.connection_attempts(), MAX_HANDSHAKE_ATTEMPTS as usize);
    assert!(!h.has_pending_connection());
    assert_eq!(h.config.storage.auth_key(common::DC).unwrap(), None);
}
