mod common;

use std::io;
use std::time::Duration;

use rstest::rstest;
use strand_client::{CallOptions, CancellationToken, Client, ConnectionState, InvocationError, MAX_RESENDS, Storage};
use strand_mtproto::encrypted::MAX_CONTAINER_MESSAGES;
use strand_tl::{Identifiable, Serializable, functions, ids, types};
use tokio::time::Instant;

use common::constructor;

// ─── Pipelining ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn queued_requests_share_one_container() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handles: Vec<_> = (1..=3u8).map(|i| client.send(vec![i; 8])).collect();

    let received = server.recv_raw().await.unwrap();
    assert_eq!(constructor(&received.outer.body), ids::MSG_CONTAINER);
    let requests: Vec<_> = received
        .messages
        .iter()
        .filter(|m| m.requires_ack() && constructor(&m.body) != functions::GetFutureSalts::CONSTRUCTOR_ID)
        .cloned()
        .collect();
    let bodies: Vec<_> = requests.iter().map(|m| m.body.clone()).collect();
    assert_eq!(bodies, vec![vec![1; 8], vec![2; 8], vec![3; 8]]);

    for m in &requests {
        server.reply(m.msg_id, &[m.body[0] + 10; 8]).await;
    }
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.result().await.unwrap(), vec![i as u8 + 11; 8]);
    }
}

#[tokio::test]
async fn requests_beyond_a_full_container_go_out_next_with_higher_ids() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let mut handles: Vec<_> = (0..=MAX_CONTAINER_MESSAGES).map(|i| client.send(vec![i as u8; 8])).collect();

    let full = server.recv_raw().await.unwrap();
    assert_eq!(full.messages.len(), MAX_CONTAINER_MESSAGES);
    let rest = server.recv_requests().await;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].body, vec![MAX_CONTAINER_MESSAGES as u8; 8]);
    assert!(rest[0].msg_id > full.outer.msg_id);

    server.reply(rest[0].msg_id, &[0xcc; 8]).await;
    let last = handles.pop().unwrap();
    assert_eq!(last.result().await.unwrap(), vec![0xcc; 8]);
}

// ─── bad_msg_notification ─────────────────────────────────────────────────────

#[rstest]
#[case::msg_id_too_low(16)]
#[case::msg_id_too_high(17)]
#[case::seqno_too_low(32)]
#[case::seqno_too_high(33)]
#[tokio::test]
async fn retryable_bad_msg_resends_once_under_a_new_msg_id(#[case] code: i32) {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![7; 8]);
    let first = server.recv_request().await;
    server.bad_msg(first.msg_id, code).await;

    let second = server.recv_request().await;
    assert!(second.msg_id > first.msg_id);
    assert_eq!(second.body, first.body);

    server.reply(second.msg_id, &[9; 8]).await;
    assert_eq!(handle.result().await.unwrap(), vec![9; 8]);
}

#[tokio::test]
async fn resends_are_bounded() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![7; 8]);
    let mut msg = server.recv_request().await;
    for _ in 0..MAX_RESENDS {
        server.bad_msg(msg.msg_id, 16).await;
        msg = server.recv_request().await;
    }
    server.bad_msg(msg.msg_id, 16).await;

    match handle.result().await {
        Err(InvocationError::BadMessage(bad)) => assert_eq!(bad.code, 16),
        other => panic!("expected bad message, got {other:?}"),
    }
}

#[tokio::test]
async fn fatal_bad_msg_fails_the_request() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![7; 8]);
    let msg = server.recv_request().await;
    server.bad_msg(msg.msg_id, 34).await;

    match handle.result().await {
        Err(InvocationError::BadMessage(bad)) => assert_eq!(bad.code, 34),
        other => panic!("expected bad message, got {other:?}"),
    }
}

// ─── Cancellation and timeouts ────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_call_ignores_late_result() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let token = CancellationToken::new();
    let call = tokio::spawn({
        let client = client.clone();
        let token = token.clone();
        async move { client.call(vec![1; 8], CallOptions::cancel_with(token)).await }
    });
    let abandoned = server.recv_request().await;
    token.cancel();
    assert!(matches!(call.await.unwrap(), Err(InvocationError::Cancelled)));

    let handle = client.send(vec![2; 8]);
    let kept = server.recv_request().await;
    server.reply(abandoned.msg_id, &[0xaa; 8]).await;
    server.reply(kept.msg_id, &[0xbb; 8]).await;
    assert_eq!(handle.result().await.unwrap(), vec![0xbb; 8]);
}

#[tokio::test]
async fn call_times_out() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.call(vec![1; 8], CallOptions::timeout(Duration::from_millis(50))).await }
    });
    let _ = server.recv_request().await;
    assert!(matches!(call.await.unwrap(), Err(InvocationError::Timeout)));
}

// ─── FLOOD_WAIT ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn short_flood_wait_is_slept_off_and_retried() {
    let mut h = common::harness();
    h.config.ping_interval = Duration::from_secs(3600);
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![3; 8]);
    let first = server.recv_request().await;
    server.rpc_error(first.msg_id, 420, "FLOOD_WAIT_1").await;
    let started = Instant::now();

    let retried = server.recv_request().await;
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(retried.body, first.body);

    server.reply(retried.msg_id, &[4; 8]).await;
    assert_eq!(handle.result().await.unwrap(), vec![4; 8]);
}

#[tokio::test]
async fn long_flood_wait_is_returned() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![3; 8]);
    let first = server.recv_request().await;
    server.rpc_error(first.msg_id, 420, "FLOOD_WAIT_120").await;

    match handle.result().await {
        Err(e) => assert_eq!(e.flood_wait_seconds(), Some(120)),
        Ok(body) => panic!("expected FLOOD_WAIT, got {body:?}"),
    }
}

#[tokio::test]
async fn rpc_errors_are_parsed() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![3; 8]);
    let first = server.recv_request().await;
    server.rpc_error(first.msg_id, 400, "PEER_ID_INVALID").await;

    match handle.result().await {
        Err(InvocationError::Rpc(e)) => {
            assert_eq!(e.code, 400);
            assert!(e.is("*_INVALID"));
        }
        other => panic!("expected an RPC error, got {other:?}"),
    }
}

// ─── Connection loss ──────────────────────────────────────────────────────────

#[tokio::test]
async fn lost_connection_resends_under_a_new_session() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![5; 8]);
    let lost = server.recv_request().await;
    let old_session = server.session_id;
    drop(server);

    let mut server = h.accept().await;
    let resent = server.recv_request().await;
    assert_ne!(server.session_id, old_session);
    assert_eq!(resent.body, lost.body);

    server.reply(resent.msg_id, &[6; 8]).await;
    assert_eq!(handle.result().await.unwrap(), vec![6; 8]);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn unanswered_keepalive_reconnects() {
    let mut h = common::harness();
    h.config.ping_interval = Duration::from_millis(100);
    h.config.ping_timeout = Duration::from_millis(100);
    let _client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let ping = server.recv_request().await;
    assert_eq!(constructor(&ping.body), functions::PingDelayDisconnect::CONSTRUCTOR_ID);

    let _again = h.accept().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_the_configured_attempts() {
    let mut h = common::harness();
    h.config.max_reconnect_attempts = 3;
    h.config.ping_interval = Duration::from_secs(3600);
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let first = client.send(vec![1; 8]);
    let second = client.send(vec![2; 8]);
    assert_eq!(server.recv_requests().await.len(), 2);
    h.refuse_connections();
    drop(server);

    for handle in [first, second] {
        match handle.result().await {
            Err(InvocationError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
            other => panic!("expected the last connect error, got {other:?}"),
        }
    }
    assert_eq!(h.connection_attempts(), 1 + 3);
    client.closed().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn rejected_key_without_renegotiation_fails_requests() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![1; 8]);
    let _ = server.recv_request().await;
    server.status(-404).await;

    let mut fresh = h.accept().await;
    let req_pq = fresh.recv_plain().await;
    assert_eq!(constructor(&req_pq), functions::ReqPqMulti::CONSTRUCTOR_ID);
    let nonce: [u8; 16] = req_pq[4..20].try_into().unwrap();
    let res_pq = types::ResPq {
        nonce,
        server_nonce: [7; 16],
        pq: 1470626929934143021u64.to_be_bytes().to_vec(),
        server_public_key_fingerprints: vec![1],
    };
    fresh.send_plain(&res_pq.to_bytes()).await;

    assert!(matches!(handle.result().await, Err(InvocationError::ReauthenticationNeeded)));
    assert_eq!(client.storage().auth_key(common::DC).unwrap(), None);
    client.closed().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

// ─── Ping and close ───────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_round_trip() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let ping = tokio::spawn({
        let client = client.clone();
        async move { client.ping().await }
    });
    let request = server.recv_request().await;
    assert_eq!(constructor(&request.body), functions::Ping::CONSTRUCTOR_ID);
    let ping_id = i64::from_le_bytes(request.body[4..12].try_into().unwrap());
    server.send(&types::Pong { msg_id: request.msg_id, ping_id }.to_bytes()).await;

    assert!(ping.await.unwrap().is_ok());
}

#[tokio::test]
async fn close_drops_pending_requests() {
    let mut h = common::harness();
    let client = Client::connect(h.config.clone()).await.unwrap();
    let mut server = h.accept().await;

    let handle = client.send(vec![1; 8]);
    let _ = server.recv_request().await;
    client.close().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(handle.result().await, Err(InvocationError::Dropped)));
    assert!(matches!(client.send(vec![2; 8]).result().await, Err(InvocationError::Dropped)));
    server.closed().await;
}
