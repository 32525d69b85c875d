mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{STEP, frame_text, hello_and_identify, test_config, wait_for_state};
use ws_gateway::codec::OpCode;
use ws_gateway::core::{CloseReason, FrameKind, WsFragment, WsFrame};
use ws_gateway::testing::{MockTransport, frame_op, payloads};
use ws_gateway::{ConnectionState, GatewayClient, GatewayEvent};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missed_ack_reconnects_and_identifies_again() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (client, mut events) = GatewayClient::spawn(test_config(), transport).expect("spawn");

    client.open().await.expect("open");
    let mut first = server.accept_timeout(STEP).await.expect("first connection");
    hello_and_identify(&mut first, 50).await;
    first.send_text(payloads::ready(1, "S1", "U1")).expect("ready");
    assert!(matches!(
        events.recv_timeout(STEP).await.expect("event"),
        Some(GatewayEvent::Connected(_))
    ));

    first
        .expect_op(OpCode::Heartbeat, STEP)
        .await
        .expect("heartbeat");
    // No ack: the next beat interval must tear the connection down.
    let mut second = server
        .accept_timeout(STEP)
        .await
        .expect("reconnect after missed ack");

    let mut closed_with = None;
    while let Some(frame) = first.recv_outbound_timeout(Duration::from_millis(200)).await {
        if let WsFrame::Close(Some(close)) = frame {
            closed_with = Some(close.code);
        }
    }
    assert_eq!(closed_with, Some(1000));

    // The fresh connection starts with a clean sequence and no heartbeat.
    let snapshot = client.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.close_reason, CloseReason::NotRequested);
    assert_eq!(snapshot.sequence, None);
    assert!(!snapshot.heartbeat.is_running());

    let identify = hello_and_identify(&mut second, 10_000).await;
    assert!(identify.contains(r#""token":"test-token""#));
    wait_for_state(&client, ConnectionState::Connected, STEP).await;

    let stats = client.stats().await.expect("stats");
    assert_eq!(stats.reconnects, 1);
    assert!(stats.errors >= 1);
    assert_eq!(client.snapshot().await.expect("snapshot").connections, 2);

    client.destroy().await.expect("destroy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_reconnect_request_starts_a_new_connection() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (client, _events) = GatewayClient::spawn(test_config(), transport).expect("spawn");

    client.open().await.expect("open");
    let mut first = server.accept_timeout(STEP).await.expect("first connection");
    hello_and_identify(&mut first, 10_000).await;
    first.send_text(payloads::reconnect()).expect("reconnect request");

    let mut second = server.accept_timeout(STEP).await.expect("second connection");
    hello_and_identify(&mut second, 10_000).await;
    wait_for_state(&client, ConnectionState::Connected, STEP).await;
    assert_eq!(
        client.snapshot().await.expect("snapshot").close_reason,
        CloseReason::NotRequested
    );

    client.destroy().await.expect("destroy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_session_reidentifies() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (client, mut events) = GatewayClient::spawn(test_config(), transport).expect("spawn");

    client.open().await.expect("open");
    let mut first = server.accept_timeout(STEP).await.expect("first connection");
    hello_and_identify(&mut first, 10_000).await;
    first.send_text(payloads::ready(1, "S1", "U1")).expect("ready");
    let _connected = events.recv_timeout(STEP).await.expect("connected");
    first
        .send_text(payloads::invalid_session(false))
        .expect("invalid session");

    let mut second = server.accept_timeout(STEP).await.expect("second connection");
    hello_and_identify(&mut second, 10_000).await;
    second.send_text(payloads::ready(1, "S2", "U1")).expect("ready");
    match events.recv_timeout(STEP).await.expect("event") {
        Some(GatewayEvent::Connected(session)) => assert_eq!(session.session_id, "S2"),
        other => panic!("expected new session, got {other:?}"),
    }

    client.destroy().await.expect("destroy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unexpected_disconnect_logs_out() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (client, _events) = GatewayClient::spawn(test_config(), transport).expect("spawn");

    client.open().await.expect("open");
    let mut conn = server.accept_timeout(STEP).await.expect("connection");
    hello_and_identify(&mut conn, 10_000).await;
    conn.drop_socket();

    wait_for_state(&client, ConnectionState::Unknown, STEP).await;
    assert!(server.accept_timeout(Duration::from_millis(100)).await.is_none());
    let stats = client.stats().await.expect("stats");
    assert!(stats.errors >= 1);
    assert_eq!(stats.reconnects, 0);

    client.destroy().await.expect("destroy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_error_ends_the_session() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (client, _events) = GatewayClient::spawn(test_config(), transport).expect("spawn");

    client.open().await.expect("open");
    let mut conn = server.accept_timeout(STEP).await.expect("connection");
    hello_and_identify(&mut conn, 10_000).await;
    conn.fail("connection reset").expect("fail");

    wait_for_state(&client, ConnectionState::Unknown, STEP).await;
    assert!(server.accept_timeout(Duration::from_millis(100)).await.is_none());

    client.destroy().await.expect("destroy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_failure_returns_to_unknown_and_can_reopen() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (client, _events) = GatewayClient::spawn(test_config(), transport).expect("spawn");

    server.refuse_next(1);
    client.open().await.expect("open");
    wait_for_state(&client, ConnectionState::Unknown, STEP).await;
    assert_eq!(server.connect_attempts(), 1);

    client.open().await.expect("reopen");
    let mut conn = server.accept_timeout(STEP).await.expect("connection");
    hello_and_identify(&mut conn, 10_000).await;
    wait_for_state(&client, ConnectionState::Connected, STEP).await;
    assert_eq!(server.connect_attempts(), 2);

    client.destroy().await.expect("destroy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_discards_partial_message_and_sequence() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (client, _events) = GatewayClient::spawn(test_config(), transport).expect("spawn");

    client.open().await.expect("open");
    let mut first = server.accept_timeout(STEP).await.expect("first connection");
    hello_and_identify(&mut first, 50).await;
    first.send_text(payloads::ready(7, "S1", "U1")).expect("ready");

    let pending = Bytes::from(payloads::message_create(8, "m1", "U2", "never finished"));
    first
        .send_fragment(WsFragment {
            kind: FrameKind::Text,
            payload: pending.slice(..10),
            offset: 0,
            total_len: pending.len(),
        })
        .expect("partial fragment");

    let deadline = std::time::Instant::now() + STEP;
    loop {
        let snapshot = client.snapshot().await.expect("snapshot");
        if snapshot.buffered_len == 10 && snapshot.sequence == Some(7) {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "partial message not buffered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Heartbeat goes unanswered, so the next interval reconnects.
    first
        .expect_op(OpCode::Heartbeat, STEP)
        .await
        .expect("heartbeat");
    let mut second = server.accept_timeout(STEP).await.expect("second connection");

    let snapshot = client.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.buffered_len, 0);
    assert_eq!(snapshot.sequence, None);
    assert!(!snapshot.heartbeat.is_running());

    second.send_text(payloads::hello(10_000)).expect("hello");
    let frame = second
        .recv_outbound_timeout(STEP)
        .await
        .expect("first frame on new connection");
    assert_eq!(frame_op(&frame), Some(OpCode::Identify));
    let identify = frame_text(&frame);
    assert!(!identify.contains("session_id"));
    assert!(!identify.contains(r#""seq""#));

    client.destroy().await.expect("destroy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_before_hello_on_new_connection_is_dropped() {
    let (transport, mut server) = MockTransport::channel_pair();
    let (client, mut events) = GatewayClient::spawn(test_config(), transport).expect("spawn");

    client.open().await.expect("open");
    let mut first = server.accept_timeout(STEP).await.expect("first connection");
    hello_and_identify(&mut first, 10_000).await;
    first.send_text(payloads::ready(1, "S1", "U1")).expect("ready");
    assert!(matches!(
        events.recv_timeout(STEP).await.expect("event"),
        Some(GatewayEvent::Connected(_))
    ));
    first.send_text(payloads::reconnect()).expect("reconnect request");

    let mut second = server.accept_timeout(STEP).await.expect("second connection");
    second
        .send_text(payloads::message_create(1, "early", "U2", "too soon"))
        .expect("early message");
    hello_and_identify(&mut second, 10_000).await;
    second
        .send_text(payloads::message_create(2, "late", "U2", "in time"))
        .expect("late message");

    match events.recv_timeout(STEP).await.expect("event") {
        Some(GatewayEvent::MessageReceived(message)) => assert_eq!(message.id, "late"),
        other => panic!("expected late message, got {other:?}"),
    }
    assert!(client.stats().await.expect("stats").dropped_events >= 1);

    client.destroy().await.expect("destroy");
}
