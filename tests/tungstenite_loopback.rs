use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use ws_gateway::testing::payloads;
use ws_gateway::transport::tungstenite::TungsteniteTransport;
use ws_gateway::{ConnectionState, GatewayClient, GatewayConfig, GatewayEvent};

const STEP: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_over_local_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("websocket handshake");
        ws.send(Message::text(payloads::hello(10_000)))
            .await
            .expect("send hello");

        let identify = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("expected identify, got {other:?}"),
            }
        };

        ws.send(Message::text(payloads::ready(1, "S1", "U1")))
            .await
            .expect("send ready");
        ws.send(Message::text(payloads::message_create(
            2, "m1", "U2", "over tcp",
        )))
        .await
        .expect("send message");

        let mut close_code = None;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                close_code = frame.map(|f| u16::from(f.code));
                break;
            }
        }
        (identify, close_code)
    });

    let mut config = GatewayConfig::new("loopback-token");
    config.url = format!("ws://{addr}");
    config.tick_interval_ms = 10;
    let (client, mut events) =
        GatewayClient::spawn(config, TungsteniteTransport::default()).expect("spawn");
    client.open().await.expect("open");

    match events.recv_timeout(STEP).await.expect("event") {
        Some(GatewayEvent::Connected(session)) => assert_eq!(session.user.id, "U1"),
        other => panic!("expected connected, got {other:?}"),
    }
    match events.recv_timeout(STEP).await.expect("event") {
        Some(GatewayEvent::MessageReceived(message)) => {
            assert_eq!(message.content.as_deref(), Some("over tcp"))
        }
        other => panic!("expected message, got {other:?}"),
    }
    assert_eq!(client.state().await.expect("state"), ConnectionState::Connected);

    client.logout().await.expect("logout");
    let (identify, close_code) = tokio::time::timeout(STEP, server)
        .await
        .expect("server finished")
        .expect("server task");
    assert!(identify.contains(r#""token":"loopback-token""#));
    assert_eq!(close_code, Some(1000));

    client.destroy().await.expect("destroy");
}
