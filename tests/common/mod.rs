#![allow(dead_code)]

use std::time::{Duration, Instant};

use ws_gateway::codec::OpCode;
use ws_gateway::core::WsFrame;
use ws_gateway::testing::{MockConnection, MockTransport, payloads};
use ws_gateway::{ConnectionState, GatewayClient, GatewayConfig};

pub const STEP: Duration = Duration::from_secs(2);

pub type MockClient = GatewayClient<MockTransport>;

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::new("test-token");
    config.url = "ws://mock.gateway/?v=8&encoding=json".to_string();
    config.tick_interval_ms = 10;
    config.send_timeout_ms = 500;
    config.close_timeout_ms = 500;
    config.enqueue_timeout_ms = 200;
    config
}

pub fn frame_text(frame: &WsFrame) -> &str {
    let bytes = frame.text_bytes().expect("text frame");
    std::str::from_utf8(bytes).expect("utf-8 frame")
}

pub async fn wait_for_state(client: &MockClient, expected: ConnectionState, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let state = client.state().await.expect("get connection state");
        if state == expected {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {expected:?}, last state {state:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Send hello and return the identify the client answers with.
pub async fn hello_and_identify(conn: &mut MockConnection, heartbeat_interval_ms: u64) -> String {
    conn.send_text(payloads::hello(heartbeat_interval_ms))
        .expect("send hello");
    let identify = conn
        .expect_op(OpCode::Identify, STEP)
        .await
        .expect("identify after hello");
    frame_text(&identify).to_string()
}
