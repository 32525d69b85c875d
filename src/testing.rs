//! In-memory transport and payload builders for driving the gateway without a socket.
//!
//! [`MockTransport::channel_pair`] returns the transport handed to the client plus a
//! [`MockServer`] that accepts every connection the client opens. Each accepted
//! [`MockConnection`] can push text (whole or fragmented), push close frames, fail the
//! stream, or drop the socket, and observes every frame the client writes.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::sync::mpsc;

use crate::codec::{EnvelopeDecoder, OpCode};
use crate::core::{FrameKind, GatewayError, GatewayResult, WsFragment, WsFrame};
use crate::transport::{GatewayTransport, TransportConnectFuture};

/// Transport backed by in-memory channels.
#[derive(Clone)]
pub struct MockTransport {
    accept_tx: mpsc::UnboundedSender<MockConnection>,
    refuse: Arc<AtomicUsize>,
    attempts: Arc<AtomicU64>,
}

impl MockTransport {
    pub fn channel_pair() -> (Self, MockServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::new(AtomicU64::new(0));
        (
            Self {
                accept_tx,
                refuse: Arc::clone(&refuse),
                attempts: Arc::clone(&attempts),
            },
            MockServer {
                accept_rx,
                refuse,
                attempts,
            },
        )
    }
}

impl GatewayTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        receive_buffer: usize,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let accept_tx = self.accept_tx.clone();
        let refuse = Arc::clone(&self.refuse);
        let attempts = Arc::clone(&self.attempts);
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            let refused = refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(GatewayError::ConnectionFailed(format!(
                    "mock server refused {url}"
                )));
            }

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            accept_tx
                .send(MockConnection {
                    url,
                    receive_buffer,
                    outbound_rx,
                    inbound_tx: Some(inbound_tx),
                })
                .map_err(|_| GatewayError::ConnectionFailed("mock server gone".to_string()))?;

            Ok((
                MockReader { rx: inbound_rx },
                MockWriter {
                    tx: Some(outbound_tx),
                },
            ))
        })
    }
}

/// Server side of [`MockTransport`].
pub struct MockServer {
    accept_rx: mpsc::UnboundedReceiver<MockConnection>,
    refuse: Arc<AtomicUsize>,
    attempts: Arc<AtomicU64>,
}

impl MockServer {
    pub async fn accept(&mut self) -> Option<MockConnection> {
        self.accept_rx.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.accept_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Connect attempts seen so far, refused ones included.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `count` connect attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }
}

/// Error surface for pushes on a [`MockConnection`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    SocketDropped,
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client reader is gone"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// One accepted client connection.
pub struct MockConnection {
    url: String,
    receive_buffer: usize,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<GatewayResult<WsFragment>>>,
}

impl MockConnection {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn receive_buffer(&self) -> usize {
        self.receive_buffer
    }

    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Wait for the next outbound frame carrying `op`, skipping anything else.
    pub async fn expect_op(&mut self, op: OpCode, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, async {
            while let Some(frame) = self.outbound_rx.recv().await {
                if frame_op(&frame) == Some(op) {
                    return Some(frame);
                }
            }
            None
        })
        .await
        .unwrap_or_default()
    }

    fn push(&self, item: GatewayResult<WsFragment>) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(item).map_err(|_| MockServerError::ChannelClosed)
    }

    pub fn send_fragment(&self, fragment: WsFragment) -> Result<(), MockServerError> {
        self.push(Ok(fragment))
    }

    pub fn send_text(&self, text: impl AsRef<str>) -> Result<(), MockServerError> {
        self.send_fragment(WsFragment::text(Bytes::copy_from_slice(
            text.as_ref().as_bytes(),
        )))
    }

    /// Deliver `text` split into fragments of `chunk` bytes.
    pub fn send_fragmented(&self, text: impl AsRef<str>, chunk: usize) -> Result<(), MockServerError> {
        let payload = Bytes::copy_from_slice(text.as_ref().as_bytes());
        for fragment in WsFragment::split(FrameKind::Text, payload, chunk) {
            self.send_fragment(fragment)?;
        }
        Ok(())
    }

    /// Push a close frame, then end the stream like a server closing the socket.
    pub fn send_close(&mut self, code: u16, reason: &str) -> Result<(), MockServerError> {
        self.send_fragment(WsFragment::close(code, reason))?;
        self.drop_socket();
        Ok(())
    }

    /// Fail the stream with a transport error.
    pub fn fail(&mut self, error: &str) -> Result<(), MockServerError> {
        self.push(Err(GatewayError::transport("mock", error)))?;
        self.drop_socket();
        Ok(())
    }

    /// End the stream without a close frame.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

pub struct MockReader {
    rx: mpsc::UnboundedReceiver<GatewayResult<WsFragment>>,
}

impl Stream for MockReader {
    type Item = GatewayResult<WsFragment>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub struct MockWriter {
    tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = GatewayError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        let tx = self
            .get_mut()
            .tx
            .as_ref()
            .ok_or_else(|| GatewayError::transport("mock write", "writer closed"))?;
        tx.send(item)
            .map_err(|_| GatewayError::transport("mock write", "server side gone"))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().tx = None;
        Poll::Ready(Ok(()))
    }
}

/// Opcode of an outbound text frame.
pub fn frame_op(frame: &WsFrame) -> Option<OpCode> {
    let bytes = frame.text_bytes()?;
    EnvelopeDecoder::new().decode(bytes).ok().map(|e| e.op)
}

/// Server payload builders.
pub mod payloads {
    pub fn hello(heartbeat_interval_ms: u64) -> String {
        format!(r#"{{"op":10,"d":{{"heartbeat_interval":{heartbeat_interval_ms}}},"s":null,"t":null}}"#)
    }

    pub fn heartbeat_ack() -> String {
        r#"{"op":11,"d":null}"#.to_string()
    }

    pub fn heartbeat_request() -> String {
        r#"{"op":1,"d":null}"#.to_string()
    }

    pub fn reconnect() -> String {
        r#"{"op":7,"d":null}"#.to_string()
    }

    pub fn invalid_session(resumable: bool) -> String {
        format!(r#"{{"op":9,"d":{resumable}}}"#)
    }

    pub fn ready(sequence: u64, session_id: &str, user_id: &str) -> String {
        format!(
            r#"{{"op":0,"s":{sequence},"t":"READY","d":{{"v":8,"session_id":"{session_id}","user":{{"id":"{user_id}","username":"bot","discriminator":"0001","bot":true}}}}}}"#
        )
    }

    pub fn message_create(sequence: u64, id: &str, author_id: &str, content: &str) -> String {
        format!(
            r#"{{"op":0,"s":{sequence},"t":"MESSAGE_CREATE","d":{{"id":"{id}","channel_id":"c1","content":"{content}","author":{{"id":"{author_id}","username":"u-{author_id}"}}}}}}"#
        )
    }

    pub fn message_delete(sequence: u64, id: &str) -> String {
        format!(
            r#"{{"op":0,"s":{sequence},"t":"MESSAGE_DELETE","d":{{"id":"{id}","channel_id":"c1"}}}}"#
        )
    }

    pub fn dispatch(sequence: u64, name: &str, data: &str) -> String {
        format!(r#"{{"op":0,"s":{sequence},"t":"{name}","d":{data}}}"#)
    }
}
