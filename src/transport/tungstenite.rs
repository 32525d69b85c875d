use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream,
    connect_async_tls_with_config as tungstenite_connect_tls,
    tungstenite::{
        Error as TungsteniteError, Message as TungsteniteMessage, Utf8Bytes,
        protocol::{CloseFrame as TungCloseFrame, WebSocketConfig},
    },
};
use tracing::debug;

use crate::core::{FrameKind, GatewayError, GatewayResult, WsCloseFrame, WsFragment, WsFrame};
use crate::tls::install_rustls_crypto_provider;
use crate::transport::{GatewayTransport, TransportConnectFuture};

/// Lower bound for the socket-level message limit. The reassembler enforces the real
/// budget so an oversized message is dropped without killing the connection.
const MIN_SOCKET_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

fn map_ws_error(context: &'static str, err: impl ToString) -> GatewayError {
    GatewayError::transport(context, err)
}

fn msg_to_fragment(msg: TungsteniteMessage) -> Option<WsFragment> {
    match msg {
        TungsteniteMessage::Text(text) => Some(WsFragment::text(
            AsRef::<Bytes>::as_ref(&text).clone(),
        )),
        TungsteniteMessage::Close(Some(frame)) => Some(WsFragment::close(
            u16::from(frame.code),
            frame.reason.as_str(),
        )),
        TungsteniteMessage::Close(None) => Some(WsFragment::whole(FrameKind::Close, Bytes::new())),
        TungsteniteMessage::Binary(bytes) => {
            debug!(len = bytes.len(), "ignoring binary websocket message");
            None
        }
        TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) | TungsteniteMessage::Frame(_) => {
            None
        }
    }
}

fn core_to_close(frame: WsCloseFrame) -> TungCloseFrame {
    TungCloseFrame {
        code: frame.code.into(),
        reason: Utf8Bytes::from(frame.reason),
    }
}

fn frame_to_msg(frame: WsFrame) -> GatewayResult<TungsteniteMessage> {
    match frame {
        WsFrame::Text(bytes) => Utf8Bytes::try_from(bytes)
            .map(TungsteniteMessage::Text)
            .map_err(|e| map_ws_error("encode", e)),
        WsFrame::Close(frame) => Ok(TungsteniteMessage::Close(frame.map(core_to_close))),
    }
}

/// tokio-tungstenite backed transport. Uses the crate's rustls/webpki defaults unless a
/// connector is supplied.
#[derive(Clone, Default)]
pub struct TungsteniteTransport {
    connector: Option<Connector>,
}

impl TungsteniteTransport {
    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector: Some(connector),
        }
    }

    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self::with_connector(Connector::Rustls(config))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TungsteniteReader {
    inner: futures_util::stream::SplitStream<WsStream>,
}

impl Stream for TungsteniteReader {
    type Item = GatewayResult<WsFragment>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(msg)) => {
                    if let Some(fragment) = msg_to_fragment(msg) {
                        return Poll::Ready(Some(Ok(fragment)));
                    }
                }
                Some(Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed))
                | None => return Poll::Ready(None),
                Some(Err(err)) => return Poll::Ready(Some(Err(map_ws_error("read", err)))),
            }
        }
    }
}

pub struct TungsteniteWriter {
    inner: futures_util::stream::SplitSink<WsStream, TungsteniteMessage>,
}

impl Sink<WsFrame> for TungsteniteWriter {
    type Error = GatewayError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        let message = frame_to_msg(item)?;
        Pin::new(&mut self.inner)
            .start_send(message)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| map_ws_error("close", e))
    }
}

impl GatewayTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(
        &self,
        url: String,
        receive_buffer: usize,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let connector = self.connector.clone();
        Box::pin(async move {
            install_rustls_crypto_provider();

            let limit = receive_buffer.max(MIN_SOCKET_MESSAGE_BYTES);
            let mut config = WebSocketConfig::default();
            config.max_message_size = Some(limit);
            config.max_frame_size = Some(limit);

            let (stream, response) = tungstenite_connect_tls(url, Some(config), false, connector)
                .await
                .map_err(|e| map_ws_error("connect", e))?;
            debug!(status = %response.status(), "websocket handshake complete");

            let (write, read) = stream.split();
            Ok((
                TungsteniteReader { inner: read },
                TungsteniteWriter { inner: write },
            ))
        })
    }
}
