use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{GatewayError, GatewayResult, WsFragment, WsFrame};

pub mod tungstenite;

pub type TransportConnectFuture<R, W> = Pin<Box<dyn Future<Output = GatewayResult<(R, W)>> + Send>>;

/// Transport boundary for gateway IO.
///
/// The reader yields fragments of text and close messages in arrival order; ping/pong and
/// binary traffic never reach the engine. The writer accepts whole outbound frames. Ending
/// the reader stream means the transport disconnected.
pub trait GatewayTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = GatewayResult<WsFragment>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static;

    /// Open a connection. `receive_buffer` is the engine's reassembly capacity; transports
    /// must not reject messages below it.
    fn connect(
        &self,
        url: String,
        receive_buffer: usize,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer>;
}
