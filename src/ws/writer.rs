use futures_util::{Sink, SinkExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage};
use tracing::debug;

use crate::core::{GatewayError, GatewayResult, WsFrame};

/// Writer actor that owns the transport sink and serializes writes.
pub struct GatewayWriterActor<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    writer: W,
    closed: bool,
}

impl<W> GatewayWriterActor<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }
}

impl<W> Actor for GatewayWriterActor<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    type Args = Self;
    type Error = GatewayError;

    fn name() -> &'static str {
        "GatewayWriterActor"
    }

    async fn on_start(args: Self::Args, _ctx: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "GatewayWriterActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

pub struct WriteFrame {
    pub frame: WsFrame,
}

impl<W> KameoMessage<WriteFrame> for GatewayWriterActor<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    type Reply = GatewayResult<()>;

    async fn handle(
        &mut self,
        msg: WriteFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Err(GatewayError::InvalidState("writer closed".to_string()));
        }
        debug!(target: "gateway-writer", "sending frame to wire");
        self.writer.send(msg.frame).await
    }
}

/// Send a close frame (if a code is given) and close the sink. Idempotent.
pub struct CloseWriter {
    pub code: Option<u16>,
}

impl<W> KameoMessage<CloseWriter> for GatewayWriterActor<W>
where
    W: Sink<WsFrame, Error = GatewayError> + Send + Sync + Unpin + 'static,
{
    type Reply = GatewayResult<()>;

    async fn handle(
        &mut self,
        msg: CloseWriter,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(code) = msg.code {
            // The peer may already be gone; closing the sink below still matters.
            if let Err(err) = self.writer.send(WsFrame::close(code, "")).await {
                debug!(target: "gateway-writer", error = %err, "close frame not sent");
            }
        }
        self.writer.close().await
    }
}
