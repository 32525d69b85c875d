//! Consumer-facing handle around the gateway actor.

use std::sync::Arc;

use kameo::error::SendError;
use kameo::prelude::{Actor, ActorRef};

use crate::config::GatewayConfig;
use crate::core::{ConnectionState, GatewayError, GatewayResult, GatewayStats, SessionSnapshot};
use crate::dispatch::{DispatchMode, EventReceiver, GatewayEventHandler, dispatch_queue};
use crate::transport::GatewayTransport;
use crate::transport::tungstenite::TungsteniteTransport;
use crate::ws::{
    GatewayActor, GatewayActorArgs, GatewayCommand, GetConnectionState, GetGatewayStats,
    GetSessionSnapshot,
};

fn map_send_error<M>(context: &'static str, err: SendError<M, GatewayError>) -> GatewayError {
    match err {
        SendError::HandlerError(err) => err,
        _ => GatewayError::ActorError(format!("{context}: gateway actor unavailable")),
    }
}

/// Handle to one gateway session. Cheap to clone; all clones drive the same actor.
pub struct GatewayClient<T: GatewayTransport = TungsteniteTransport> {
    actor: ActorRef<GatewayActor<T>>,
}

impl<T: GatewayTransport> Clone for GatewayClient<T> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
        }
    }
}

impl<T: GatewayTransport> GatewayClient<T> {
    /// Spawn a client that hands events to the returned receiver through a bounded queue.
    pub fn spawn(config: GatewayConfig, transport: T) -> GatewayResult<(Self, EventReceiver)> {
        config.validate()?;
        let (queue, events) =
            dispatch_queue(config.effective_queue_capacity(), config.enqueue_timeout());
        let client = Self::spawn_with_mode(config, transport, DispatchMode::Queued(queue));
        Ok((client, events))
    }

    /// Spawn a client that runs `handler` on the session actor for every event.
    pub fn spawn_inline<H>(config: GatewayConfig, transport: T, handler: H) -> GatewayResult<Self>
    where
        H: GatewayEventHandler,
    {
        config.validate()?;
        Ok(Self::spawn_with_mode(
            config,
            transport,
            DispatchMode::Inline(Arc::new(handler)),
        ))
    }

    fn spawn_with_mode(config: GatewayConfig, transport: T, dispatch: DispatchMode) -> Self {
        let actor = GatewayActor::spawn(GatewayActorArgs {
            config,
            transport,
            dispatch,
        });
        Self { actor }
    }

    pub fn actor_ref(&self) -> &ActorRef<GatewayActor<T>> {
        &self.actor
    }

    /// Connect and run the handshake. Returns once the connect has been started.
    pub async fn open(&self) -> GatewayResult<()> {
        self.actor
            .ask(GatewayCommand::Open)
            .await
            .map_err(|e| map_send_error("open", e))
    }

    pub async fn close(&self) -> GatewayResult<()> {
        self.logout().await
    }

    pub async fn logout(&self) -> GatewayResult<()> {
        if !self.actor.is_alive() {
            return Ok(());
        }
        self.actor
            .ask(GatewayCommand::Logout)
            .await
            .map_err(|e| map_send_error("logout", e))
    }

    /// Log out and stop the actor. Later calls are no-ops.
    pub async fn destroy(&self) -> GatewayResult<()> {
        if !self.actor.is_alive() {
            return Ok(());
        }
        if let Err(err) = self.logout().await {
            tracing::debug!(error = %err, "logout during destroy failed");
        }
        let _ = self.actor.stop_gracefully().await;
        self.actor.wait_for_shutdown().await;
        Ok(())
    }

    pub async fn state(&self) -> GatewayResult<ConnectionState> {
        self.actor
            .ask(GetConnectionState)
            .await
            .map_err(|e| map_send_error("state", e))
    }

    pub async fn snapshot(&self) -> GatewayResult<SessionSnapshot> {
        self.actor
            .ask(GetSessionSnapshot)
            .await
            .map_err(|e| map_send_error("snapshot", e))
    }

    pub async fn stats(&self) -> GatewayResult<GatewayStats> {
        self.actor
            .ask(GetGatewayStats)
            .await
            .map_err(|e| map_send_error("stats", e))
    }
}
