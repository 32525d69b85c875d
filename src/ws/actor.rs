//! Gateway session actor.
//!
//! Transport IO runs outside kameo: a reader task forwards fragments and lifecycle notices
//! into the mailbox, a ticker task sends `Tick`, and a writer actor owns the sink. Every
//! mutation of session state happens inside one handler at a time, so the mailbox is the only
//! lock the engine needs.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use kameo::error::{ActorStopReason, SendError};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::writer::{CloseWriter, GatewayWriterActor, WriteFrame};
use crate::codec::{
    DispatchEvent, Envelope, EnvelopeData, EnvelopeDecoder, OpCode, Session, encode_heartbeat,
    encode_identify,
};
use crate::config::GatewayConfig;
use crate::core::{
    CloseCode, CloseReason, CompletedMessage, ConnectionState, FrameReassembler, GatewayError,
    GatewayHealth, GatewayResult, GatewayStats, HeartbeatDecision, Heartbeater, Reassembly,
    SequenceTracker, SessionSnapshot, WsFragment, WsFrame,
};
use crate::dispatch::{DispatchMode, DropReason, GatewayEvent, filter_dispatch};
use crate::transport::GatewayTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Status code used for every close the engine initiates.
const NORMAL_CLOSURE: u16 = 1000;

/// Arguments passed when spawning a [`GatewayActor`].
pub struct GatewayActorArgs<T: GatewayTransport = TungsteniteTransport> {
    pub config: GatewayConfig,
    pub transport: T,
    pub dispatch: DispatchMode,
}

pub struct GatewayActor<T: GatewayTransport = TungsteniteTransport> {
    config: GatewayConfig,
    transport: T,
    dispatch: DispatchMode,
    actor_ref: WeakActorRef<Self>,
    decoder: EnvelopeDecoder,
    health: GatewayHealth,
    epoch: Instant,

    state: ConnectionState,
    running: bool,
    close_reason: CloseReason,
    close_code: CloseCode,
    close_description: Option<String>,
    heartbeater: Heartbeater,
    heartbeat_sent_at: Option<Instant>,
    sequence: SequenceTracker,
    session: Option<Arc<Session>>,
    reassembler: FrameReassembler,

    /// Generation of the current transport connection; notices from older ones are ignored.
    connection: u64,
    connections_established: u64,
    writer_ref: Option<ActorRef<GatewayWriterActor<T::Writer>>>,
    reader_task: Option<JoinHandle<()>>,
    tick_task: Option<JoinHandle<()>>,
}

/// Consumer commands plus the periodic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCommand {
    Open,
    Logout,
    Tick,
}

pub(crate) struct ConnectionEstablished<T: GatewayTransport> {
    pub(crate) connection: u64,
    pub(crate) reader: T::Reader,
    pub(crate) writer: T::Writer,
}

pub(crate) struct ConnectionFailed {
    pub(crate) connection: u64,
    pub(crate) error: GatewayError,
}

#[derive(Debug)]
pub enum TransportEvent {
    Fragment(WsFragment),
    Error(GatewayError),
    Disconnected,
}

#[derive(Debug)]
pub struct TransportNotice {
    pub connection: u64,
    pub event: TransportEvent,
}

pub struct GetSessionSnapshot;
pub struct GetGatewayStats;
pub struct GetConnectionState;

impl<T: GatewayTransport> Actor for GatewayActor<T> {
    type Args = GatewayActorArgs<T>;
    type Error = GatewayError;

    fn name() -> &'static str {
        "GatewayActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> GatewayResult<Self> {
        let GatewayActorArgs {
            config,
            transport,
            dispatch,
        } = args;
        config.validate()?;
        let reassembler = FrameReassembler::new(config.effective_buffer_size());

        Ok(Self {
            config,
            transport,
            dispatch,
            actor_ref: ctx.downgrade(),
            decoder: EnvelopeDecoder::new(),
            health: GatewayHealth::new(),
            epoch: Instant::now(),
            state: ConnectionState::Unknown,
            running: false,
            close_reason: CloseReason::NotRequested,
            close_code: CloseCode::NoCode,
            close_description: None,
            heartbeater: Heartbeater::new(),
            heartbeat_sent_at: None,
            sequence: SequenceTracker::default(),
            session: None,
            reassembler,
            connection: 0,
            connections_established: 0,
            writer_ref: None,
            reader_task: None,
            tick_task: None,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: ActorStopReason,
    ) -> GatewayResult<()> {
        self.logout().await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<Output = Result<std::ops::ControlFlow<ActorStopReason>, Self::Error>>
    + Send {
        async move {
            error!(error = ?err, "GatewayActor panicked");
            Ok(std::ops::ControlFlow::Break(ActorStopReason::Panicked(err)))
        }
    }
}

impl<T: GatewayTransport> KameoMessage<GatewayCommand> for GatewayActor<T> {
    type Reply = GatewayResult<()>;

    async fn handle(
        &mut self,
        command: GatewayCommand,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match command {
            GatewayCommand::Open => self.open(),
            GatewayCommand::Logout => {
                self.logout().await;
                Ok(())
            }
            GatewayCommand::Tick => {
                self.on_tick().await;
                Ok(())
            }
        }
    }
}

impl<T: GatewayTransport> KameoMessage<ConnectionEstablished<T>> for GatewayActor<T> {
    type Reply = GatewayResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.on_connection_established(msg.connection, msg.reader, msg.writer)
            .await;
        Ok(())
    }
}

impl<T: GatewayTransport> KameoMessage<ConnectionFailed> for GatewayActor<T> {
    type Reply = GatewayResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.connection != self.connection || !self.running {
            return Ok(());
        }
        error!(connection = msg.connection, error = %msg.error, "gateway connect failed");
        self.health.record_error("connect", &msg.error.to_string());
        self.state = ConnectionState::Error;
        Ok(())
    }
}

impl<T: GatewayTransport> KameoMessage<TransportNotice> for GatewayActor<T> {
    type Reply = GatewayResult<()>;

    async fn handle(
        &mut self,
        notice: TransportNotice,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if notice.connection != self.connection || !self.running {
            debug!(
                connection = notice.connection,
                current = self.connection,
                "ignoring notice from stale connection"
            );
            return Ok(());
        }

        match notice.event {
            TransportEvent::Fragment(fragment) => self.on_fragment(&fragment).await,
            TransportEvent::Error(err) => {
                error!(connection = self.connection, error = %err, "gateway transport error");
                self.health.record_error("transport", &err.to_string());
                self.state = ConnectionState::Error;
                self.close_transport(None).await;
            }
            TransportEvent::Disconnected => self.on_disconnected().await,
        }
        Ok(())
    }
}

impl<T: GatewayTransport> KameoMessage<GetSessionSnapshot> for GatewayActor<T> {
    type Reply = GatewayResult<SessionSnapshot>;

    async fn handle(
        &mut self,
        _msg: GetSessionSnapshot,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.snapshot())
    }
}

impl<T: GatewayTransport> KameoMessage<GetGatewayStats> for GatewayActor<T> {
    type Reply = GatewayResult<GatewayStats>;

    async fn handle(
        &mut self,
        _msg: GetGatewayStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.health.stats())
    }
}

impl<T: GatewayTransport> KameoMessage<GetConnectionState> for GatewayActor<T> {
    type Reply = GatewayResult<ConnectionState>;

    async fn handle(
        &mut self,
        _msg: GetConnectionState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.state)
    }
}

impl<T: GatewayTransport> GatewayActor<T> {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis().min(u64::MAX as u128) as u64
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            sequence: self.sequence.last(),
            heartbeat: self.heartbeater,
            session_id: self.session.as_ref().map(|s| s.session_id.clone()),
            user_id: self.session.as_ref().map(|s| s.user.id.clone()),
            close_reason: self.close_reason,
            close_code: self.close_code,
            close_description: self.close_description.clone(),
            buffered_len: self.reassembler.filled_len(),
            connections: self.connections_established,
        }
    }

    fn open(&mut self) -> GatewayResult<()> {
        if self.running {
            debug!(state = self.state.as_str(), "gateway already open");
            return Ok(());
        }
        info!(url = %self.config.url, "opening gateway");
        self.running = true;
        self.close_code = CloseCode::NoCode;
        self.close_description = None;
        self.start_tick_loop();
        self.connect();
        Ok(())
    }

    /// Reset per-connection state and start a fresh transport connect.
    fn connect(&mut self) {
        self.reset_connection_state();
        self.close_reason = CloseReason::NotRequested;
        self.state = ConnectionState::Init;
        self.connection = self.connection.wrapping_add(1);

        let connection = self.connection;
        let actor_ref = self.actor_ref.clone();
        let transport = self.transport.clone();
        let url = self.config.url.clone();
        let receive_buffer = self.reassembler.capacity();

        debug!(connection, url = %url, "connecting gateway transport");
        tokio::spawn(async move {
            let result = transport.connect(url, receive_buffer).await;
            let Some(actor_ref) = actor_ref.upgrade() else {
                return;
            };
            match result {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            connection,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(error) => {
                    let _ = actor_ref
                        .tell(ConnectionFailed { connection, error })
                        .send()
                        .await;
                }
            }
        });
    }

    async fn on_connection_established(
        &mut self,
        connection: u64,
        reader: T::Reader,
        mut writer: T::Writer,
    ) {
        if connection != self.connection || !self.running {
            debug!(connection, "closing superseded gateway connection");
            drop(reader);
            let _ = writer.close().await;
            return;
        }

        info!(connection, "gateway transport connected");
        self.connections_established = self.connections_established.saturating_add(1);
        self.state = ConnectionState::Connecting;
        self.writer_ref = Some(GatewayWriterActor::spawn(GatewayWriterActor::new(writer)));

        let actor_ref = self.actor_ref.clone();
        let mut reader = reader;
        self.reader_task = Some(tokio::spawn(async move {
            let closing = loop {
                let event = match reader.next().await {
                    Some(Ok(fragment)) => TransportEvent::Fragment(fragment),
                    Some(Err(err)) => break TransportEvent::Error(err),
                    None => break TransportEvent::Disconnected,
                };
                let Some(actor) = actor_ref.upgrade() else {
                    return;
                };
                if actor
                    .tell(TransportNotice { connection, event })
                    .send()
                    .await
                    .is_err()
                {
                    return;
                }
            };
            if let Some(actor) = actor_ref.upgrade() {
                let _ = actor
                    .tell(TransportNotice {
                        connection,
                        event: closing,
                    })
                    .send()
                    .await;
            }
        }));
    }

    fn start_tick_loop(&mut self) {
        if let Some(handle) = self.tick_task.take() {
            handle.abort();
        }

        let actor_ref = self.actor_ref.clone();
        let period = self.config.tick_interval();
        self.tick_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(actor) = actor_ref.upgrade() else {
                    break;
                };
                if actor.tell(GatewayCommand::Tick).send().await.is_err() {
                    break;
                }
            }
        }));
    }

    async fn on_tick(&mut self) {
        match self.state {
            ConnectionState::Error => {
                error!(connection = self.connection, "gateway in error state, logging out");
                self.logout().await;
            }
            ConnectionState::Connected => self.check_heartbeat().await,
            _ => {}
        }
    }

    async fn check_heartbeat(&mut self) {
        let now = self.now_ms();
        match self.heartbeater.should_beat(self.sequence.last(), now) {
            HeartbeatDecision::No => {}
            HeartbeatDecision::Beat(sequence) => {
                self.heartbeat_sent_at = Some(Instant::now());
                if let Err(err) = self.send_heartbeat(sequence).await {
                    warn!(error = %err, "heartbeat send failed, reconnecting");
                    self.reconnect(CloseReason::ReconnectRequested).await;
                }
            }
            HeartbeatDecision::MustReconnect => {
                warn!(
                    connection = self.connection,
                    interval_ms = self.heartbeater.interval_ms(),
                    "heartbeat ack not received since last heartbeat, reconnecting with identify"
                );
                self.health
                    .record_error("heartbeat", &GatewayError::LivenessLost.to_string());
                self.reconnect(CloseReason::HeartbeatAckMissing).await;
            }
        }
    }

    async fn send_heartbeat(&mut self, sequence: Option<u64>) -> GatewayResult<()> {
        debug!(sequence = ?sequence, "sending heartbeat");
        let payload = encode_heartbeat(sequence)?;
        self.send_payload(payload, "heartbeat send").await?;
        self.health.record_heartbeat_sent();
        Ok(())
    }

    async fn send_identify(&mut self) -> GatewayResult<()> {
        info!(intents = self.config.intents.bits(), "sending identify");
        let payload = encode_identify(
            &self.config.token,
            self.config.intents.bits(),
            &self.config.client_properties,
        )?;
        self.send_payload(payload, "identify send").await
    }

    async fn send_payload(&mut self, payload: Bytes, context: &'static str) -> GatewayResult<()> {
        let writer = self
            .writer_ref
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidState(format!("{context}: no writer")))?;

        let request = writer.ask(WriteFrame {
            frame: WsFrame::Text(payload),
        });
        match tokio::time::timeout(self.config.send_timeout(), request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(SendError::HandlerError(err))) => {
                self.health.record_error(context, &err.to_string());
                Err(err)
            }
            Ok(Err(_)) => Err(GatewayError::ActorError(format!(
                "{context}: writer unavailable"
            ))),
            Err(_) => {
                self.health.record_error(context, "timed out");
                Err(GatewayError::timeout(context))
            }
        }
    }

    async fn on_fragment(&mut self, fragment: &WsFragment) {
        match self.reassembler.accept_fragment(fragment) {
            Reassembly::Incomplete => {}
            Reassembly::Overflow { declared, capacity } => {
                let err = GatewayError::ReassemblyOverflow { declared, capacity };
                warn!(declared, capacity, "dropping message larger than receive buffer");
                self.health.record_overflow();
                self.health.record_error("reassembly", &err.to_string());
            }
            Reassembly::Complete(CompletedMessage::Text(bytes)) => {
                self.health.record_inbound();
                self.on_message(&bytes).await;
            }
            Reassembly::Complete(CompletedMessage::Close(info)) => {
                self.state = ConnectionState::Disconnecting;
                self.close_code = info.code;
                self.close_description = info.description;
                warn!(
                    connection = self.connection,
                    close_code = ?self.close_code.as_u16(),
                    close_name = self.close_code.description(),
                    reason = self.close_description.as_deref().unwrap_or(""),
                    "gateway close frame received"
                );
            }
        }
    }

    async fn on_message(&mut self, bytes: &[u8]) {
        let raw = match self.decoder.decode_header(bytes) {
            Ok(raw) => raw,
            Err(err) => {
                self.on_decode_failure(&err, bytes.len());
                return;
            }
        };

        // A valid header counts toward the sequence even if its body is rejected.
        self.sequence.observe(raw.sequence);
        debug!(op = raw.op.as_u8(), sequence = ?raw.sequence, "gateway envelope");

        let mut envelope = match raw.into_envelope() {
            Ok(envelope) => envelope,
            Err(err) => {
                self.on_decode_failure(&err, bytes.len());
                return;
            }
        };

        match envelope.op {
            OpCode::Hello => self.on_hello(&mut envelope).await,
            OpCode::HeartbeatAck => {
                if let Some(sent_at) = self.heartbeat_sent_at.take() {
                    self.health.record_heartbeat_rtt(sent_at.elapsed());
                }
                self.heartbeater.on_ack_received();
            }
            OpCode::Heartbeat => {
                if let Err(err) = self.send_heartbeat(self.sequence.last()).await {
                    warn!(error = %err, "requested heartbeat send failed");
                }
            }
            OpCode::Dispatch => self.on_dispatch(&mut envelope).await,
            OpCode::Reconnect => {
                info!("server requested reconnect");
                self.reconnect(CloseReason::ReconnectRequested).await;
            }
            OpCode::InvalidSession => {
                let resumable = matches!(
                    envelope.take_data(),
                    Some(EnvelopeData::InvalidSession(true))
                );
                warn!(resumable, "session invalidated, reconnecting with identify");
                self.reconnect(CloseReason::ReconnectRequested).await;
            }
            op => {
                let err = GatewayError::ProtocolViolation(format!(
                    "unhandled payload op {}",
                    op.as_u8()
                ));
                warn!(error = %err, "ignoring gateway payload");
            }
        }
    }

    fn on_decode_failure(&mut self, err: &GatewayError, len: usize) {
        warn!(error = %err, len, "dropping undecodable gateway message");
        self.health.record_decode_failure();
        self.health.record_error("decode", &err.to_string());
    }

    async fn on_hello(&mut self, envelope: &mut Envelope) {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            warn!(state = self.state.as_str(), "ignoring hello outside handshake");
            return;
        }
        let Some(EnvelopeData::Hello(hello)) = envelope.take_data() else {
            warn!("hello without body");
            return;
        };

        self.state = ConnectionState::Connected;
        let now = self.now_ms();
        if self.heartbeater.start(hello.heartbeat_interval, now) {
            info!(interval_ms = hello.heartbeat_interval, "heartbeat started");
        }
        if let Err(err) = self.send_identify().await {
            error!(error = %err, "identify send failed, reconnecting");
            self.reconnect(CloseReason::ReconnectRequested).await;
        }
    }

    async fn on_dispatch(&mut self, envelope: &mut Envelope) {
        let Some(EnvelopeData::Dispatch(event)) = envelope.take_data() else {
            return;
        };

        let event = match event {
            DispatchEvent::Ready(session) => {
                info!(
                    session_id = %session.session_id,
                    user_id = %session.user.id,
                    "gateway session ready"
                );
                let session = Arc::new(session);
                self.session = Some(Arc::clone(&session));
                GatewayEvent::Connected(session)
            }
            other if self.state != ConnectionState::Connected => {
                warn!(
                    event = other.name(),
                    state = self.state.as_str(),
                    "dispatch outside connected state ignored"
                );
                self.health.record_dropped();
                return;
            }
            other => {
                match filter_dispatch(
                    other,
                    self.session.as_deref(),
                    self.config.forward_unknown_events,
                ) {
                    Ok(event) => event,
                    Err(reason) => {
                        let name = envelope.event_name.as_deref().unwrap_or("");
                        match reason {
                            DropReason::UnknownEvent => {
                                warn!(event = name, "unhandled dispatch event")
                            }
                            DropReason::NoSession => {
                                warn!(event = name, "dispatch before ready ignored")
                            }
                            _ => debug!(event = name, reason = reason.as_str(), "dispatch filtered"),
                        }
                        self.health.record_dropped();
                        return;
                    }
                }
            }
        };

        let name = event.name().to_string();
        match self.dispatch.deliver(event).await {
            Ok(()) => self.health.record_dispatched(),
            Err(err) => {
                warn!(event = %name, error = %err, "dispatch event dropped");
                self.health.record_dropped();
                self.health.record_error("dispatch", &err.to_string());
            }
        }
    }

    async fn on_disconnected(&mut self) {
        if self.state != ConnectionState::Disconnecting {
            self.state = ConnectionState::Disconnecting;
        }
        self.close_transport(None).await;
        self.state = ConnectionState::Disconnected;
        self.after_disconnect().await;
    }

    /// Decide what a finished disconnect means.
    async fn after_disconnect(&mut self) {
        if !self.close_reason.is_requested() {
            error!(
                connection = self.connection,
                close_code = ?self.close_code.as_u16(),
                error = %GatewayError::UnexpectedDisconnect,
                "gateway disconnected without request, token may be invalid; logging out"
            );
            self.health
                .record_error("disconnect", &GatewayError::UnexpectedDisconnect.to_string());
            self.logout().await;
        } else if self.close_reason == CloseReason::LogoutRequested {
            self.logout().await;
        } else {
            info!(reason = self.close_reason.as_str(), "reconnecting gateway");
            self.health.increment_reconnect();
            self.connect();
        }
    }

    /// Deliberately close the transport and start over from identify.
    async fn reconnect(&mut self, reason: CloseReason) {
        self.close_reason = reason;
        self.state = ConnectionState::Disconnecting;
        self.close_transport(Some(NORMAL_CLOSURE)).await;
        self.state = ConnectionState::Disconnected;
        self.after_disconnect().await;
    }

    fn reset_connection_state(&mut self) {
        self.heartbeater.stop();
        self.heartbeat_sent_at = None;
        self.sequence.reset();
        self.reassembler.reset();
    }

    /// Stop IO for the current connection with bounded waits, then reset per-connection state.
    async fn close_transport(&mut self, code: Option<u16>) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
            let _ = task.await;
        }

        if let Some(writer) = self.writer_ref.take() {
            let close_timeout = self.config.close_timeout();
            match tokio::time::timeout(close_timeout, writer.ask(CloseWriter { code })).await {
                Ok(Ok(())) => {}
                Ok(Err(SendError::HandlerError(err))) => {
                    debug!(error = %err, "transport close reported an error")
                }
                Ok(Err(_)) => debug!("writer already stopped"),
                Err(_) => warn!(timeout_ms = self.config.close_timeout_ms, "transport close timed out"),
            }
            let _ = writer.stop_gracefully().await;
            if tokio::time::timeout(close_timeout, writer.wait_for_shutdown())
                .await
                .is_err()
            {
                writer.kill();
            }
        }

        self.reset_connection_state();
    }

    /// Close everything and return to `Unknown`. Safe to call repeatedly.
    async fn logout(&mut self) {
        if !self.running && self.state == ConnectionState::Unknown {
            return;
        }
        if let Some(handle) = self.tick_task.take() {
            handle.abort();
        }
        if self.writer_ref.is_some() || self.reader_task.is_some() {
            self.close_reason = CloseReason::LogoutRequested;
            self.state = ConnectionState::Disconnecting;
        }
        self.close_transport(Some(NORMAL_CLOSURE)).await;

        // Invalidate any connect still in flight.
        self.connection = self.connection.wrapping_add(1);
        self.session = None;
        self.running = false;
        self.state = ConnectionState::Unknown;
        info!("gateway logged out");
    }
}
