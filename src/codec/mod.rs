//! Gateway envelope codec.
//!
//! Inbound envelopes are decoded in two steps: one lazy pass over the header fields
//! (`op`, `s`, `t`, `d`), then a typed deserialize of the body selected by opcode and event
//! name. Outbound envelopes are always `{"op": .., "d": ..}`.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sonic_rs::{JsonValueTrait, LazyValue, PointerTree};

use crate::core::{GatewayError, GatewayResult};

pub mod model;

pub use model::*;

/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Dispatch,
    Heartbeat,
    Identify,
    PresenceUpdate,
    VoiceStateUpdate,
    Resume,
    Reconnect,
    RequestGuildMembers,
    InvalidSession,
    Hello,
    HeartbeatAck,
    Unknown(u8),
}

impl OpCode {
    pub fn from_u8(op: u8) -> Self {
        match op {
            0 => OpCode::Dispatch,
            1 => OpCode::Heartbeat,
            2 => OpCode::Identify,
            3 => OpCode::PresenceUpdate,
            4 => OpCode::VoiceStateUpdate,
            6 => OpCode::Resume,
            7 => OpCode::Reconnect,
            8 => OpCode::RequestGuildMembers,
            9 => OpCode::InvalidSession,
            10 => OpCode::Hello,
            11 => OpCode::HeartbeatAck,
            other => OpCode::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::PresenceUpdate => 3,
            OpCode::VoiceStateUpdate => 4,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::RequestGuildMembers => 8,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
            OpCode::Unknown(other) => other,
        }
    }
}

/// Dispatch event names with first-class handling.
pub mod event_name {
    pub const READY: &str = "READY";
    pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";
    pub const MESSAGE_UPDATE: &str = "MESSAGE_UPDATE";
    pub const MESSAGE_DELETE: &str = "MESSAGE_DELETE";
}

/// Decoded body of a dispatch envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Ready(Session),
    MessageCreate(Message),
    MessageUpdate(Message),
    MessageDelete(MessageDelete),
    /// Any other event; `raw` is the undecoded `d` value.
    Unknown { name: String, raw: Bytes },
}

impl DispatchEvent {
    pub fn name(&self) -> &str {
        match self {
            DispatchEvent::Ready(_) => event_name::READY,
            DispatchEvent::MessageCreate(_) => event_name::MESSAGE_CREATE,
            DispatchEvent::MessageUpdate(_) => event_name::MESSAGE_UPDATE,
            DispatchEvent::MessageDelete(_) => event_name::MESSAGE_DELETE,
            DispatchEvent::Unknown { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeData {
    Hello(Hello),
    Dispatch(DispatchEvent),
    /// Whether the invalidated session may be resumed.
    InvalidSession(bool),
}

/// One decoded gateway message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub op: OpCode,
    pub sequence: Option<u64>,
    pub event_name: Option<String>,
    data: Option<EnvelopeData>,
}

impl Envelope {
    pub fn new(
        op: OpCode,
        sequence: Option<u64>,
        event_name: Option<String>,
        data: Option<EnvelopeData>,
    ) -> Self {
        Self {
            op,
            sequence,
            event_name,
            data,
        }
    }

    pub fn data(&self) -> Option<&EnvelopeData> {
        self.data.as_ref()
    }

    /// Move the body out, leaving the envelope empty.
    #[inline]
    pub fn take_data(&mut self) -> Option<EnvelopeData> {
        self.data.take()
    }
}

/// Reusable decoder; the header pointer tree is built once.
pub struct EnvelopeDecoder {
    header: PointerTree,
}

impl Default for EnvelopeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EnvelopeDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeDecoder").finish_non_exhaustive()
    }
}

const OP: usize = 0;
const SEQUENCE: usize = 1;
const EVENT_NAME: usize = 2;
const DATA: usize = 3;

impl EnvelopeDecoder {
    pub fn new() -> Self {
        let mut header = PointerTree::new();
        header.add_path(&["op"]);
        header.add_path(&["s"]);
        header.add_path(&["t"]);
        header.add_path(&["d"]);
        Self { header }
    }

    /// Decode header and body in one go.
    pub fn decode(&self, bytes: &[u8]) -> GatewayResult<Envelope> {
        self.decode_header(bytes)?.into_envelope()
    }

    /// Read `op`, `s` and `t`, leaving the body undecoded.
    ///
    /// Fails only when the document is not JSON or carries no usable `op`; a header that
    /// decodes still has a valid sequence even if its body later fails.
    pub fn decode_header<'a>(&self, bytes: &'a [u8]) -> GatewayResult<RawEnvelope<'a>> {
        let mut fields = sonic_rs::get_many(bytes, &self.header)?;
        let mut field = |idx: usize| fields.get_mut(idx).and_then(Option::take);

        let op = field(OP)
            .and_then(|v| v.as_u64())
            .and_then(|op| u8::try_from(op).ok())
            .map(OpCode::from_u8)
            .ok_or_else(|| GatewayError::DecodeFailure("missing or invalid op".to_string()))?;
        let sequence = field(SEQUENCE).and_then(|v| v.as_u64());
        let event_name = field(EVENT_NAME)
            .and_then(|v| v.as_str().map(str::to_string));
        let body = field(DATA).filter(|v| !v.is_null());

        Ok(RawEnvelope {
            op,
            sequence,
            event_name,
            body,
        })
    }
}

/// Envelope whose header is decoded and whose body still borrows the input.
pub struct RawEnvelope<'a> {
    pub op: OpCode,
    pub sequence: Option<u64>,
    pub event_name: Option<String>,
    body: Option<LazyValue<'a>>,
}

impl RawEnvelope<'_> {
    /// Deserialize the body selected by opcode and event name.
    pub fn into_envelope(self) -> GatewayResult<Envelope> {
        let body = self.body.as_ref();
        let data = match self.op {
            OpCode::Hello => Some(EnvelopeData::Hello(required(body, "hello")?)),
            OpCode::InvalidSession => Some(EnvelopeData::InvalidSession(
                body.and_then(|v| v.as_bool()).unwrap_or(false),
            )),
            OpCode::Dispatch => {
                let name = self.event_name.as_deref().ok_or_else(|| {
                    GatewayError::DecodeFailure("dispatch without event name".to_string())
                })?;
                Some(EnvelopeData::Dispatch(decode_dispatch(name, body)?))
            }
            _ => None,
        };

        Ok(Envelope::new(self.op, self.sequence, self.event_name, data))
    }
}

fn required<T: DeserializeOwned>(body: Option<&LazyValue<'_>>, what: &str) -> GatewayResult<T> {
    let body =
        body.ok_or_else(|| GatewayError::DecodeFailure(format!("{what} envelope without body")))?;
    Ok(sonic_rs::from_str(body.as_raw_str())?)
}

fn decode_dispatch(name: &str, body: Option<&LazyValue<'_>>) -> GatewayResult<DispatchEvent> {
    let event = match name {
        event_name::READY => DispatchEvent::Ready(required(body, name)?),
        event_name::MESSAGE_CREATE => DispatchEvent::MessageCreate(required(body, name)?),
        event_name::MESSAGE_UPDATE => DispatchEvent::MessageUpdate(required(body, name)?),
        event_name::MESSAGE_DELETE => DispatchEvent::MessageDelete(required(body, name)?),
        other => DispatchEvent::Unknown {
            name: other.to_string(),
            raw: body
                .map(|v| Bytes::copy_from_slice(v.as_raw_str().as_bytes()))
                .unwrap_or_default(),
        },
    };
    Ok(event)
}

#[derive(Serialize)]
struct Outbound<'a, T: Serialize> {
    op: u8,
    d: &'a T,
}

/// Encode an outbound envelope.
pub fn encode<T: Serialize>(op: OpCode, body: &T) -> GatewayResult<Bytes> {
    let bytes = sonic_rs::to_vec(&Outbound {
        op: op.as_u8(),
        d: body,
    })?;
    Ok(Bytes::from(bytes))
}

#[inline]
pub fn encode_heartbeat(sequence: Option<u64>) -> GatewayResult<Bytes> {
    encode(OpCode::Heartbeat, &sequence)
}

pub fn encode_identify(
    token: &str,
    intents: u64,
    properties: &IdentifyProperties,
) -> GatewayResult<Bytes> {
    encode(
        OpCode::Identify,
        &Identify {
            token,
            intents,
            properties,
        },
    )
}
