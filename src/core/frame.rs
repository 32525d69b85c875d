use bytes::Bytes;

/// Outbound websocket frame.
///
/// The engine only ever writes text envelopes and close frames; transports convert this into
/// their native representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: String,
}

impl WsFrame {
    #[inline]
    pub fn text<B>(bytes: B) -> Self
    where
        B: Into<Bytes>,
    {
        Self::Text(bytes.into())
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    /// Borrow the text payload without allocation.
    #[inline]
    pub fn text_bytes(&self) -> Option<&[u8]> {
        match self {
            WsFrame::Text(bytes) => Some(bytes.as_ref()),
            WsFrame::Close(_) => None,
        }
    }
}

/// Kind of logical message a fragment belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Close,
}

/// One transport-delivered slice of a logical message.
///
/// `offset` is the position of `payload` inside the message and `total_len` is the declared
/// length of the whole message. Transports that deliver whole messages use
/// [`WsFragment::whole`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsFragment {
    pub kind: FrameKind,
    pub payload: Bytes,
    pub offset: usize,
    pub total_len: usize,
}

impl WsFragment {
    #[inline]
    pub fn whole(kind: FrameKind, payload: Bytes) -> Self {
        let total_len = payload.len();
        Self {
            kind,
            payload,
            offset: 0,
            total_len,
        }
    }

    #[inline]
    pub fn text<B>(payload: B) -> Self
    where
        B: Into<Bytes>,
    {
        Self::whole(FrameKind::Text, payload.into())
    }

    /// Build a close fragment carrying the big-endian status code followed by the reason text.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::whole(FrameKind::Close, Bytes::from(payload))
    }

    /// Split a message into fragments of at most `chunk` bytes, preserving offsets.
    pub fn split(kind: FrameKind, payload: Bytes, chunk: usize) -> Vec<Self> {
        let total_len = payload.len();
        if total_len == 0 || chunk == 0 {
            return vec![Self::whole(kind, payload)];
        }
        (0..total_len)
            .step_by(chunk)
            .map(|offset| {
                let end = (offset + chunk).min(total_len);
                Self {
                    kind,
                    payload: payload.slice(offset..end),
                    offset,
                    total_len,
                }
            })
            .collect()
    }
}

/// Close status code extracted from a close-frame payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CloseCode {
    #[default]
    NoCode,
    Code(u16),
}

impl CloseCode {
    pub const MIN: u16 = 1000;
    pub const MAX: u16 = 4999;

    /// Read the first two payload bytes as a big-endian code; out of range or short payloads
    /// yield [`CloseCode::NoCode`].
    pub fn from_payload(payload: &[u8]) -> Self {
        let [hi, lo, ..] = payload else {
            return Self::NoCode;
        };
        Self::from_u16(u16::from_be_bytes([*hi, *lo]))
    }

    pub fn from_u16(code: u16) -> Self {
        if (Self::MIN..=Self::MAX).contains(&code) {
            Self::Code(code)
        } else {
            Self::NoCode
        }
    }

    pub fn as_u16(self) -> Option<u16> {
        match self {
            CloseCode::NoCode => None,
            CloseCode::Code(code) => Some(code),
        }
    }

    /// Human readable name for the gateway's close codes.
    pub fn description(self) -> &'static str {
        match self.as_u16() {
            None => "no close code",
            Some(1000) => "normal closure",
            Some(1001) => "going away",
            Some(4000) => "unknown error",
            Some(4001) => "unknown opcode",
            Some(4002) => "decode error",
            Some(4003) => "not authenticated",
            Some(4004) => "authentication failed",
            Some(4005) => "already authenticated",
            Some(4007) => "invalid sequence",
            Some(4008) => "rate limited",
            Some(4009) => "session timed out",
            Some(4010) => "invalid shard",
            Some(4011) => "sharding required",
            Some(4012) => "invalid API version",
            Some(4013) => "invalid intents",
            Some(4014) => "disallowed intents",
            Some(_) => "unrecognised close code",
        }
    }
}

/// Typed result of a completed close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrameInfo {
    pub code: CloseCode,
    /// Text following the status code, only kept when the code itself is valid.
    pub description: Option<String>,
}

impl CloseFrameInfo {
    pub fn from_payload(payload: &[u8]) -> Self {
        let code = CloseCode::from_payload(payload);
        let description = match code {
            CloseCode::NoCode => None,
            CloseCode::Code(_) => {
                let text = String::from_utf8_lossy(&payload[2..]);
                (!text.is_empty()).then(|| text.into_owned())
            }
        };
        Self { code, description }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_code_reads_big_endian_prefix() {
        let fragment = WsFragment::close(4004, "Authentication failed.");
        assert_eq!(
            CloseCode::from_payload(&fragment.payload),
            CloseCode::Code(4004)
        );

        let info = CloseFrameInfo::from_payload(&fragment.payload);
        assert_eq!(info.code.as_u16(), Some(4004));
        assert_eq!(info.description.as_deref(), Some("Authentication failed."));
        assert_eq!(info.code.description(), "authentication failed");
    }

    #[test]
    fn close_code_rejects_short_or_out_of_range_payloads() {
        assert_eq!(CloseCode::from_payload(&[]), CloseCode::NoCode);
        assert_eq!(CloseCode::from_payload(&[0x0f]), CloseCode::NoCode);
        assert_eq!(CloseCode::from_payload(&999u16.to_be_bytes()), CloseCode::NoCode);
        assert_eq!(CloseCode::from_payload(&5000u16.to_be_bytes()), CloseCode::NoCode);
        assert_eq!(
            CloseCode::from_payload(&1000u16.to_be_bytes()),
            CloseCode::Code(1000)
        );

        let info = CloseFrameInfo::from_payload(&[0x00, 0x01, b'x']);
        assert_eq!(info.code, CloseCode::NoCode);
        assert!(info.description.is_none());
    }

    #[test]
    fn split_preserves_offsets_and_total_len() {
        let payload = Bytes::from_static(b"0123456789");
        let fragments = WsFragment::split(FrameKind::Text, payload, 4);
        assert_eq!(fragments.len(), 3);
        assert_eq!(
            fragments.iter().map(|f| f.offset).collect::<Vec<_>>(),
            vec![0, 4, 8]
        );
        assert!(fragments.iter().all(|f| f.total_len == 10));
        assert_eq!(fragments[2].payload.as_ref(), b"89");
    }
}
