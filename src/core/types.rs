use thiserror::Error;

/// Convenience result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Canonical error surface of the gateway engine.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Transport failure ({context}): {error}")]
    TransportFailure {
        context: &'static str,
        error: String,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Reassembly overflow: message of {declared} bytes exceeds buffer of {capacity}")]
    ReassemblyOverflow { declared: usize, capacity: usize },

    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Liveness lost: heartbeat was not acknowledged")]
    LivenessLost,

    #[error("Unexpected disconnect")]
    UnexpectedDisconnect,

    #[error("Timeout: {context}")]
    Timeout { context: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Actor error: {0}")]
    ActorError(String),

    #[error("Dispatch queue closed")]
    QueueClosed,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl GatewayError {
    pub fn transport(context: &'static str, error: impl ToString) -> Self {
        Self::TransportFailure {
            context,
            error: error.to_string(),
        }
    }

    pub fn timeout(context: impl Into<String>) -> Self {
        Self::Timeout {
            context: context.into(),
        }
    }
}

impl From<sonic_rs::Error> for GatewayError {
    fn from(err: sonic_rs::Error) -> Self {
        GatewayError::DecodeFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = GatewayError::transport("send", "broken pipe");
        assert_eq!(err.to_string(), "Transport failure (send): broken pipe");
        assert_eq!(
            GatewayError::timeout("close").to_string(),
            "Timeout: close"
        );
    }
}
