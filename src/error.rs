//! Error types for the AMQP engine.

use thiserror::Error;

/// Main error type for all engine operations.
///
/// The enum is `Clone` because a single failure (a broker-initiated close,
/// a heartbeat timeout) fans out to every pending deferred on the affected
/// scope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmqpError {
    /// Server rejected the protocol header (it does not speak AMQP 0-9-1).
    #[error("server does not support AMQP 0-9-1")]
    ProtocolMismatch,

    /// A wire read ran past the end of the available bytes.
    #[error("truncated wire data")]
    Truncated,

    /// Low-level framing violation (bad frame type, missing end marker,
    /// oversized frame). Always fatal for the connection.
    #[error("framing error: {0}")]
    Framing(String),

    /// A frame arrived that is not valid in the current protocol state.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    /// Broker refused our credentials (connection.close with code 403).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Broker closed the channel with an error code.
    #[error("channel exception {code}: {text}")]
    ChannelException { code: u16, text: String },

    /// Broker closed the connection with an error code.
    #[error("connection exception {code}: {text}")]
    ConnectionException { code: u16, text: String },

    /// No frame was received within twice the negotiated heartbeat interval.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The channel was closed before the operation could complete.
    #[error("channel closed")]
    ChannelClosed,

    /// The connection was closed before the operation could complete.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation requires an open connection.
    #[error("not connected")]
    NotConnected,

    /// The requested combination is not supported by this client.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl AmqpError {
    /// True for errors after which no further traffic is possible on the
    /// connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AmqpError::ProtocolMismatch
                | AmqpError::Truncated
                | AmqpError::Framing(_)
                | AmqpError::UnexpectedFrame(_)
                | AmqpError::HeartbeatTimeout
                | AmqpError::ConnectionException { .. }
                | AmqpError::AuthenticationFailed(_)
        )
    }
}

/// Result type alias using AmqpError.
pub type Result<T> = std::result::Result<T, AmqpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code_and_text() {
        let err = AmqpError::ChannelException {
            code: 406,
            text: "PRECONDITION_FAILED".to_string(),
        };
        assert_eq!(err.to_string(), "channel exception 406: PRECONDITION_FAILED");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AmqpError::Framing("no end marker".into()).is_fatal());
        assert!(AmqpError::HeartbeatTimeout.is_fatal());
        assert!(!AmqpError::ChannelException {
            code: 406,
            text: String::new()
        }
        .is_fatal());
        assert!(!AmqpError::ChannelClosed.is_fatal());
    }
}
