use thiserror::Error;

/// Errors that can occur during peer communication.
///
/// [`is_fatal`](PeerError::is_fatal) tells a session whether to tear the
/// connection down or drop the offending message and carry on.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent an invalid handshake.
    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    /// The peer's info hash doesn't match ours.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// The peer answered with our own peer id.
    #[error("connected to ourselves")]
    OwnPeerId,

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received an unknown message ID.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// A well-formed message carried out-of-range fields.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing was received within the keep-alive timeout.
    #[error("no traffic for {0} seconds")]
    Timeout(u64),

    /// The peer kept us choked for too long.
    #[error("choked for {0} unanswered interested messages")]
    Stalled(u32),

    /// Protocol violation by the peer.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl PeerError {
    /// Fatal errors end the session; the rest only cost the message.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PeerError::InvalidMessage(_) | PeerError::InvalidMessageId(_) | PeerError::Validation(_)
        )
    }
}
