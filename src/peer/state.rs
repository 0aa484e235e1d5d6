use super::error::PeerError;

/// Progress of the opening handshake exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Nothing sent or received.
    #[default]
    None,
    /// We sent our handshake and wait for theirs.
    SentButNotReceived,
    /// They sent theirs; ours is being queued.
    ReceivedButNotSent,
    /// Both sides sent a handshake; regular messages may flow.
    SendAndReceived,
}

/// What to queue after accepting the remote handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeReply {
    HandshakeAndBitfield,
    Bitfield,
}

impl HandshakeState {
    pub fn is_complete(self) -> bool {
        self == HandshakeState::SendAndReceived
    }

    /// Transition on receiving the remote handshake.
    pub fn on_receive(self) -> Result<(HandshakeState, HandshakeReply), PeerError> {
        match self {
            HandshakeState::None => Ok((
                HandshakeState::ReceivedButNotSent,
                HandshakeReply::HandshakeAndBitfield,
            )),
            HandshakeState::SentButNotReceived => {
                Ok((HandshakeState::SendAndReceived, HandshakeReply::Bitfield))
            }
            HandshakeState::ReceivedButNotSent | HandshakeState::SendAndReceived => Err(
                PeerError::Protocol("handshake received twice".into()),
            ),
        }
    }

    /// Transition once our own handshake is queued.
    pub fn on_sent(self) -> HandshakeState {
        match self {
            HandshakeState::None => HandshakeState::SentButNotReceived,
            HandshakeState::ReceivedButNotSent => HandshakeState::SendAndReceived,
            other => other,
        }
    }
}

/// Whether the remote lets us download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedingState {
    #[default]
    Choked,
    Unchoked,
}

/// Whether the remote wants our pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeechingState {
    Interested,
    #[default]
    Uninterested,
}
