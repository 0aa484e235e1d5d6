//! Peer wire protocol.
//!
//! This module implements the per-connection side of piece exchange: the
//! message codec, the stream framer, and [`PeerSession`], the state machine
//! that drives one remote peer.
//!
//! # Sessions
//!
//! A session performs the handshake, tracks the choke and interest state in
//! both directions, validates every incoming message against the torrent's
//! piece geometry, downloads pieces checked out from the
//! [`PieceCoordinator`](crate::piece::PieceCoordinator) and serves the
//! remote's block requests. Failures are reported as [`SessionEvent`]s;
//! fatal ones end the session.

mod bitfield;
mod block;
mod error;
mod framer;
mod message;
mod peer_id;
mod session;
mod state;
mod traffic;

pub use bitfield::Bitfield;
pub use block::{Block, BlockRequest};
pub use error::PeerError;
pub use framer::{Frame, FrameReader, FrameWriter};
pub use message::{Handshake, Message, MessageId};
pub use peer_id::PeerId;
pub use session::{Direction, PeerSession, SessionContext, SessionEvent};
pub use state::{HandshakeReply, HandshakeState, LeechingState, SeedingState};
pub use traffic::{TrafficSnapshot, TrafficStats};
