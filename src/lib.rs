//! blockwire - A BitTorrent piece-exchange engine
//!
//! This library implements the part of a BitTorrent client that moves piece
//! data: the peer wire protocol, piece acquisition across concurrent peer
//! sessions, block assembly with hash verification, multi-file storage and
//! shared rate limiting. Torrent metadata, trackers and peer discovery are
//! left to the caller.
//!
//! # Modules
//!
//! - [`peer`] - Peer wire codec, stream framing and per-connection sessions
//! - [`piece`] - Piece coordination, block assembly and verification
//! - [`storage`] - Mapping of pieces onto the files of a torrent
//! - [`bandwidth`] - Shared upload and download rate limiting
//! - [`transfer`] - Wiring of the above for a single torrent
//! - [`hash`] - SHA-1 piece digests and info hashes
//! - [`config`] - Tunable parameters
//! - [`constants`] - Protocol constants and defaults

pub mod bandwidth;
pub mod config;
pub mod constants;
pub mod hash;
pub mod peer;
pub mod piece;
pub mod storage;
pub mod transfer;

pub use bandwidth::{BandwidthLimiter, RateLimiter};
pub use config::Config;
pub use hash::{InfoHash, Sha1Hash};
pub use peer::{
    Bitfield, Direction, Handshake, Message, PeerError, PeerId, PeerSession, SessionContext,
    SessionEvent,
};
pub use piece::{Piece, PieceCoordinator, PieceError, PieceEvent, PieceGeometry, PieceStatus};
pub use storage::{FileEntry, StorageError, TorrentStorage};
pub use transfer::{Progress, TorrentLayout, Transfer, TransferError};
