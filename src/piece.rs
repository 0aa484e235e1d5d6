//! Piece assembly and coordination.
//!
//! This module tracks which pieces are present locally and turns received
//! blocks back into verified pieces.
//!
//! # Overview
//!
//! - [`PieceCoordinator`] - Owns the piece bitmap, checkouts and end-game
//! - [`Piece`] - A piece being assembled from blocks, verified by SHA-1
//! - [`PieceGeometry`] - Piece and block layout of the torrent
//! - [`BufferPool`] - Reusable assembly buffers
//!
//! # Examples
//!
//! ```
//! use blockwire::piece::PieceGeometry;
//!
//! // 100,000 bytes in 16KB pieces
//! let geometry = PieceGeometry::new(100_000, 16384, 16384);
//!
//! assert_eq!(geometry.piece_count(), 7);
//! assert_eq!(geometry.piece_len(6), 100_000 - 6 * 16384);
//! ```

mod assembler;
mod buffer_pool;
mod coordinator;
mod error;
mod geometry;
mod status;

pub use assembler::{BlockOutcome, Piece, PieceSink};
pub use buffer_pool::BufferPool;
pub use coordinator::{PieceCoordinator, PieceEvent, PieceSource};
pub use error::PieceError;
pub use geometry::PieceGeometry;
pub use status::PieceStatus;

#[cfg(test)]
mod tests;
