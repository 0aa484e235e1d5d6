use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by piece assembly and coordination.
///
/// These indicate misuse by the caller or a failing piece source; hash
/// mismatches are not errors and are reported as corruption events instead.
#[derive(Debug, Error)]
pub enum PieceError {
    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("invalid block: piece {piece}, offset {offset}, length {length}")]
    InvalidBlock { piece: u32, offset: u32, length: u32 },

    #[error("piece {0} has already been completed or discarded")]
    AlreadyFinished(u32),

    #[error("piece {0} is not present")]
    NotPresent(u32),

    #[error("expected {expected} piece entries, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
