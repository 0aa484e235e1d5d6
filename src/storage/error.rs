use thiserror::Error;

/// Persistence failures. Any of these is fatal for the transfer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file {path} is {actual} bytes, {required} required")]
    FileTooShort {
        path: String,
        required: u64,
        actual: u64,
    },

    #[error("piece {piece} maps to {expected} bytes on disk, got {actual}")]
    LengthMismatch { piece: u32, expected: u64, actual: u64 },

    #[error("piece {0} has no downloaded bytes")]
    EmptyPiece(u32),

    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    #[error("path traversal detected in file path: {0}")]
    PathTraversal(String),
}
