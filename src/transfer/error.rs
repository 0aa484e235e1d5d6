use crate::piece::PieceError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("piece error: {0}")]
    Piece(#[from] PieceError),

    /// Persisting a piece failed; the transfer accepts no more peers.
    #[error("transfer failed")]
    Failed,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
