use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

use super::buffer_pool::BufferPool;
use super::error::PieceError;
use crate::hash::Sha1Hash;

/// Receives the outcome of a piece once its last block arrives.
///
/// Exactly one of the two methods is called per [`Piece`], at most once.
pub trait PieceSink: Send + Sync {
    /// The assembled piece matched its expected hash.
    fn completed(&self, index: u32, data: Bytes);

    /// The assembled piece failed verification and was discarded.
    fn corrupted(&self, index: u32);
}

/// What a call to [`Piece::put_block`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block was stored; more blocks are outstanding.
    Stored,
    /// The block had already been received; nothing changed.
    Duplicate,
    /// The block completed the piece and the hash matched.
    Completed,
    /// The block completed the piece and the hash did not match.
    Corrupted,
}

/// A piece being assembled from blocks.
///
/// Created by [`PieceCoordinator::check_out`](super::PieceCoordinator::check_out)
/// and owned by the session that checked it out. The assembly buffer comes
/// from a [`BufferPool`] and goes back to it unless the piece completes.
pub struct Piece {
    index: u32,
    hash: Sha1Hash,
    length: u32,
    block_length: u32,
    block_count: u32,
    buffer: Option<BytesMut>,
    blocks: Vec<bool>,
    received: u32,
    finished: bool,
    sink: Arc<dyn PieceSink>,
    pool: Arc<BufferPool>,
}

impl Piece {
    pub fn new(
        index: u32,
        hash: Sha1Hash,
        length: u32,
        block_length: u32,
        sink: Arc<dyn PieceSink>,
        pool: Arc<BufferPool>,
    ) -> Self {
        let block_length = block_length.max(1);
        let block_count = length.div_ceil(block_length);
        let buffer = pool.get_piece_buffer(length as usize);

        Self {
            index,
            hash,
            length,
            block_length,
            block_count,
            buffer: Some(buffer),
            blocks: vec![false; block_count as usize],
            received: 0,
            finished: false,
            sink,
            pool,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn block_length(&self) -> u32 {
        self.block_length
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Number of distinct blocks received so far.
    pub fn received_blocks(&self) -> u32 {
        self.received
    }

    /// True once the piece has completed or been found corrupt.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Length of the block at `block`, the last one holding the remainder.
    fn len_of(&self, block: u32) -> u32 {
        if block + 1 == self.block_count {
            self.length - self.block_length * (self.block_count - 1)
        } else {
            self.block_length
        }
    }

    pub fn has_block(&self, offset: u32) -> bool {
        offset % self.block_length == 0
            && self
                .blocks
                .get((offset / self.block_length) as usize)
                .copied()
                .unwrap_or(false)
    }

    /// `(offset, length)` of every block not yet received.
    pub fn missing_blocks(&self) -> Vec<(u32, u32)> {
        (0..self.block_count)
            .filter(|&b| !self.blocks[b as usize])
            .map(|b| (b * self.block_length, self.len_of(b)))
            .collect()
    }

    /// Stores a block. Storing an already-received block is a no-op.
    ///
    /// When the last block arrives the piece is hashed and the sink is told
    /// whether it completed or was corrupted. Afterwards every call fails
    /// with [`PieceError::AlreadyFinished`].
    pub fn put_block(&mut self, offset: u32, data: &[u8]) -> Result<BlockOutcome, PieceError> {
        if self.finished {
            return Err(PieceError::AlreadyFinished(self.index));
        }

        let block = offset / self.block_length;
        if offset % self.block_length != 0
            || block >= self.block_count
            || data.len() != self.len_of(block) as usize
        {
            return Err(PieceError::InvalidBlock {
                piece: self.index,
                offset,
                length: data.len() as u32,
            });
        }

        if self.blocks[block as usize] {
            return Ok(BlockOutcome::Duplicate);
        }

        let Some(buffer) = self.buffer.as_mut() else {
            return Err(PieceError::AlreadyFinished(self.index));
        };
        let start = offset as usize;
        buffer[start..start + data.len()].copy_from_slice(data);
        self.blocks[block as usize] = true;
        self.received += 1;

        if self.received < self.block_count {
            return Ok(BlockOutcome::Stored);
        }

        self.finished = true;
        let Some(buffer) = self.buffer.take() else {
            return Err(PieceError::AlreadyFinished(self.index));
        };

        if self.hash.matches(&buffer) {
            self.sink.completed(self.index, buffer.freeze());
            Ok(BlockOutcome::Completed)
        } else {
            self.pool.return_piece_buffer(buffer);
            self.sink.corrupted(self.index);
            Ok(BlockOutcome::Corrupted)
        }
    }

    /// Returns a received block of the piece while it is still being
    /// assembled.
    pub fn get_block(&self, offset: u32, length: u32) -> Option<&[u8]> {
        if !self.has_block(offset) || length > self.len_of(offset / self.block_length) {
            return None;
        }
        let buffer = self.buffer.as_ref()?;
        let start = offset as usize;
        Some(&buffer[start..start + length as usize])
    }
}

impl Drop for Piece {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.return_piece_buffer(buffer);
        }
    }
}

impl fmt::Debug for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Piece")
            .field("index", &self.index)
            .field("length", &self.length)
            .field("received", &self.received)
            .field("block_count", &self.block_count)
            .field("finished", &self.finished)
            .finish()
    }
}
