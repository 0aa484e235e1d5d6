use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

use crate::constants::BUFFER_POOL_PIECES;

/// Reusable piece assembly buffers.
///
/// A buffer leaves the pool when a piece is checked out. It comes back when
/// the piece is discarded (corrupted, abandoned or reclaimed); a completed
/// piece freezes its buffer into the `Bytes` of the completion event and the
/// allocation is released once the last holder drops it.
pub struct BufferPool {
    piece_buffers: ArrayQueue<BytesMut>,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(BUFFER_POOL_PIECES)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            piece_buffers: ArrayQueue::new(capacity.max(1)),
        })
    }

    /// Returns a zero-filled buffer of exactly `size` bytes.
    pub fn get_piece_buffer(&self, size: usize) -> BytesMut {
        let mut buf = self
            .piece_buffers
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(size));
        buf.clear();
        buf.resize(size, 0);
        buf
    }

    pub fn return_piece_buffer(&self, mut buf: BytesMut) {
        buf.clear();
        let _ = self.piece_buffers.push(buf);
    }

    pub fn piece_buffers_available(&self) -> usize {
        self.piece_buffers.len()
    }
}
