/// Piece and block layout of a torrent's logical byte space.
///
/// Every piece is `piece_length` bytes except the last, which holds the
/// remainder. Pieces are split into blocks of `block_length` bytes, and the
/// final block of a piece holds that piece's remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceGeometry {
    total_length: u64,
    piece_length: u32,
    block_length: u32,
}

impl PieceGeometry {
    pub fn new(total_length: u64, piece_length: u32, block_length: u32) -> Self {
        debug_assert!(piece_length > 0 && block_length > 0);
        Self {
            total_length,
            piece_length: piece_length.max(1),
            block_length: block_length.clamp(1, piece_length.max(1)),
        }
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Nominal piece length; only the last piece may be shorter.
    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn block_length(&self) -> u32 {
        self.block_length
    }

    pub fn piece_count(&self) -> u32 {
        self.total_length.div_ceil(self.piece_length as u64) as u32
    }

    /// Byte offset of a piece in the torrent.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    /// Length of a piece, or 0 for an index past the end.
    pub fn piece_len(&self, index: u32) -> u32 {
        let start = self.piece_offset(index);
        if start >= self.total_length {
            return 0;
        }
        (self.total_length - start).min(self.piece_length as u64) as u32
    }

    pub fn block_count(&self, index: u32) -> u32 {
        self.piece_len(index).div_ceil(self.block_length)
    }

    /// Length of the block starting at `offset`, or 0 if out of range.
    pub fn block_len(&self, index: u32, offset: u32) -> u32 {
        self.piece_len(index)
            .saturating_sub(offset)
            .min(self.block_length)
    }

    /// Offsets of every block in a piece.
    pub fn block_offsets(&self, index: u32) -> impl Iterator<Item = u32> {
        let block_length = self.block_length;
        (0..self.block_count(index)).map(move |b| b * block_length)
    }

    /// Checks a delivered block against the exact block layout.
    pub fn is_valid_block(&self, index: u32, offset: u32, length: u32) -> bool {
        index < self.piece_count()
            && offset % self.block_length == 0
            && offset < self.piece_len(index)
            && length == self.block_len(index, offset)
    }

    /// Checks a block request: aligned, non-empty, at most one block long and
    /// inside the piece.
    pub fn is_valid_request(&self, index: u32, offset: u32, length: u32) -> bool {
        index < self.piece_count()
            && offset % self.block_length == 0
            && length > 0
            && length <= self.block_length
            && offset as u64 + length as u64 <= self.piece_len(index) as u64
    }
}
