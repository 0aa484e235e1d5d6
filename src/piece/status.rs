/// Local availability of one piece.
///
/// One entry per piece index forms the bitmap owned by the
/// [`PieceCoordinator`](super::PieceCoordinator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PieceStatus {
    /// Not on disk and not being downloaded.
    #[default]
    Missing,
    /// Reserved by a session that is downloading it.
    CheckedOut,
    /// Verified and on disk.
    Present,
    /// Straddles a downloaded file and a skipped one. Never downloaded.
    Partial,
    /// Lies entirely within skipped files. Never downloaded.
    Ignore,
}

impl PieceStatus {
    /// Returns true for pieces a session may still fetch.
    pub fn is_wanted(&self) -> bool {
        matches!(self, PieceStatus::Missing | PieceStatus::CheckedOut)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, PieceStatus::Present)
    }
}
