use std::ops::Range;
use std::path::PathBuf;

/// A file of the torrent and its place in the torrent's byte space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the storage base directory.
    pub path: PathBuf,
    pub length: u64,
    /// Offset of the file's first byte in the torrent.
    pub offset: u64,
    /// Whether the user wants this file. Skipped files are never read or
    /// written.
    pub download: bool,
}

/// The part of one file covered by a piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceFileSpan {
    pub file_index: usize,
    pub file_offset: u64,
    pub length: u64,
    pub download: bool,
}

impl FileEntry {
    pub fn new(path: PathBuf, length: u64, offset: u64) -> Self {
        Self {
            path,
            length,
            offset,
            download: true,
        }
    }

    pub fn with_download(mut self, download: bool) -> Self {
        self.download = download;
        self
    }

    /// Lays files out back to back, in order, from offset 0.
    pub fn sequence<I>(files: I) -> Vec<Self>
    where
        I: IntoIterator<Item = (PathBuf, u64, bool)>,
    {
        let mut offset = 0u64;
        files
            .into_iter()
            .map(|(path, length, download)| {
                let entry = Self::new(path, length, offset).with_download(download);
                offset += length;
                entry
            })
            .collect()
    }

    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.offset + self.length
    }

    /// The intersection of this file with a range of the torrent, if any.
    pub fn overlap(&self, range: &Range<u64>) -> Option<Range<u64>> {
        let start = range.start.max(self.offset);
        let end = range.end.min(self.offset + self.length);
        (start < end).then_some(start..end)
    }
}
