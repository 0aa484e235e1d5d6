//! Disk storage for piece data.
//!
//! This module maps pieces onto the files of a torrent and reads, writes and
//! verifies them.
//!
//! # Overview
//!
//! Torrents split data into fixed-size pieces laid over the concatenation of
//! their files, so a piece may span several files and a file may span many
//! pieces. Files can be skipped; pieces lying only in skipped files are
//! ignored and pieces straddling a skipped file are partial.
//!
//! # Components
//!
//! - [`TorrentStorage`] - Per-torrent storage handler
//! - [`FileEntry`] - A file of the torrent and whether it is downloaded
//! - [`PieceFileSpan`] - The part of a file covered by a piece
//!
//! # Examples
//!
//! ```no_run
//! use blockwire::hash::Sha1Hash;
//! use blockwire::piece::PieceGeometry;
//! use blockwire::storage::{FileEntry, TorrentStorage};
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let files = FileEntry::sequence([
//!     (PathBuf::from("file1.txt"), 1000, true),
//!     (PathBuf::from("file2.txt"), 500, true),
//! ]);
//! let geometry = PieceGeometry::new(1500, 512, 512);
//!
//! let storage = TorrentStorage::new(
//!     PathBuf::from("./downloads"),
//!     files,
//!     geometry,
//!     vec![Sha1Hash::default(); 3],
//! )?;
//!
//! storage.preallocate().await?;
//! storage.put(0, &[0u8; 512]).await?;
//! let statuses = storage.verify().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! The storage layer validates file paths to prevent directory traversal
//! attacks. Paths containing `..` or absolute paths are rejected.

mod error;
mod file;
mod manager;

pub use error::StorageError;
pub use file::{FileEntry, PieceFileSpan};
pub use manager::TorrentStorage;

#[cfg(test)]
mod tests;
