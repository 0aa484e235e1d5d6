use super::error::StorageError;
use super::file::{FileEntry, PieceFileSpan};
use crate::hash::Sha1Hash;
use crate::piece::{PieceEvent, PieceGeometry, PieceSource, PieceStatus};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex as TokioMutex};

fn validate_file_path(file_path: &Path) -> Result<(), StorageError> {
    for component in file_path.components() {
        match component {
            Component::ParentDir => {
                return Err(StorageError::PathTraversal(file_path.display().to_string()));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(file_path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_layout(files: &[FileEntry], geometry: &PieceGeometry) -> Result<(), StorageError> {
    let mut expected_offset = 0u64;
    for file in files {
        validate_file_path(&file.path)?;
        if file.offset != expected_offset {
            return Err(StorageError::InvalidLayout(format!(
                "{} starts at {}, expected {}",
                file.path.display(),
                file.offset,
                expected_offset
            )));
        }
        expected_offset += file.length;
    }

    if expected_offset != geometry.total_length() {
        return Err(StorageError::InvalidLayout(format!(
            "files hold {} bytes, torrent is {}",
            expected_offset,
            geometry.total_length()
        )));
    }
    Ok(())
}

/// Maps pieces onto the files of one torrent.
///
/// A piece covers every file whose byte range intersects the piece's range;
/// only files flagged for download are ever read or written. All file I/O
/// of a torrent goes through one lock, since sessions may touch overlapping
/// regions at the same time.
pub struct TorrentStorage {
    base_path: PathBuf,
    files: Vec<FileEntry>,
    geometry: PieceGeometry,
    hashes: Vec<Sha1Hash>,
    handles: TokioMutex<HashMap<usize, File>>,
}

impl TorrentStorage {
    pub fn new(
        base_path: PathBuf,
        files: Vec<FileEntry>,
        geometry: PieceGeometry,
        hashes: Vec<Sha1Hash>,
    ) -> Result<Self, StorageError> {
        validate_layout(&files, &geometry)?;

        if hashes.len() != geometry.piece_count() as usize {
            return Err(StorageError::InvalidLayout(format!(
                "{} piece hashes for {} pieces",
                hashes.len(),
                geometry.piece_count()
            )));
        }

        Ok(Self {
            base_path,
            files,
            geometry,
            hashes,
            handles: TokioMutex::new(HashMap::new()),
        })
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn geometry(&self) -> &PieceGeometry {
        &self.geometry
    }

    pub fn piece_count(&self) -> u32 {
        self.geometry.piece_count()
    }

    fn file_path(&self, file_index: usize) -> PathBuf {
        self.base_path.join(&self.files[file_index].path)
    }

    /// The `(file, offset, length)` segments a piece covers, in torrent
    /// order. Files outside the piece's range, including empty files, are
    /// skipped.
    pub fn segments(&self, piece_index: u32) -> Result<Vec<PieceFileSpan>, StorageError> {
        if piece_index >= self.piece_count() {
            return Err(StorageError::InvalidPieceIndex(piece_index));
        }

        let start = self.geometry.piece_offset(piece_index);
        let range = start..start + self.geometry.piece_length() as u64;

        Ok(self
            .files
            .iter()
            .enumerate()
            .filter_map(|(file_index, file)| {
                file.overlap(&range).map(|overlap| PieceFileSpan {
                    file_index,
                    file_offset: overlap.start - file.offset,
                    length: overlap.end - overlap.start,
                    download: file.download,
                })
            })
            .collect())
    }

    fn downloaded_segments(&self, piece_index: u32) -> Result<Vec<PieceFileSpan>, StorageError> {
        Ok(self
            .segments(piece_index)?
            .into_iter()
            .filter(|span| span.download)
            .collect())
    }

    /// Creates every downloaded file at its full length. Existing files are
    /// only ever grown.
    pub async fn preallocate(&self) -> Result<(), StorageError> {
        for (file_index, file) in self.files.iter().enumerate() {
            if !file.download {
                continue;
            }

            let path = self.file_path(file_index);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .await?;

            if f.metadata().await?.len() < file.length {
                f.set_len(file.length).await?;
            }
        }

        Ok(())
    }

    async fn open<'a>(
        &self,
        handles: &'a mut HashMap<usize, File>,
        file_index: usize,
    ) -> Result<&'a mut File, StorageError> {
        if !handles.contains_key(&file_index) {
            let path = self.file_path(file_index);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .await
                .map_err(|e| match e.kind() {
                    ErrorKind::NotFound => StorageError::FileNotFound(path.display().to_string()),
                    _ => StorageError::Io(e),
                })?;
            handles.insert(file_index, file);
        }

        handles
            .get_mut(&file_index)
            .ok_or_else(|| StorageError::FileNotFound(self.file_path(file_index).display().to_string()))
    }

    async fn ensure_len(
        &self,
        file: &File,
        file_index: usize,
        required: u64,
    ) -> Result<(), StorageError> {
        let actual = file.metadata().await?.len();
        if actual < required {
            return Err(StorageError::FileTooShort {
                path: self.file_path(file_index).display().to_string(),
                required,
                actual,
            });
        }
        Ok(())
    }

    /// Reads the downloaded bytes of a piece, concatenated in torrent order.
    pub async fn get(&self, piece_index: u32) -> Result<Bytes, StorageError> {
        let spans = self.downloaded_segments(piece_index)?;
        let total: u64 = spans.iter().map(|s| s.length).sum();
        if total == 0 {
            return Err(StorageError::EmptyPiece(piece_index));
        }

        let mut data = vec![0u8; total as usize];
        let mut data_offset = 0usize;
        let mut handles = self.handles.lock().await;

        for span in spans {
            let file = self.open(&mut handles, span.file_index).await?;
            self.ensure_len(file, span.file_index, span.file_offset + span.length)
                .await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let chunk = &mut data[data_offset..data_offset + span.length as usize];
            file.read_exact(chunk).await?;
            data_offset += span.length as usize;
        }

        Ok(Bytes::from(data))
    }

    /// Writes a piece's bytes into the downloaded files it covers.
    ///
    /// `data` must be exactly as long as the downloaded segments of the
    /// piece.
    pub async fn put(&self, piece_index: u32, data: &[u8]) -> Result<(), StorageError> {
        let spans = self.downloaded_segments(piece_index)?;
        let expected: u64 = spans.iter().map(|s| s.length).sum();
        if expected != data.len() as u64 {
            return Err(StorageError::LengthMismatch {
                piece: piece_index,
                expected,
                actual: data.len() as u64,
            });
        }

        let mut data_offset = 0usize;
        let mut handles = self.handles.lock().await;

        for span in spans {
            let file = self.open(&mut handles, span.file_index).await?;
            self.ensure_len(file, span.file_index, span.file_offset + span.length)
                .await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;

            let chunk = &data[data_offset..data_offset + span.length as usize];
            file.write_all(chunk).await?;
            data_offset += span.length as usize;
        }

        Ok(())
    }

    /// Classifies every piece by what is on disk.
    ///
    /// Pieces made only of downloaded files are hashed: `Present` if the
    /// hash matches, `Missing` otherwise. Pieces mixing downloaded and
    /// skipped files are `Partial`, pieces made only of skipped files are
    /// `Ignore`.
    pub async fn verify(&self) -> Result<Vec<PieceStatus>, StorageError> {
        let piece_count = self.piece_count();
        tracing::debug!("verifying {} pieces", piece_count);

        let mut statuses = Vec::with_capacity(piece_count as usize);
        let mut present = 0usize;

        for index in 0..piece_count {
            let spans = self.segments(index)?;
            let downloaded = spans.iter().any(|s| s.download);
            let skipped = spans.iter().any(|s| !s.download);

            let status = match (downloaded, skipped) {
                (true, false) => {
                    let data = self.get(index).await?;
                    let expected = self.hashes[index as usize];
                    let valid = tokio::task::spawn_blocking(move || expected.matches(&data))
                        .await
                        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
                    if valid {
                        present += 1;
                        PieceStatus::Present
                    } else {
                        PieceStatus::Missing
                    }
                }
                (true, true) => PieceStatus::Partial,
                (false, true) => PieceStatus::Ignore,
                (false, false) => {
                    return Err(StorageError::InvalidLayout(format!(
                        "piece {} covers no file",
                        index
                    )));
                }
            };
            statuses.push(status);
        }

        tracing::debug!(
            "verification complete: {}/{} pieces valid",
            present,
            piece_count
        );

        Ok(statuses)
    }

    /// Writes completed pieces to disk until the event channel closes.
    ///
    /// Stops at the first persistence error, which fails the transfer.
    pub async fn persist(
        &self,
        mut events: mpsc::UnboundedReceiver<PieceEvent>,
    ) -> Result<(), StorageError> {
        while let Some(event) = events.recv().await {
            match event {
                PieceEvent::Completed { index, data } => {
                    self.put(index, &data).await?;
                    tracing::trace!("persisted piece {}", index);
                }
                PieceEvent::Corrupted { index } => {
                    tracing::trace!("piece {} corrupted, nothing to persist", index);
                }
            }
        }
        self.flush().await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        let handles = self.handles.lock().await;
        for file in handles.values() {
            file.sync_data().await?;
        }
        Ok(())
    }
}

impl PieceSource for TorrentStorage {
    fn read_piece(&self, index: u32) -> BoxFuture<'_, Result<Bytes, StorageError>> {
        Box::pin(self.get(index))
    }
}
