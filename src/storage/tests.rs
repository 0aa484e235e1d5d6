use super::*;
use crate::hash::Sha1Hash;
use crate::piece::{PieceEvent, PieceGeometry, PieceSource, PieceStatus};
use bytes::Bytes;
use std::path::PathBuf;
use tempfile::TempDir;

const TOTAL: usize = 100_000;
const PIECE_LENGTH: u32 = 16384;

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn piece_hashes(data: &[u8], piece_length: usize) -> Vec<Sha1Hash> {
    data.chunks(piece_length).map(Sha1Hash::digest).collect()
}

fn layout(sizes: &[(u64, bool)]) -> Vec<FileEntry> {
    FileEntry::sequence(
        sizes
            .iter()
            .enumerate()
            .map(|(i, &(len, download))| (PathBuf::from(format!("dir/file{}.dat", i)), len, download)),
    )
}

fn create_storage(temp: &TempDir, sizes: &[(u64, bool)], data: &[u8]) -> TorrentStorage {
    let total: u64 = sizes.iter().map(|(len, _)| len).sum();
    TorrentStorage::new(
        temp.path().to_path_buf(),
        layout(sizes),
        PieceGeometry::new(total, PIECE_LENGTH, PIECE_LENGTH),
        piece_hashes(data, PIECE_LENGTH as usize),
    )
    .expect("test storage creation")
}

fn write_files(temp: &TempDir, sizes: &[(u64, bool)], data: &[u8]) {
    let mut offset = 0usize;
    for (i, &(len, _)) in sizes.iter().enumerate() {
        let path = temp.path().join(format!("dir/file{}.dat", i));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, &data[offset..offset + len as usize]).unwrap();
        offset += len as usize;
    }
}

#[test]
fn test_segments_span_files() {
    let temp = TempDir::new().unwrap();
    let data = content(TOTAL);
    let storage = create_storage(&temp, &[(30_000, true), (45_000, true), (25_000, true)], &data);

    // Piece 1 covers [16384, 32768): the tail of file 0 and the head of file 1.
    let spans = storage.segments(1).unwrap();
    assert_eq!(
        spans,
        vec![
            PieceFileSpan {
                file_index: 0,
                file_offset: 16384,
                length: 13616,
                download: true,
            },
            PieceFileSpan {
                file_index: 1,
                file_offset: 0,
                length: 2768,
                download: true,
            },
        ]
    );

    // The last piece is short and lies inside file 2.
    let spans = storage.segments(6).unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].file_index, 2);
    assert_eq!(spans[0].file_offset, 98304 - 75000);
    assert_eq!(spans[0].length, 1696);

    assert!(matches!(
        storage.segments(7),
        Err(StorageError::InvalidPieceIndex(7))
    ));
}

#[test]
fn test_segments_skip_empty_files() {
    let temp = TempDir::new().unwrap();
    let data = content(TOTAL);
    let storage = create_storage(&temp, &[(50_000, true), (0, true), (50_000, true)], &data);

    let spans = storage.segments(3).unwrap();
    let files: Vec<usize> = spans.iter().map(|s| s.file_index).collect();
    assert_eq!(files, vec![0, 2]);
    assert_eq!(spans.iter().map(|s| s.length).sum::<u64>(), 16384);
}

#[tokio::test]
async fn test_preallocate() {
    let temp = TempDir::new().unwrap();
    let data = content(TOTAL);
    let storage = create_storage(&temp, &[(60_000, true), (40_000, false)], &data);

    storage.preallocate().await.unwrap();

    let metadata = tokio::fs::metadata(temp.path().join("dir/file0.dat")).await.unwrap();
    assert_eq!(metadata.len(), 60_000);
    assert!(!temp.path().join("dir/file1.dat").exists());
}

#[tokio::test]
async fn test_copy_pieces_between_storages_then_verify() {
    let sizes = [(30_000, true), (45_000, true), (25_000, true)];
    let data = content(TOTAL);

    let source_dir = TempDir::new().unwrap();
    write_files(&source_dir, &sizes, &data);
    let source = create_storage(&source_dir, &sizes, &data);
    assert!(source
        .verify()
        .await
        .unwrap()
        .iter()
        .all(|s| *s == PieceStatus::Present));

    let dest_dir = TempDir::new().unwrap();
    let dest = create_storage(&dest_dir, &sizes, &data);
    dest.preallocate().await.unwrap();
    assert!(dest
        .verify()
        .await
        .unwrap()
        .iter()
        .all(|s| *s == PieceStatus::Missing));

    for index in 0..source.piece_count() {
        let piece = source.get(index).await.unwrap();
        dest.put(index, &piece).await.unwrap();
    }

    let statuses = dest.verify().await.unwrap();
    assert_eq!(statuses.len(), 7);
    assert!(statuses.iter().all(|s| *s == PieceStatus::Present));

    let copied = std::fs::read(dest_dir.path().join("dir/file1.dat")).unwrap();
    assert_eq!(copied.as_slice(), &data[30_000..75_000]);
}

#[tokio::test]
async fn test_verify_classifies_skipped_files() {
    // Pieces: 0 in file0, 1 straddles file0/file1, 2-3 in file1,
    // 4 straddles file1/file2, 5-6 in file2.
    let sizes = [(30_000, true), (40_000, false), (30_000, true)];
    let data = content(TOTAL);
    let temp = TempDir::new().unwrap();
    write_files(&temp, &sizes, &data);
    let storage = create_storage(&temp, &sizes, &data);

    let statuses = storage.verify().await.unwrap();
    assert_eq!(
        statuses,
        vec![
            PieceStatus::Present,
            PieceStatus::Partial,
            PieceStatus::Ignore,
            PieceStatus::Ignore,
            PieceStatus::Partial,
            PieceStatus::Present,
            PieceStatus::Present,
        ]
    );
}

#[tokio::test]
async fn test_verify_detects_damaged_piece() {
    let sizes = [(TOTAL as u64, true)];
    let data = content(TOTAL);
    let temp = TempDir::new().unwrap();

    let mut damaged = data.clone();
    damaged[20_000] ^= 0xff;
    write_files(&temp, &sizes, &damaged);
    let storage = create_storage(&temp, &sizes, &data);

    let statuses = storage.verify().await.unwrap();
    assert_eq!(statuses[0], PieceStatus::Present);
    assert_eq!(statuses[1], PieceStatus::Missing);
    assert_eq!(statuses[2], PieceStatus::Present);
}

#[tokio::test]
async fn test_get_partial_piece_reads_downloaded_bytes_only() {
    let sizes = [(30_000, true), (40_000, false), (30_000, true)];
    let data = content(TOTAL);
    let temp = TempDir::new().unwrap();
    write_files(&temp, &sizes, &data);
    let storage = create_storage(&temp, &sizes, &data);

    let piece = storage.get(1).await.unwrap();
    assert_eq!(piece.as_ref(), &data[16384..30_000]);

    // A full piece does not fit the downloaded part of a partial one.
    let result = storage.put(1, &data[16384..32768]).await;
    assert!(matches!(
        result,
        Err(StorageError::LengthMismatch {
            piece: 1,
            expected: 13616,
            actual: 16384
        })
    ));
}

#[tokio::test]
async fn test_get_boundary_pieces() {
    let sizes = [(30_000, true), (40_000, false), (30_000, true)];
    let data = content(TOTAL);
    let temp = TempDir::new().unwrap();
    write_files(&temp, &sizes, &data);
    let storage = create_storage(&temp, &sizes, &data);

    // The short final piece still reads.
    let last = storage.get(6).await.unwrap();
    assert_eq!(last.len(), 1696);
    assert_eq!(last.as_ref(), &data[98304..]);

    // A piece with no downloaded bytes has nothing to read.
    assert!(matches!(storage.get(2).await, Err(StorageError::EmptyPiece(2))));
}

#[tokio::test]
async fn test_short_file_is_fatal() {
    let sizes = [(50_000, true), (50_000, true)];
    let data = content(TOTAL);
    let temp = TempDir::new().unwrap();
    write_files(&temp, &sizes, &data);
    std::fs::write(temp.path().join("dir/file1.dat"), &data[50_000..60_000]).unwrap();
    let storage = create_storage(&temp, &sizes, &data);

    assert!(storage.get(0).await.is_ok());
    assert!(matches!(
        storage.get(3).await,
        Err(StorageError::FileTooShort {
            required: 15536,
            actual: 10_000,
            ..
        })
    ));
    assert!(matches!(
        storage.put(5, &data[81920..98304]).await,
        Err(StorageError::FileTooShort { .. })
    ));
    assert!(storage.verify().await.is_err());
}

#[tokio::test]
async fn test_missing_file() {
    let sizes = [(TOTAL as u64, true)];
    let data = content(TOTAL);
    let temp = TempDir::new().unwrap();
    let storage = create_storage(&temp, &sizes, &data);

    assert!(matches!(storage.get(0).await, Err(StorageError::FileNotFound(_))));
}

#[test]
fn test_layout_validation() {
    let temp = TempDir::new().unwrap();
    let geometry = PieceGeometry::new(1000, 512, 512);
    let hashes = vec![Sha1Hash::default(); 2];

    let traversal = vec![FileEntry::new(PathBuf::from("../escape"), 1000, 0)];
    assert!(matches!(
        TorrentStorage::new(temp.path().to_path_buf(), traversal, geometry, hashes.clone()),
        Err(StorageError::PathTraversal(_))
    ));

    let short = vec![FileEntry::new(PathBuf::from("a"), 900, 0)];
    assert!(matches!(
        TorrentStorage::new(temp.path().to_path_buf(), short, geometry, hashes.clone()),
        Err(StorageError::InvalidLayout(_))
    ));

    let ok = vec![FileEntry::new(PathBuf::from("a"), 1000, 0)];
    assert!(matches!(
        TorrentStorage::new(temp.path().to_path_buf(), ok.clone(), geometry, vec![]),
        Err(StorageError::InvalidLayout(_))
    ));
    assert!(TorrentStorage::new(temp.path().to_path_buf(), ok, geometry, hashes).is_ok());
}

#[tokio::test]
async fn test_persist_writes_completed_pieces() {
    let sizes = [(TOTAL as u64, true)];
    let data = content(TOTAL);
    let temp = TempDir::new().unwrap();
    let storage = create_storage(&temp, &sizes, &data);
    storage.preallocate().await.unwrap();

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tx.send(PieceEvent::Corrupted { index: 0 }).unwrap();
    tx.send(PieceEvent::Completed {
        index: 2,
        data: Bytes::copy_from_slice(&data[32768..49152]),
    })
    .unwrap();
    drop(tx);

    storage.persist(rx).await.unwrap();

    let statuses = storage.verify().await.unwrap();
    assert_eq!(statuses[2], PieceStatus::Present);
    assert_eq!(statuses[0], PieceStatus::Missing);
    assert_eq!(storage.read_piece(2).await.unwrap().as_ref(), &data[32768..49152]);
}
