use super::*;
use crate::config::Config;
use crate::hash::Sha1Hash;
use crate::storage::StorageError;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    completed: Mutex<Vec<(u32, Bytes)>>,
    corrupted: Mutex<Vec<u32>>,
}

impl PieceSink for RecordingSink {
    fn completed(&self, index: u32, data: Bytes) {
        self.completed.lock().push((index, data));
    }

    fn corrupted(&self, index: u32) {
        self.corrupted.lock().push(index);
    }
}

#[derive(Default)]
struct MapSource {
    pieces: HashMap<u32, Bytes>,
}

impl PieceSource for MapSource {
    fn read_piece(&self, index: u32) -> BoxFuture<'_, Result<Bytes, StorageError>> {
        let piece = self.pieces.get(&index).cloned();
        Box::pin(async move { piece.ok_or(StorageError::EmptyPiece(index)) })
    }
}

fn piece_data(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn new_piece(data: &[u8], block_length: u32, sink: Arc<RecordingSink>) -> Piece {
    Piece::new(
        3,
        Sha1Hash::digest(data),
        data.len() as u32,
        block_length,
        sink,
        BufferPool::new(),
    )
}

fn coordinator_with(
    piece_count: u32,
    present: usize,
) -> (Arc<PieceCoordinator>, tokio::sync::mpsc::UnboundedReceiver<PieceEvent>) {
    let geometry = PieceGeometry::new(piece_count as u64 * 32, 32, 16);
    let hashes = (0..piece_count)
        .map(|i| Sha1Hash::digest(&piece_data(32, i as u8)))
        .collect();
    let statuses = (0..piece_count as usize)
        .map(|i| {
            if i < present {
                PieceStatus::Present
            } else {
                PieceStatus::Missing
            }
        })
        .collect();
    PieceCoordinator::new(
        geometry,
        hashes,
        statuses,
        Arc::new(MapSource::default()),
        &Config::default(),
    )
    .unwrap()
}

fn fill(piece: &mut Piece, data: &[u8]) -> BlockOutcome {
    let mut outcome = BlockOutcome::Stored;
    for (offset, len) in piece.missing_blocks() {
        let start = offset as usize;
        outcome = piece
            .put_block(offset, &data[start..start + len as usize])
            .unwrap();
    }
    outcome
}

#[test]
fn test_geometry_last_piece_and_block() {
    let geometry = PieceGeometry::new(100_000, 16384, 4096);

    assert_eq!(geometry.piece_count(), 7);
    assert_eq!(geometry.piece_len(0), 16384);
    assert_eq!(geometry.piece_len(6), 1696);
    assert_eq!(geometry.piece_len(7), 0);
    assert_eq!(geometry.block_count(0), 4);
    assert_eq!(geometry.block_count(6), 1);
    assert_eq!(geometry.block_len(6, 0), 1696);
    assert_eq!(geometry.block_offsets(0).collect::<Vec<_>>(), vec![0, 4096, 8192, 12288]);
}

#[test]
fn test_geometry_block_validation() {
    let geometry = PieceGeometry::new(100_000, 16384, 4096);

    assert!(geometry.is_valid_block(0, 4096, 4096));
    assert!(geometry.is_valid_block(6, 0, 1696));
    assert!(!geometry.is_valid_block(6, 0, 4096));
    assert!(!geometry.is_valid_block(0, 100, 4096));
    assert!(!geometry.is_valid_block(7, 0, 4096));

    assert!(geometry.is_valid_request(0, 4096, 1000));
    assert!(geometry.is_valid_request(6, 0, 1696));
    assert!(!geometry.is_valid_request(6, 0, 1697));
    assert!(!geometry.is_valid_request(0, 0, 0));
    assert!(!geometry.is_valid_request(0, 0, 8192));
    assert!(!geometry.is_valid_request(0, 1, 10));
}

#[test]
fn test_put_block_is_idempotent() {
    let data = piece_data(100, 1);
    let sink = Arc::new(RecordingSink::default());
    let mut piece = new_piece(&data, 32, sink.clone());

    assert_eq!(piece.put_block(32, &data[32..64]).unwrap(), BlockOutcome::Stored);
    assert_eq!(piece.received_blocks(), 1);
    assert_eq!(piece.put_block(32, &data[32..64]).unwrap(), BlockOutcome::Duplicate);
    assert_eq!(piece.received_blocks(), 1);
    assert!(sink.completed.lock().is_empty());
}

#[test]
fn test_piece_completes_after_last_block() {
    let data = piece_data(100, 2);
    let sink = Arc::new(RecordingSink::default());
    let mut piece = new_piece(&data, 32, sink.clone());

    assert_eq!(piece.block_count(), 4);
    assert_eq!(piece.missing_blocks().last(), Some(&(96, 4)));

    piece.put_block(0, &data[0..32]).unwrap();
    piece.put_block(64, &data[64..96]).unwrap();
    piece.put_block(96, &data[96..100]).unwrap();
    assert!(!piece.is_finished());
    assert!(sink.completed.lock().is_empty());

    assert_eq!(piece.put_block(32, &data[32..64]).unwrap(), BlockOutcome::Completed);
    assert!(piece.is_finished());

    let completed = sink.completed.lock();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].0, 3);
    assert_eq!(completed[0].1.as_ref(), data.as_slice());
    assert!(sink.corrupted.lock().is_empty());
}

#[test]
fn test_piece_corrupted_exactly_once() {
    let data = piece_data(64, 3);
    let sink = Arc::new(RecordingSink::default());
    let mut piece = Piece::new(
        0,
        Sha1Hash::digest(b"something else"),
        64,
        32,
        sink.clone(),
        BufferPool::new(),
    );

    assert_eq!(fill(&mut piece, &data), BlockOutcome::Corrupted);
    assert!(matches!(
        piece.put_block(0, &data[0..32]),
        Err(PieceError::AlreadyFinished(0))
    ));

    assert_eq!(*sink.corrupted.lock(), vec![0]);
    assert!(sink.completed.lock().is_empty());
}

#[test]
fn test_put_after_completion_rejected() {
    let data = piece_data(64, 4);
    let sink = Arc::new(RecordingSink::default());
    let mut piece = new_piece(&data, 32, sink.clone());

    assert_eq!(fill(&mut piece, &data), BlockOutcome::Completed);
    assert!(piece.put_block(32, &data[32..64]).is_err());
    assert_eq!(sink.completed.lock().len(), 1);
}

#[test]
fn test_put_block_rejects_bad_geometry() {
    let data = piece_data(100, 5);
    let sink = Arc::new(RecordingSink::default());
    let mut piece = new_piece(&data, 32, sink);

    assert!(piece.put_block(5, &data[5..37]).is_err());
    assert!(piece.put_block(96, &data[64..96]).is_err());
    assert!(piece.put_block(128, &data[0..4]).is_err());
    assert_eq!(piece.received_blocks(), 0);
}

#[test]
fn test_get_block_serves_received_data() {
    let data = piece_data(100, 6);
    let sink = Arc::new(RecordingSink::default());
    let mut piece = new_piece(&data, 32, sink);

    assert!(piece.get_block(0, 32).is_none());
    piece.put_block(0, &data[0..32]).unwrap();
    assert_eq!(piece.get_block(0, 32), Some(&data[0..32]));
    assert_eq!(piece.get_block(0, 16), Some(&data[0..16]));
}

#[test]
fn test_unfinished_piece_returns_buffer() {
    let pool = BufferPool::new();
    let sink = Arc::new(RecordingSink::default());
    let piece = Piece::new(0, Sha1Hash::default(), 64, 32, sink, pool.clone());

    assert_eq!(pool.piece_buffers_available(), 0);
    drop(piece);
    assert_eq!(pool.piece_buffers_available(), 1);
}

#[test]
fn test_checkout_only_missing() {
    let (coordinator, _rx) = coordinator_with(10, 2);

    assert!(coordinator.check_out(0).unwrap().is_none());
    let piece = coordinator.check_out(5).unwrap().unwrap();
    assert_eq!(piece.index(), 5);
    assert_eq!(coordinator.status(5), Some(PieceStatus::CheckedOut));
    assert!(coordinator.check_out(5).unwrap().is_none());
    assert!(matches!(
        coordinator.check_out(10),
        Err(PieceError::InvalidPieceIndex(10))
    ));
}

#[test]
fn test_concurrent_checkout_single_winner() {
    let (coordinator, _rx) = coordinator_with(10, 0);

    let winners: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                scope.spawn(move || coordinator.check_out(4).unwrap().map(|_| 1).unwrap_or(0))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(winners, 1);
}

#[test]
fn test_endgame_threshold() {
    let (coordinator, _rx) = coordinator_with(20, 18);
    assert!(!coordinator.is_endgame());
    let _first = coordinator.check_out(19).unwrap().unwrap();
    assert!(coordinator.check_out(19).unwrap().is_none());
    assert_eq!(coordinator.candidates(|_| true), vec![18]);

    let (coordinator, _rx) = coordinator_with(20, 19);
    assert!(coordinator.is_endgame());
    let _first = coordinator.check_out(19).unwrap().unwrap();
    let second = coordinator.check_out(19).unwrap();
    assert!(second.is_some());
    assert_eq!(coordinator.candidates(|_| true), vec![19]);
    assert!(coordinator.candidates(|i| i != 19).is_empty());
}

#[test]
fn test_endgame_first_completion_wins() {
    let (coordinator, mut rx) = coordinator_with(20, 19);
    let data = piece_data(32, 19);

    let mut a = coordinator.check_out(19).unwrap().unwrap();
    let mut b = coordinator.check_out(19).unwrap().unwrap();

    assert_eq!(fill(&mut a, &data), BlockOutcome::Completed);
    assert_eq!(coordinator.present_count(), 20);
    assert!(coordinator.check_out(19).unwrap().is_none());

    // The losing copy still verifies but changes nothing.
    assert_eq!(fill(&mut b, &data), BlockOutcome::Completed);
    assert_eq!(coordinator.present_count(), 20);

    assert!(matches!(rx.try_recv(), Ok(PieceEvent::Completed { index: 19, .. })));
    assert!(rx.try_recv().is_err());
    assert!(coordinator.is_complete());
}

#[test]
fn test_completion_emits_event_and_have() {
    let (coordinator, mut rx) = coordinator_with(4, 0);
    let mut haves = coordinator.subscribe_have();
    let data = piece_data(32, 2);

    let mut piece = coordinator.check_out(2).unwrap().unwrap();
    assert_eq!(coordinator.checked_out_count(), 1);
    fill(&mut piece, &data);

    assert_eq!(coordinator.status(2), Some(PieceStatus::Present));
    assert_eq!(coordinator.checked_out_count(), 0);
    match rx.try_recv() {
        Ok(PieceEvent::Completed { index, data: bytes }) => {
            assert_eq!(index, 2);
            assert_eq!(bytes.as_ref(), data.as_slice());
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(haves.try_recv().unwrap(), 2);
    assert!(coordinator.bitfield().has_piece(2));
    assert!(!coordinator.bitfield().has_piece(1));
}

#[tokio::test(start_paused = true)]
async fn test_corruption_waits_for_sweep() {
    let (coordinator, mut rx) = coordinator_with(4, 0);
    let mut piece = coordinator.check_out(1).unwrap().unwrap();

    assert_eq!(fill(&mut piece, &piece_data(32, 99)), BlockOutcome::Corrupted);
    assert!(matches!(rx.try_recv(), Ok(PieceEvent::Corrupted { index: 1 })));

    // A corrupted piece keeps its checkout until the sweep reclaims it.
    assert_eq!(coordinator.status(1), Some(PieceStatus::CheckedOut));
    assert!(coordinator.check_out(1).unwrap().is_none());
    assert!(coordinator.reclaim_stalled().is_empty());

    tokio::time::advance(Duration::from_secs(121)).await;
    assert_eq!(coordinator.reclaim_stalled(), vec![1]);
    assert_eq!(coordinator.status(1), Some(PieceStatus::Missing));
    assert!(coordinator.check_out(1).unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_reclaims_only_expired_checkouts() {
    let (coordinator, _rx) = coordinator_with(4, 0);

    let _old = coordinator.check_out(0).unwrap().unwrap();
    tokio::time::advance(Duration::from_secs(60)).await;
    let _new = coordinator.check_out(1).unwrap().unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;

    assert_eq!(coordinator.reclaim_stalled(), vec![0]);
    assert_eq!(coordinator.status(0), Some(PieceStatus::Missing));
    assert_eq!(coordinator.status(1), Some(PieceStatus::CheckedOut));
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_task_runs_on_interval() {
    let (coordinator, _rx) = coordinator_with(4, 0);
    let sweeper = coordinator.spawn_sweeper(Duration::from_secs(10));

    let _piece = coordinator.check_out(3).unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(115)).await;
    assert_eq!(coordinator.status(3), Some(PieceStatus::CheckedOut));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(coordinator.status(3), Some(PieceStatus::Missing));

    sweeper.abort();
}

#[tokio::test]
async fn test_request_piece_serves_present_only() {
    let geometry = PieceGeometry::new(64, 32, 16);
    let mut source = MapSource::default();
    source.pieces.insert(0, Bytes::from(piece_data(32, 0)));

    let (coordinator, _rx) = PieceCoordinator::new(
        geometry,
        vec![Sha1Hash::default(); 2],
        vec![PieceStatus::Present, PieceStatus::Missing],
        Arc::new(source),
        &Config::default(),
    )
    .unwrap();

    assert_eq!(
        coordinator.request_piece(0).await.unwrap().as_ref(),
        piece_data(32, 0).as_slice()
    );
    assert!(matches!(
        coordinator.request_piece(1).await,
        Err(PieceError::NotPresent(1))
    ));
    assert!(matches!(
        coordinator.request_piece(2).await,
        Err(PieceError::InvalidPieceIndex(2))
    ));
}

#[test]
fn test_ignored_pieces_never_checked_out() {
    let geometry = PieceGeometry::new(96, 32, 32);
    let (coordinator, _rx) = PieceCoordinator::new(
        geometry,
        vec![Sha1Hash::default(); 3],
        vec![PieceStatus::Ignore, PieceStatus::Partial, PieceStatus::Missing],
        Arc::new(MapSource::default()),
        &Config::default(),
    )
    .unwrap();

    assert!(coordinator.check_out(0).unwrap().is_none());
    assert!(coordinator.check_out(1).unwrap().is_none());
    assert_eq!(coordinator.candidates(|_| true), vec![2]);
    assert!(!coordinator.is_complete());
}

#[test]
fn test_coordinator_rejects_mismatched_bitmap() {
    let geometry = PieceGeometry::new(96, 32, 32);
    let result = PieceCoordinator::new(
        geometry,
        vec![Sha1Hash::default(); 3],
        vec![PieceStatus::Missing; 2],
        Arc::new(MapSource::default()),
        &Config::default(),
    );
    assert!(matches!(
        result,
        Err(PieceError::LengthMismatch {
            expected: 3,
            actual: 2
        })
    ));
}
