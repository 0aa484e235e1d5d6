use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::assembler::{Piece, PieceSink};
use super::buffer_pool::BufferPool;
use super::error::PieceError;
use super::geometry::PieceGeometry;
use super::status::PieceStatus;
use crate::config::Config;
use crate::hash::Sha1Hash;
use crate::peer::Bitfield;
use crate::storage::StorageError;

const HAVE_CHANNEL_CAPACITY: usize = 1024;

/// Supplies the bytes of a present piece when a peer requests it.
pub trait PieceSource: Send + Sync {
    fn read_piece(&self, index: u32) -> BoxFuture<'_, Result<Bytes, StorageError>>;
}

/// Outcome of a piece, emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum PieceEvent {
    /// The piece verified and is now `Present`. `data` must be persisted.
    Completed { index: u32, data: Bytes },
    /// The piece failed verification and was discarded.
    Corrupted { index: u32 },
}

struct CoordinatorState {
    statuses: Vec<PieceStatus>,
    checkouts: HashMap<u32, Instant>,
    present: usize,
}

impl CoordinatorState {
    fn is_endgame(&self, threshold: f64) -> bool {
        let total = self.statuses.len();
        total > 0 && self.present as f64 / total as f64 >= threshold
    }
}

/// Owns the local piece bitmap and hands pieces out to sessions.
///
/// A piece is checked out by at most one session at a time until end-game,
/// when pieces already checked out may be checked out again and the first
/// completion wins. Checkouts that are not completed within the checkout
/// timeout are reclaimed by [`reclaim_stalled`](Self::reclaim_stalled).
///
/// The bitmap and checkout records live behind a single lock and are
/// always mutated together.
pub struct PieceCoordinator {
    geometry: PieceGeometry,
    hashes: Vec<Sha1Hash>,
    state: Mutex<CoordinatorState>,
    checkout_timeout: Duration,
    endgame_threshold: f64,
    pool: Arc<BufferPool>,
    source: Arc<dyn PieceSource>,
    events: mpsc::UnboundedSender<PieceEvent>,
    haves: broadcast::Sender<u32>,
}

impl PieceCoordinator {
    /// Creates a coordinator from an initial bitmap, usually the result of
    /// [`TorrentStorage::verify`](crate::storage::TorrentStorage::verify).
    ///
    /// Returns the receiving end of the piece event channel alongside it.
    pub fn new(
        geometry: PieceGeometry,
        hashes: Vec<Sha1Hash>,
        mut statuses: Vec<PieceStatus>,
        source: Arc<dyn PieceSource>,
        config: &Config,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PieceEvent>), PieceError> {
        let expected = geometry.piece_count() as usize;
        if hashes.len() != expected {
            return Err(PieceError::LengthMismatch {
                expected,
                actual: hashes.len(),
            });
        }
        if statuses.len() != expected {
            return Err(PieceError::LengthMismatch {
                expected,
                actual: statuses.len(),
            });
        }

        for status in statuses.iter_mut() {
            if *status == PieceStatus::CheckedOut {
                *status = PieceStatus::Missing;
            }
        }
        let present = statuses.iter().filter(|s| s.is_present()).count();

        let (events, rx) = mpsc::unbounded_channel();
        let (haves, _) = broadcast::channel(HAVE_CHANNEL_CAPACITY);

        let coordinator = Arc::new(Self {
            geometry,
            hashes,
            state: Mutex::new(CoordinatorState {
                statuses,
                checkouts: HashMap::new(),
                present,
            }),
            checkout_timeout: config.checkout_timeout,
            endgame_threshold: config.endgame_threshold,
            pool: BufferPool::new(),
            source,
            events,
            haves,
        });

        Ok((coordinator, rx))
    }

    pub fn geometry(&self) -> &PieceGeometry {
        &self.geometry
    }

    pub fn piece_count(&self) -> u32 {
        self.geometry.piece_count()
    }

    pub fn hash(&self, index: u32) -> Option<Sha1Hash> {
        self.hashes.get(index as usize).copied()
    }

    pub fn status(&self, index: u32) -> Option<PieceStatus> {
        self.state.lock().statuses.get(index as usize).copied()
    }

    pub fn statuses(&self) -> Vec<PieceStatus> {
        self.state.lock().statuses.clone()
    }

    pub fn present_count(&self) -> usize {
        self.state.lock().present
    }

    pub fn checked_out_count(&self) -> usize {
        self.state.lock().checkouts.len()
    }

    /// True once nothing wanted remains missing.
    pub fn is_complete(&self) -> bool {
        !self.state.lock().statuses.iter().any(|s| s.is_wanted())
    }

    /// End-game starts once `present / total` reaches the threshold.
    pub fn is_endgame(&self) -> bool {
        self.state.lock().is_endgame(self.endgame_threshold)
    }

    /// Local availability packed for a `Bitfield` message.
    pub fn bitfield(&self) -> Bitfield {
        let state = self.state.lock();
        let mut bitfield = Bitfield::new(state.statuses.len());
        for (i, status) in state.statuses.iter().enumerate() {
            if status.is_present() {
                bitfield.set_piece(i);
            }
        }
        bitfield
    }

    /// Indices that could be checked out right now and satisfy `has`, in
    /// ascending order.
    pub fn candidates(&self, has: impl Fn(u32) -> bool) -> Vec<u32> {
        let state = self.state.lock();
        let endgame = state.is_endgame(self.endgame_threshold);
        state
            .statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| match status {
                PieceStatus::Missing => true,
                PieceStatus::CheckedOut => endgame,
                _ => false,
            })
            .map(|(i, _)| i as u32)
            .filter(|&i| has(i))
            .collect()
    }

    /// Reserves a piece for download.
    ///
    /// Returns `Ok(None)` if the piece is not `Missing`, except that during
    /// end-game a `CheckedOut` piece may be checked out again.
    pub fn check_out(self: &Arc<Self>, index: u32) -> Result<Option<Piece>, PieceError> {
        if index >= self.piece_count() {
            return Err(PieceError::InvalidPieceIndex(index));
        }

        {
            let mut state = self.state.lock();
            let endgame = state.is_endgame(self.endgame_threshold);
            match state.statuses[index as usize] {
                PieceStatus::Missing => {}
                PieceStatus::CheckedOut if endgame => {}
                _ => return Ok(None),
            }
            state.statuses[index as usize] = PieceStatus::CheckedOut;
            state.checkouts.insert(index, Instant::now());
        }

        tracing::debug!("checked out piece {}", index);

        let sink: Arc<dyn PieceSink> = self.clone();
        Ok(Some(Piece::new(
            index,
            self.hashes[index as usize],
            self.geometry.piece_len(index),
            self.geometry.block_length(),
            sink,
            self.pool.clone(),
        )))
    }

    /// One sweep pass: checkouts older than the checkout timeout revert to
    /// `Missing`. Returns the reclaimed indices.
    pub fn reclaim_stalled(&self) -> Vec<u32> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let stalled: Vec<u32> = state
            .checkouts
            .iter()
            .filter(|(_, at)| now.duration_since(**at) > self.checkout_timeout)
            .map(|(index, _)| *index)
            .collect();

        for index in &stalled {
            state.checkouts.remove(index);
            let status = &mut state.statuses[*index as usize];
            if *status == PieceStatus::CheckedOut {
                *status = PieceStatus::Missing;
            }
        }
        drop(state);

        if !stalled.is_empty() {
            tracing::debug!("reclaimed {} stalled checkouts: {:?}", stalled.len(), stalled);
        }
        stalled
    }

    /// Runs [`reclaim_stalled`](Self::reclaim_stalled) every `interval`
    /// until the coordinator is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.reclaim_stalled();
            }
        })
    }

    /// Reads a present piece through the piece source to serve an upload.
    pub async fn request_piece(&self, index: u32) -> Result<Bytes, PieceError> {
        match self.status(index) {
            Some(PieceStatus::Present) => Ok(self.source.read_piece(index).await?),
            Some(_) => Err(PieceError::NotPresent(index)),
            None => Err(PieceError::InvalidPieceIndex(index)),
        }
    }

    /// Completed piece indices, for `Have` announcements. A lagging receiver
    /// loses announcements, never pieces.
    pub fn subscribe_have(&self) -> broadcast::Receiver<u32> {
        self.haves.subscribe()
    }
}

impl PieceSink for PieceCoordinator {
    fn completed(&self, index: u32, data: Bytes) {
        {
            let mut state = self.state.lock();
            let Some(status) = state.statuses.get_mut(index as usize) else {
                return;
            };
            match *status {
                PieceStatus::Missing | PieceStatus::CheckedOut => {
                    *status = PieceStatus::Present;
                    state.present += 1;
                    state.checkouts.remove(&index);
                }
                PieceStatus::Present => {
                    tracing::debug!("piece {} already present, dropping duplicate", index);
                    return;
                }
                PieceStatus::Partial | PieceStatus::Ignore => {
                    tracing::warn!("completed piece {} is not wanted, dropping", index);
                    return;
                }
            }
        }

        tracing::info!("piece {} complete ({} bytes)", index, data.len());
        let _ = self.events.send(PieceEvent::Completed { index, data });
        let _ = self.haves.send(index);
    }

    fn corrupted(&self, index: u32) {
        // The status stays as it is; the sweep makes the piece available
        // again once its checkout expires.
        tracing::warn!("piece {} failed hash verification", index);
        let _ = self.events.send(PieceEvent::Corrupted { index });
    }
}
