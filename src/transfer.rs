//! Single-torrent wiring.
//!
//! A [`Transfer`] ties storage, the piece coordinator and the peer sessions
//! of one torrent together: it verifies what is already on disk, persists
//! completed pieces, sweeps stalled checkouts and shares one bandwidth
//! limiter between all of its sessions.
//!
//! # Examples
//!
//! ```no_run
//! use blockwire::peer::{Direction, PeerId};
//! use blockwire::transfer::{TorrentLayout, Transfer};
//! use blockwire::Config;
//! use std::path::PathBuf;
//! use tokio::net::TcpStream;
//!
//! # async fn example(layout: TorrentLayout) -> Result<(), Box<dyn std::error::Error>> {
//! let transfer = Transfer::open(
//!     PathBuf::from("./downloads"),
//!     layout,
//!     Config::default().with_download_limit(1024 * 1024),
//!     PeerId::random(),
//! )
//! .await?;
//!
//! let addr = "192.168.1.100:6881".parse()?;
//! let stream = TcpStream::connect(addr).await?;
//! transfer.add_peer(stream, addr, Direction::Outbound)?;
//!
//! let progress = transfer.progress();
//! println!("{}/{} pieces", progress.present, progress.total_pieces);
//!
//! transfer.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::TransferError;

use crate::bandwidth::BandwidthLimiter;
use crate::config::Config;
use crate::hash::{InfoHash, Sha1Hash};
use crate::peer::{Direction, PeerId, PeerSession, SessionContext, SessionEvent};
use crate::piece::{PieceCoordinator, PieceGeometry};
use crate::storage::{FileEntry, StorageError, TorrentStorage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

/// What a transfer needs to know about its torrent.
#[derive(Debug, Clone)]
pub struct TorrentLayout {
    pub info_hash: InfoHash,
    pub piece_length: u32,
    pub piece_hashes: Vec<Sha1Hash>,
    pub files: Vec<FileEntry>,
}

impl TorrentLayout {
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }
}

/// A snapshot of a transfer's state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub total_pieces: u32,
    pub present: usize,
    pub checked_out: usize,
    pub complete: bool,
    pub endgame: bool,
    pub peers: usize,
    /// Wire bytes over the sessions currently connected.
    pub uploaded: u64,
    pub downloaded: u64,
}

type Sessions = Arc<Mutex<HashMap<SocketAddr, PeerSession>>>;

pub struct Transfer {
    ctx: Arc<SessionContext>,
    storage: Arc<TorrentStorage>,
    sessions: Sessions,
    failed: Arc<AtomicBool>,
    sweeper: JoinHandle<()>,
    persistence: JoinHandle<Result<(), StorageError>>,
}

impl Transfer {
    /// Opens the torrent under `base_path`.
    ///
    /// Downloaded files are created at full length and every piece is
    /// verified before the first peer is added.
    pub async fn open(
        base_path: PathBuf,
        layout: TorrentLayout,
        config: Config,
        local_id: PeerId,
    ) -> Result<Self, TransferError> {
        let geometry = PieceGeometry::new(
            layout.total_length(),
            layout.piece_length,
            config.block_length,
        );
        let storage = Arc::new(TorrentStorage::new(
            base_path,
            layout.files,
            geometry,
            layout.piece_hashes.clone(),
        )?);

        storage.preallocate().await?;
        let statuses = storage.verify().await?;

        let (coordinator, events) = PieceCoordinator::new(
            geometry,
            layout.piece_hashes,
            statuses,
            storage.clone(),
            &config,
        )?;
        let sweeper = coordinator.spawn_sweeper(config.sweep_interval);

        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
        let failed = Arc::new(AtomicBool::new(false));

        let persistence = tokio::spawn({
            let storage = storage.clone();
            let sessions = sessions.clone();
            let failed = failed.clone();
            async move {
                let result = storage.persist(events).await;
                if let Err(e) = &result {
                    tracing::warn!("persisting pieces failed, stopping transfer: {}", e);
                    failed.store(true, Ordering::SeqCst);
                    for session in sessions.lock().values() {
                        session.dispose();
                    }
                }
                result
            }
        });

        tracing::info!(
            info_hash = %layout.info_hash,
            present = coordinator.present_count(),
            pieces = coordinator.piece_count(),
            "transfer opened"
        );

        let ctx = Arc::new(SessionContext {
            info_hash: layout.info_hash,
            local_id,
            coordinator,
            limiter: Arc::new(BandwidthLimiter::from_config(&config)),
            config,
        });

        Ok(Self {
            ctx,
            storage,
            sessions,
            failed,
            sweeper,
            persistence,
        })
    }

    pub fn info_hash(&self) -> InfoHash {
        self.ctx.info_hash
    }

    pub fn local_id(&self) -> PeerId {
        self.ctx.local_id
    }

    pub fn storage(&self) -> &TorrentStorage {
        &self.storage
    }

    /// Starts a session with the peer on the other end of `stream`.
    ///
    /// A session already open for `addr` is replaced.
    pub fn add_peer<S>(
        &self,
        stream: S,
        addr: SocketAddr,
        direction: Direction,
    ) -> Result<(), TransferError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.failed.load(Ordering::SeqCst) {
            return Err(TransferError::Failed);
        }

        let (session, mut events) = PeerSession::start(stream, addr, direction, self.ctx.clone());
        if let Some(previous) = self.sessions.lock().insert(addr, session) {
            tracing::debug!(addr = %addr, "replacing peer session");
            previous.dispose();
        }

        let sessions = Arc::downgrade(&self.sessions);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::CommunicationError { error, fatal } => {
                        tracing::trace!(addr = %addr, fatal, "session reported: {}", error);
                    }
                    SessionEvent::Closed => break,
                }
            }

            if let Some(sessions) = sessions.upgrade() {
                let mut sessions = sessions.lock();
                if sessions.get(&addr).is_some_and(|s| s.is_disposed()) {
                    sessions.remove(&addr);
                }
            }
        });

        Ok(())
    }

    pub fn peer_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn progress(&self) -> Progress {
        let coordinator = &self.ctx.coordinator;
        let sessions = self.sessions.lock();
        let (uploaded, downloaded) = sessions
            .values()
            .map(|s| s.traffic())
            .fold((0, 0), |(up, down), t| (up + t.uploaded, down + t.downloaded));

        Progress {
            total_pieces: coordinator.piece_count(),
            present: coordinator.present_count(),
            checked_out: coordinator.checked_out_count(),
            complete: coordinator.is_complete(),
            endgame: coordinator.is_endgame(),
            peers: sessions.len(),
            uploaded,
            downloaded,
        }
    }

    /// Stops every session, then waits until completed pieces are on disk.
    ///
    /// Returns the persistence error that failed the transfer, if any.
    pub async fn shutdown(self) -> Result<(), TransferError> {
        let sessions: Vec<PeerSession> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        futures::future::join_all(sessions.into_iter().map(PeerSession::join)).await;
        self.sweeper.abort();

        let Transfer {
            ctx, persistence, ..
        } = self;
        let info_hash = ctx.info_hash;
        // The coordinator holds the sending end of the completion channel.
        drop(ctx);
        persistence.await??;

        tracing::info!(info_hash = %info_hash, "transfer shut down");
        Ok(())
    }
}
