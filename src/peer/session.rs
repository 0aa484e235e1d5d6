use super::bitfield::Bitfield;
use super::block::{Block, BlockRequest};
use super::error::PeerError;
use super::framer::{Frame, FrameReader, FrameWriter};
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::state::{HandshakeReply, HandshakeState, LeechingState, SeedingState};
use super::traffic::{TrafficSnapshot, TrafficStats};
use crate::bandwidth::BandwidthLimiter;
use crate::config::Config;
use crate::hash::InfoHash;
use crate::piece::{BlockOutcome, Piece, PieceCoordinator, PieceError, PieceStatus};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialed out and send the first handshake.
    Outbound,
    /// The remote dialed in. `peer_id` is set when an acceptor already
    /// read the remote handshake off the stream.
    Inbound { peer_id: Option<PeerId> },
}

/// Reported by a session on its event channel.
#[derive(Debug)]
pub enum SessionEvent {
    CommunicationError { error: PeerError, fatal: bool },
    Closed,
}

/// What every session of one torrent shares.
pub struct SessionContext {
    pub info_hash: InfoHash,
    pub local_id: PeerId,
    pub coordinator: Arc<PieceCoordinator>,
    pub limiter: Arc<BandwidthLimiter>,
    pub config: Config,
}

impl SessionContext {
    fn handshake(&self) -> Handshake {
        Handshake::new(self.info_hash, self.local_id)
    }

    fn bitfield(&self) -> Message {
        Message::Bitfield(self.coordinator.bitfield().to_bytes())
    }
}

struct SessionState {
    handshake: HandshakeState,
    seeding: SeedingState,
    leeching: LeechingState,
    remote_id: Option<PeerId>,
    remote_fast: bool,
    remote_extension: bool,
    remote_bitfield: Bitfield,
    am_choking: bool,
    am_interested: bool,
    requests: VecDeque<BlockRequest>,
    blocks: VecDeque<Block>,
    rerequest: bool,
    last_received: Instant,
    last_sent: Instant,
}

impl SessionState {
    fn new(piece_count: usize) -> Self {
        let now = Instant::now();
        Self {
            handshake: HandshakeState::None,
            seeding: SeedingState::Choked,
            leeching: LeechingState::Uninterested,
            remote_id: None,
            remote_fast: false,
            remote_extension: false,
            remote_bitfield: Bitfield::new(piece_count),
            am_choking: true,
            am_interested: false,
            requests: VecDeque::new(),
            blocks: VecDeque::new(),
            rerequest: false,
            last_received: now,
            last_sent: now,
        }
    }
}

struct Shared {
    addr: SocketAddr,
    ctx: Arc<SessionContext>,
    state: Mutex<SessionState>,
    traffic: Mutex<TrafficStats>,
    outbound: mpsc::UnboundedSender<Frame>,
    events: mpsc::UnboundedSender<SessionEvent>,
    disposed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// One connection to a remote peer.
///
/// A session runs five tasks: a reader that validates incoming frames and
/// updates the protocol state, a writer that batches queued frames onto the
/// socket, and download, upload and keep-alive loops that poll the shared
/// state on their own cadence. Disposal is cooperative: every task stops at
/// its next poll.
///
/// Dropping the session disposes it.
pub struct PeerSession {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerSession {
    /// Starts a session over `stream`.
    ///
    /// Outbound sessions send their handshake right away. Inbound sessions
    /// with a known peer id skip straight to the connected state; without
    /// one they wait for the remote handshake.
    pub fn start<S>(
        stream: S,
        addr: SocketAddr,
        direction: Direction,
        ctx: Arc<SessionContext>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let mut state = SessionState::new(ctx.coordinator.piece_count() as usize);
        let mut reader = FrameReader::new(read_half, ctx.limiter.clone());
        let writer = FrameWriter::new(write_half, ctx.limiter.clone());

        match direction {
            Direction::Outbound => {
                let _ = outbound.send(ctx.handshake().into());
                state.handshake = state.handshake.on_sent();
            }
            Direction::Inbound {
                peer_id: Some(peer_id),
            } => {
                let _ = outbound.send(ctx.handshake().into());
                let _ = outbound.send(ctx.bitfield().into());
                state.remote_id = Some(peer_id);
                state.handshake = HandshakeState::SendAndReceived;
                reader = reader.without_handshake();
            }
            Direction::Inbound { peer_id: None } => {}
        }

        let shared = Arc::new(Shared {
            addr,
            ctx,
            state: Mutex::new(state),
            traffic: Mutex::new(TrafficStats::new()),
            outbound,
            events,
            disposed: AtomicBool::new(false),
            shutdown,
        });

        tracing::info!(addr = %addr, ?direction, "peer session started");

        let tasks = vec![
            tokio::spawn(read_loop(shared.clone(), reader)),
            tokio::spawn(send_loop(shared.clone(), writer, outbound_rx)),
            tokio::spawn(download_loop(shared.clone())),
            tokio::spawn(upload_loop(shared.clone())),
            tokio::spawn(keepalive_loop(shared.clone())),
        ];

        (Self { shared, tasks }, events_rx)
    }

    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.shared.state.lock().handshake
    }

    pub fn seeding_state(&self) -> SeedingState {
        self.shared.state.lock().seeding
    }

    pub fn leeching_state(&self) -> LeechingState {
        self.shared.state.lock().leeching
    }

    pub fn remote_peer_id(&self) -> Option<PeerId> {
        self.shared.state.lock().remote_id
    }

    /// Whether the remote handshake set the fast-peer and extension bits.
    pub fn remote_supports(&self) -> (bool, bool) {
        let state = self.shared.state.lock();
        (state.remote_fast, state.remote_extension)
    }

    pub fn remote_bitfield(&self) -> Bitfield {
        self.shared.state.lock().remote_bitfield.clone()
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        self.shared.traffic.lock().snapshot()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Asks every task to stop at its next poll.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    /// Disposes the session and waits for its tasks.
    pub async fn join(mut self) {
        self.shared.dispose();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl Shared {
    fn queue(&self, frame: impl Into<Frame>) {
        // A closed queue means the writer already stopped.
        let _ = self.outbound.send(frame.into());
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);
        tracing::info!(addr = %self.addr, "peer session closed");
        self.emit(SessionEvent::Closed);
    }

    /// Reports `error`; fatal errors end the session.
    fn fail(&self, error: PeerError) {
        let fatal = error.is_fatal();
        tracing::warn!(addr = %self.addr, fatal, "peer communication error: {}", error);
        self.emit(SessionEvent::CommunicationError { error, fatal });
        if fatal {
            self.dispose();
        }
    }

    fn receive(&self, frame: Frame) -> Result<(), PeerError> {
        let mut state = self.state.lock();
        state.last_received = Instant::now();

        match frame {
            Frame::Handshake(handshake) => self.on_handshake(&mut state, handshake),
            Frame::Message(message) => {
                if !state.handshake.is_complete() {
                    return Err(PeerError::Protocol(format!(
                        "{} before handshake",
                        message.name()
                    )));
                }
                self.on_message(&mut state, message)
            }
        }
    }

    fn on_handshake(&self, state: &mut SessionState, handshake: Handshake) -> Result<(), PeerError> {
        let (next, reply) = state.handshake.on_receive()?;

        if !handshake.has_standard_protocol() {
            return Err(PeerError::InvalidHandshake(format!(
                "unknown protocol {:?}",
                String::from_utf8_lossy(&handshake.protocol)
            )));
        }
        if handshake.info_hash != self.ctx.info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        if handshake.peer_id == self.ctx.local_id {
            return Err(PeerError::OwnPeerId);
        }

        state.remote_id = Some(handshake.peer_id);
        state.remote_fast = handshake.supports_fast_peer();
        state.remote_extension = handshake.supports_extension_protocol();

        match reply {
            HandshakeReply::HandshakeAndBitfield => {
                self.queue(self.ctx.handshake());
                self.queue(self.ctx.bitfield());
            }
            HandshakeReply::Bitfield => self.queue(self.ctx.bitfield()),
        }
        state.handshake = next.on_sent();

        tracing::debug!(
            addr = %self.addr,
            peer_id = ?handshake.peer_id,
            "handshake complete"
        );
        Ok(())
    }

    fn on_message(&self, state: &mut SessionState, message: Message) -> Result<(), PeerError> {
        let coordinator = &self.ctx.coordinator;
        let geometry = coordinator.geometry();
        let piece_count = coordinator.piece_count();

        tracing::trace!(addr = %self.addr, "received {}", message.name());

        match message {
            Message::KeepAlive | Message::Port(_) => {}
            Message::Choke => {
                state.seeding = SeedingState::Choked;
                // Outstanding requests are void once choked.
                state.rerequest = true;
            }
            Message::Unchoke => state.seeding = SeedingState::Unchoked,
            Message::Interested => state.leeching = LeechingState::Interested,
            Message::NotInterested => state.leeching = LeechingState::Uninterested,
            Message::Have { piece } => {
                if piece >= piece_count {
                    return Err(PeerError::Validation(format!(
                        "have for piece {} of {}",
                        piece, piece_count
                    )));
                }
                state.remote_bitfield.set_piece(piece as usize);
            }
            Message::Bitfield(bits) => {
                let expected = Bitfield::wire_len(piece_count as usize);
                if bits.len() < expected {
                    return Err(PeerError::Protocol(format!(
                        "bitfield of {} bytes, expected {}",
                        bits.len(),
                        expected
                    )));
                }
                state.remote_bitfield = Bitfield::from_bytes(&bits, piece_count as usize);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                if !geometry.is_valid_request(index, begin, length) {
                    return Err(PeerError::Validation(format!(
                        "request {}:{}+{}",
                        index, begin, length
                    )));
                }
                let request = BlockRequest::new(index, begin, length);
                if !state.requests.contains(&request) {
                    state.requests.push_back(request);
                }
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                if !geometry.is_valid_request(index, begin, length) {
                    return Err(PeerError::Validation(format!(
                        "cancel {}:{}+{}",
                        index, begin, length
                    )));
                }
                let request = BlockRequest::new(index, begin, length);
                state.requests.retain(|r| *r != request);
            }
            Message::Piece { index, begin, data } => {
                if !geometry.is_valid_block(index, begin, data.len() as u32) {
                    return Err(PeerError::Validation(format!(
                        "block {}:{}+{}",
                        index,
                        begin,
                        data.len()
                    )));
                }
                state.blocks.push_back(Block::new(index, begin, data));
            }
        }
        Ok(())
    }
}

/// Sleeps for `period`. Returns false once the session is shutting down.
async fn pause(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let stopped = tokio::select! {
        _ = tokio::time::sleep(period) => false,
        _ = shutdown.changed() => true,
    };
    !stopped && !*shutdown.borrow()
}

async fn read_loop<R>(shared: Arc<Shared>, mut reader: FrameReader<R>)
where
    R: AsyncRead + Unpin,
{
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let frame = tokio::select! {
            frame = reader.read_frame() => frame,
            _ = shutdown.changed() => break,
        };

        let read = reader.take_bytes_read();
        if read > 0 {
            shared.traffic.lock().record_download(read);
        }

        let skipped = reader.take_skipped();
        if skipped > 0 {
            shared.fail(PeerError::InvalidMessage(format!(
                "skipped {} unframed bytes",
                skipped
            )));
        }

        let result = frame.and_then(|frame| shared.receive(frame));
        if let Err(e) = result {
            if e.is_fatal() {
                shared.fail(e);
                break;
            }
            tracing::trace!(addr = %shared.addr, "dropping message: {}", e);
        }
    }
}

async fn send_loop<W>(
    shared: Arc<Shared>,
    mut writer: FrameWriter<W>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
) where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let first = tokio::select! {
            frame = outbound.recv() => frame,
            _ = shutdown.changed() => None,
        };
        let Some(first) = first else {
            break;
        };

        let mut batch = vec![first];
        while let Ok(frame) = outbound.try_recv() {
            batch.push(frame);
        }

        match writer.send(&batch).await {
            Ok(written) => {
                shared.traffic.lock().record_upload(written);
                shared.state.lock().last_sent = Instant::now();
                tracing::trace!(
                    addr = %shared.addr,
                    frames = batch.len(),
                    bytes = written,
                    "sent batch"
                );
            }
            Err(e) => {
                shared.fail(e);
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

async fn download_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let coordinator = shared.ctx.coordinator.clone();
    let config = shared.ctx.config.clone();

    let mut current: Option<Piece> = None;
    let mut last_interested: Option<Instant> = None;
    let mut stalls = 0u32;

    while pause(&mut shutdown, config.download_interval).await {
        let (ready, seeding, blocks) = {
            let mut state = shared.state.lock();
            let blocks: Vec<Block> = state.blocks.drain(..).collect();
            (state.handshake.is_complete(), state.seeding, blocks)
        };
        if !ready {
            continue;
        }

        for block in blocks {
            absorb(&shared, &mut current, block);
        }

        if let Some(piece) = &current {
            match coordinator.status(piece.index()) {
                Some(PieceStatus::CheckedOut) => {}
                status => {
                    tracing::debug!(
                        addr = %shared.addr,
                        piece = piece.index(),
                        ?status,
                        "abandoning piece"
                    );
                    current = None;
                }
            }
        }

        let wanted = current.is_some() || !candidates(&shared).is_empty();
        let newly_interested = {
            let mut state = shared.state.lock();
            let changed = state.am_interested != wanted;
            state.am_interested = wanted;
            changed
        };

        if !wanted {
            stalls = 0;
            if newly_interested {
                shared.queue(Message::NotInterested);
            }
            continue;
        }

        if newly_interested {
            shared.queue(Message::Interested);
            last_interested = Some(Instant::now());
        }

        match seeding {
            SeedingState::Choked => {
                let due = last_interested
                    .map_or(true, |sent| sent.elapsed() >= config.interested_interval);
                if !due {
                    continue;
                }
                stalls += 1;
                if stalls > config.max_choked_stalls {
                    shared.fail(PeerError::Stalled(config.max_choked_stalls));
                    break;
                }
                tracing::debug!(addr = %shared.addr, stalls, "still choked, resending interest");
                shared.queue(Message::Interested);
                last_interested = Some(Instant::now());
            }
            SeedingState::Unchoked => {
                stalls = 0;
                // Only consumed while unchoked, so requests voided by a
                // choke are sent again after the next unchoke.
                let rerequest = {
                    let mut state = shared.state.lock();
                    state.seeding == SeedingState::Unchoked
                        && std::mem::take(&mut state.rerequest)
                };
                match &current {
                    None => {
                        current = select_piece(&shared);
                        if let Some(piece) = &current {
                            request_missing(&shared, piece);
                        }
                    }
                    Some(piece) if rerequest => request_missing(&shared, piece),
                    Some(_) => {}
                }
            }
        }
    }
}

/// Feeds a received block to the piece in progress.
fn absorb(shared: &Shared, current: &mut Option<Piece>, block: Block) {
    let Some(piece) = current.as_mut().filter(|p| p.index() == block.piece) else {
        tracing::trace!(addr = %shared.addr, piece = block.piece, "unexpected block");
        return;
    };

    match piece.put_block(block.offset, &block.data) {
        Ok(BlockOutcome::Completed) | Ok(BlockOutcome::Corrupted) => *current = None,
        Ok(BlockOutcome::Stored) | Ok(BlockOutcome::Duplicate) => {}
        Err(e) => tracing::trace!(addr = %shared.addr, "dropping block: {}", e),
    }
}

fn candidates(shared: &Shared) -> Vec<u32> {
    let remote = shared.state.lock().remote_bitfield.clone();
    shared
        .ctx
        .coordinator
        .candidates(|index| remote.has_piece(index as usize))
}

fn select_piece(shared: &Shared) -> Option<Piece> {
    for index in candidates(shared) {
        match shared.ctx.coordinator.check_out(index) {
            Ok(Some(piece)) => {
                tracing::debug!(addr = %shared.addr, piece = index, "downloading piece");
                return Some(piece);
            }
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(addr = %shared.addr, "checkout of piece {} failed: {}", index, e);
                return None;
            }
        }
    }
    None
}

fn request_missing(shared: &Shared, piece: &Piece) {
    for (offset, length) in piece.missing_blocks() {
        shared.queue(Message::Request {
            index: piece.index(),
            begin: offset,
            length,
        });
    }
}

async fn upload_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut haves = shared.ctx.coordinator.subscribe_have();
    let mut cached: Option<(u32, Bytes)> = None;
    let interval = shared.ctx.config.upload_interval;

    while pause(&mut shutdown, interval).await {
        let ready = shared.state.lock().handshake.is_complete();
        announce_haves(&shared, &mut haves, ready);
        if !ready {
            continue;
        }

        let requests: Vec<BlockRequest> = {
            let mut state = shared.state.lock();
            match (state.leeching, state.am_choking) {
                (LeechingState::Interested, true) => {
                    state.am_choking = false;
                    shared.queue(Message::Unchoke);
                    tracing::debug!(addr = %shared.addr, "unchoking peer");
                }
                (LeechingState::Uninterested, false) => {
                    state.am_choking = true;
                    shared.queue(Message::Choke);
                    tracing::debug!(addr = %shared.addr, "choking peer");
                }
                _ => {}
            }

            if state.am_choking {
                state.requests.clear();
                Vec::new()
            } else {
                state.requests.drain(..).collect()
            }
        };

        for request in requests {
            serve(&shared, &mut cached, request).await;
        }
    }
}

/// Queues `Have` for pieces completed since the last poll. Before the
/// handshake they are dropped; the bitfield sent with it covers them.
fn announce_haves(shared: &Shared, haves: &mut broadcast::Receiver<u32>, ready: bool) {
    loop {
        match haves.try_recv() {
            Ok(piece) if ready => shared.queue(Message::Have { piece }),
            Ok(_) => {}
            Err(TryRecvError::Lagged(missed)) => {
                tracing::debug!(addr = %shared.addr, missed, "have announcements lagged");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

async fn serve(shared: &Shared, cached: &mut Option<(u32, Bytes)>, request: BlockRequest) {
    let data = match cached {
        Some((index, data)) if *index == request.piece => data.clone(),
        _ => match shared.ctx.coordinator.request_piece(request.piece).await {
            Ok(data) => {
                *cached = Some((request.piece, data.clone()));
                data
            }
            Err(PieceError::NotPresent(index)) => {
                tracing::trace!(addr = %shared.addr, "request for piece {} we lack", index);
                return;
            }
            Err(e) => {
                tracing::warn!(addr = %shared.addr, "cannot serve piece {}: {}", request.piece, e);
                return;
            }
        },
    };

    if request.end() > data.len() {
        tracing::trace!(addr = %shared.addr, ?request, "request past end of piece");
        return;
    }

    shared.queue(Message::Piece {
        index: request.piece,
        begin: request.offset,
        data: data.slice(request.offset as usize..request.end()),
    });
}

async fn keepalive_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let timeout = shared.ctx.config.keepalive_timeout;
    let interval = shared.ctx.config.keepalive_interval;

    while pause(&mut shutdown, interval).await {
        shared.traffic.lock().tick();

        let (silent_for, idle_for, ready) = {
            let state = shared.state.lock();
            (
                state.last_received.elapsed(),
                state.last_sent.elapsed(),
                state.handshake.is_complete(),
            )
        };

        if silent_for > timeout {
            shared.fail(PeerError::Timeout(timeout.as_secs()));
            break;
        }
        if ready && idle_for >= timeout / 2 {
            shared.queue(Message::KeepAlive);
        }
    }
}
