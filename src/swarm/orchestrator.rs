use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use super::announcer::Announcer;
use super::error::SwarmError;
use crate::constants::{
    ANNOUNCE_INTERVAL, DEFAULT_NUMWANT, DEFAULT_PORT, DIAL_INTERVAL, ENDGAME_BLOCK_THRESHOLD,
    MAINTENANCE_INTERVAL, MAX_PEERS, MAX_SESSION_STRIKES, REQUEST_TIMEOUT, REQUEST_WINDOW,
};
use crate::metainfo::TorrentMeta;
use crate::peer::{
    PeerError, PeerId, PeerSession, RateEstimator, SessionCommand, SessionEvent, SessionId,
};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::storage::{BlockIngest, PieceStore};
use crate::tracker::{HttpTracker, TrackerEvent};

/// Swarm tuning parameters.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Directory the output file is created in.
    pub download_dir: PathBuf,
    /// Port reported to the tracker.
    pub port: u16,
    /// Concurrent session cap.
    pub max_peers: usize,
    /// Per-session request pipelining window.
    pub window: usize,
    /// Remaining-block count that latches endgame mode.
    pub endgame_threshold: usize,
    /// Peers requested per announce.
    pub numwant: u32,
    /// Hash-check an existing size-matched output file at startup.
    pub verify_on_open: bool,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            port: DEFAULT_PORT,
            max_peers: MAX_PEERS,
            window: REQUEST_WINDOW,
            endgame_threshold: ENDGAME_BLOCK_THRESHOLD,
            numwant: DEFAULT_NUMWANT,
            verify_on_open: true,
        }
    }
}

/// Per-session bookkeeping the orchestrator keeps next to the handle.
struct Connected {
    session: PeerSession,
    addr: SocketAddrV4,
    am_interested: bool,
    peer_interested: bool,
    strikes: u32,
    download: RateEstimator,
}

/// Result of one outbound dial attempt.
struct DialOutcome {
    id: SessionId,
    addr: SocketAddrV4,
    result: Result<PeerSession, PeerError>,
}

/// The download engine for one torrent.
///
/// ```no_run
/// use skein::metainfo::TorrentMeta;
/// use skein::swarm::{Swarm, SwarmConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let meta = TorrentMeta::from_bytes(&data)?;
///
/// let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
/// Swarm::new(meta, SwarmConfig::default()).run(shutdown_rx).await?;
/// # Ok(())
/// # }
/// ```
pub struct Swarm {
    meta: Arc<TorrentMeta>,
    config: SwarmConfig,
}

impl Swarm {
    pub fn new(meta: TorrentMeta, config: SwarmConfig) -> Self {
        Self {
            meta: Arc::new(meta),
            config,
        }
    }

    /// Runs the download until it completes or `shutdown` flips to true.
    ///
    /// Either way the engine winds down in order: sessions close, a
    /// best-effort `stopped` announce goes out, and the store is flushed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), SwarmError> {
        let path = self.config.download_dir.join(&self.meta.name);
        let store =
            PieceStore::open(&path, self.meta.clone(), self.config.verify_on_open).await?;

        let peer_id = PeerId::generate();
        let tracker = HttpTracker::new(&self.meta.announce)?;
        let mut announcer = Announcer::new(
            tracker,
            self.meta.info_hash,
            peer_id,
            self.config.port,
            self.config.numwant,
            ANNOUNCE_INTERVAL,
        );

        if store.is_complete() {
            info!(name = %self.meta.name, "file already complete");
            let _ = announcer
                .announce(TrackerEvent::Completed, store.downloaded_bytes(), 0)
                .await;
            return Ok(());
        }

        let scheduler = Scheduler::new(
            self.meta.clone(),
            store.completed_pieces(),
            SchedulerConfig {
                window: self.config.window,
                endgame_threshold: self.config.endgame_threshold,
                request_timeout: REQUEST_TIMEOUT,
            },
        );

        let (events_tx, mut events_rx) = mpsc::channel::<(SessionId, SessionEvent)>(1024);
        let (dials_tx, mut dials_rx) = mpsc::channel::<DialOutcome>(64);

        let mut runner = Runner {
            meta: self.meta.clone(),
            config: self.config,
            store,
            scheduler,
            announcer,
            peer_id,
            known_peers: HashSet::new(),
            sessions: HashMap::new(),
            connected_addrs: HashSet::new(),
            connecting: HashSet::new(),
            next_session: 0,
            events_tx,
            dials_tx,
            finished: false,
        };

        info!(
            name = %runner.meta.name,
            pieces = runner.meta.piece_count(),
            have = runner.store.completed_count(),
            "starting download"
        );
        runner.announce(TrackerEvent::Started).await;

        let mut dial_tick = interval(DIAL_INTERVAL);
        let mut maintenance_tick = interval(MAINTENANCE_INTERVAL);
        let mut announce_at = tokio::time::Instant::now() + runner.announcer.interval();

        while !runner.finished {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as a shutdown request.
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("shutdown requested");
                        break;
                    }
                }
                Some((id, event)) = events_rx.recv() => {
                    runner.handle_event(id, event).await;
                }
                Some(outcome) = dials_rx.recv() => {
                    runner.handle_dial(outcome);
                }
                _ = dial_tick.tick() => {
                    runner.dial_peers();
                }
                _ = maintenance_tick.tick() => {
                    runner.run_maintenance();
                }
                _ = tokio::time::sleep_until(announce_at) => {
                    runner.announce(TrackerEvent::None).await;
                    announce_at = tokio::time::Instant::now() + runner.announcer.interval();
                }
            }
        }

        runner.wind_down().await;
        Ok(())
    }
}

struct Runner {
    meta: Arc<TorrentMeta>,
    config: SwarmConfig,
    store: PieceStore,
    scheduler: Scheduler,
    announcer: Announcer,
    peer_id: PeerId,
    /// Addresses learned from the tracker. Entries are never evicted;
    /// failed dials stay eligible for a later tick.
    known_peers: HashSet<SocketAddrV4>,
    sessions: HashMap<SessionId, Connected>,
    connected_addrs: HashSet<SocketAddrV4>,
    connecting: HashSet<SocketAddrV4>,
    next_session: u64,
    events_tx: mpsc::Sender<(SessionId, SessionEvent)>,
    dials_tx: mpsc::Sender<DialOutcome>,
    finished: bool,
}

impl Runner {
    /// One announce cycle; new addresses merge into the known set.
    async fn announce(&mut self, event: TrackerEvent) {
        let downloaded = self.store.downloaded_bytes();
        let left = self.store.bytes_left();

        match self.announcer.announce(event, downloaded, left).await {
            Ok(peers) => {
                let before = self.known_peers.len();
                self.known_peers.extend(peers);
                debug!(
                    known = self.known_peers.len(),
                    new = self.known_peers.len() - before,
                    "tracker peers merged"
                );
            }
            Err(error) => warn!(%error, "announce cycle failed"),
        }
    }

    /// Tops the connected set up to the peer cap.
    fn dial_peers(&mut self) {
        let budget = self
            .config
            .max_peers
            .saturating_sub(self.sessions.len() + self.connecting.len());
        if budget == 0 {
            return;
        }

        let candidates: Vec<SocketAddrV4> = self
            .known_peers
            .iter()
            .filter(|addr| {
                !self.connected_addrs.contains(addr) && !self.connecting.contains(addr)
            })
            .take(budget)
            .copied()
            .collect();

        for addr in candidates {
            self.connecting.insert(addr);
            self.next_session += 1;
            let id = SessionId(self.next_session);

            let events = self.events_tx.clone();
            let dials = self.dials_tx.clone();
            let info_hash = *self.meta.info_hash.as_bytes();
            let peer_id = self.peer_id;
            let piece_count = self.meta.piece_count();

            trace!(session = %id, %addr, "dialing");
            tokio::spawn(async move {
                let result = PeerSession::connect(
                    id,
                    SocketAddr::V4(addr),
                    info_hash,
                    peer_id,
                    piece_count,
                    events,
                )
                .await;
                let _ = dials.send(DialOutcome { id, addr, result }).await;
            });
        }
    }

    fn handle_dial(&mut self, outcome: DialOutcome) {
        self.connecting.remove(&outcome.addr);

        match outcome.result {
            Ok(session) if self.sessions.len() < self.config.max_peers => {
                debug!(session = %outcome.id, addr = %outcome.addr, "peer connected");
                self.scheduler.add_session(outcome.id);
                self.connected_addrs.insert(outcome.addr);
                self.sessions.insert(
                    outcome.id,
                    Connected {
                        session,
                        addr: outcome.addr,
                        am_interested: false,
                        peer_interested: false,
                        strikes: 0,
                        download: RateEstimator::new(),
                    },
                );
            }
            Ok(session) => {
                // The cap filled while this dial was in flight.
                let _ = session.send(SessionCommand::Close);
            }
            Err(error) => {
                // The address stays known; a later tick may retry it.
                debug!(addr = %outcome.addr, %error, "dial failed");
            }
        }
    }

    async fn handle_event(&mut self, id: SessionId, event: SessionEvent) {
        match event {
            SessionEvent::Bitfield { bitfield } => {
                self.scheduler.set_bitfield(id, bitfield);
                self.update_interest(id);
                self.dispatch_requests(id);
            }
            SessionEvent::Have { piece } => {
                self.scheduler.add_have(id, piece);
                self.update_interest(id);
                self.dispatch_requests(id);
            }
            SessionEvent::Choked => {
                self.scheduler.set_choked(id);
            }
            SessionEvent::Unchoked => {
                self.scheduler.set_unchoked(id);
                self.dispatch_requests(id);
            }
            SessionEvent::Interested => {
                if let Some(state) = self.sessions.get_mut(&id) {
                    state.peer_interested = true;
                }
            }
            SessionEvent::NotInterested => {
                if let Some(state) = self.sessions.get_mut(&id) {
                    state.peer_interested = false;
                }
            }
            SessionEvent::Block { piece, begin, data } => {
                self.handle_block(id, piece, begin, &data).await;
            }
            SessionEvent::BlockRequested { piece, begin, .. } => {
                // Download-only: we never unchoke anyone, so requests are
                // noted and dropped.
                trace!(session = %id, piece, begin, "ignoring block request");
            }
            SessionEvent::BlockCancelled { .. } => {}
            SessionEvent::Port { port } => {
                trace!(session = %id, port, "peer announced dht port");
            }
            SessionEvent::Closed => {
                debug!(session = %id, "peer closed connection");
                self.drop_session(id);
                // Its recycled blocks may be schedulable elsewhere.
                self.dispatch_all();
            }
            SessionEvent::Failed { error } => {
                debug!(session = %id, %error, "session failed");
                self.drop_session(id);
                self.dispatch_all();
            }
        }
    }

    async fn handle_block(&mut self, id: SessionId, piece: u32, begin: u32, data: &[u8]) {
        if let Some(state) = self.sessions.get_mut(&id) {
            state.download.record(data.len() as u64, Instant::now());
        }

        // First arrival wins: cancel the same block everywhere else.
        for (holder, block) in self.scheduler.block_arrived(id, piece, begin) {
            self.send_cancel(holder, block.piece, block.begin, block.length);
        }

        let outcome = match self.store.add_block(piece, begin, data).await {
            Ok(outcome) => outcome,
            Err(error) => {
                // The peer sent a block that violates the piece geometry.
                warn!(session = %id, %error, "rejected block");
                self.evict(id, "invalid block");
                return;
            }
        };

        match outcome {
            BlockIngest::Stored | BlockIngest::Ignored => {
                self.dispatch_requests(id);
            }
            BlockIngest::PieceWritten { piece } => {
                for (holder, block) in self.scheduler.piece_completed(piece) {
                    self.send_cancel(holder, block.piece, block.begin, block.length);
                }
                self.broadcast_have(piece);

                if self.store.is_complete() {
                    info!(name = %self.meta.name, "download complete");
                    self.announce(TrackerEvent::Completed).await;
                    self.finished = true;
                    return;
                }

                let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
                for sid in ids {
                    self.update_interest(sid);
                }
                self.dispatch_requests(id);
            }
            BlockIngest::HashFailed { piece } => {
                for (holder, block) in self.scheduler.piece_failed(piece) {
                    self.send_cancel(holder, block.piece, block.begin, block.length);
                }
                // The finishing peer contributed to a corrupt piece.
                self.strike(id, "hash failure");
                self.dispatch_all();
            }
            BlockIngest::WriteFailed { piece } => {
                // Verified but not durable; fetch the piece again.
                for (holder, block) in self.scheduler.piece_failed(piece) {
                    self.send_cancel(holder, block.piece, block.begin, block.length);
                }
                self.dispatch_all();
            }
        }
    }

    /// Expires overdue requests and evicts sessions that keep stalling.
    fn run_maintenance(&mut self) {
        let mut offenders: HashMap<SessionId, u32> = HashMap::new();
        for (holder, block) in self.scheduler.expire(Instant::now()) {
            self.send_cancel(holder, block.piece, block.begin, block.length);
            *offenders.entry(holder).or_default() += 1;
        }

        for (id, _) in offenders {
            self.strike(id, "request timeout");
        }

        self.dispatch_all();

        let now = Instant::now();
        let received: u64 = self.sessions.values().map(|s| s.download.total()).sum();
        let rate: u64 = self.sessions.values_mut().map(|s| s.download.rate(now)).sum();
        let reciprocal = self.sessions.values().filter(|s| s.peer_interested).count();
        trace!(
            sessions = self.sessions.len(),
            reciprocal,
            received,
            rate,
            remaining = self.scheduler.remaining_blocks(),
            endgame = self.scheduler.is_endgame(),
            "maintenance pass"
        );
    }

    /// Issues requests to one session up to its window.
    fn dispatch_requests(&mut self, id: SessionId) {
        let blocks = self.scheduler.fill_requests(id, Instant::now());
        if blocks.is_empty() {
            return;
        }

        let mut dead = false;
        if let Some(state) = self.sessions.get(&id) {
            for block in blocks {
                if state
                    .session
                    .send(SessionCommand::Request {
                        piece: block.piece,
                        begin: block.begin,
                        length: block.length,
                    })
                    .is_err()
                {
                    dead = true;
                    break;
                }
            }
        }
        if dead {
            self.evict(id, "command channel dead");
        }
    }

    fn dispatch_all(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.dispatch_requests(id);
        }
    }

    /// Aligns our interested flag with whether the peer has anything we
    /// still need.
    fn update_interest(&mut self, id: SessionId) {
        let wants = self.scheduler.wants_from(id);
        let mut dead = false;

        if let Some(state) = self.sessions.get_mut(&id) {
            if wants == state.am_interested {
                return;
            }
            let command = if wants {
                SessionCommand::Interested
            } else {
                SessionCommand::NotInterested
            };
            if state.session.send(command).is_ok() {
                state.am_interested = wants;
            } else {
                dead = true;
            }
        }

        if dead {
            self.evict(id, "command channel dead");
        }
    }

    /// Announces a fresh piece to every live session.
    fn broadcast_have(&mut self, piece: u32) {
        let mut dead = Vec::new();
        for (id, state) in &self.sessions {
            if state.session.send(SessionCommand::Have { piece }).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.evict(id, "command channel dead");
        }
    }

    fn send_cancel(&mut self, id: SessionId, piece: u32, begin: u32, length: u32) {
        if let Some(state) = self.sessions.get(&id) {
            let _ = state.session.send(SessionCommand::Cancel {
                piece,
                begin,
                length,
            });
        }
    }

    fn strike(&mut self, id: SessionId, reason: &str) {
        let strikes = match self.sessions.get_mut(&id) {
            Some(state) => {
                state.strikes += 1;
                state.strikes
            }
            None => return,
        };
        debug!(session = %id, strikes, reason, "session strike");
        if strikes >= MAX_SESSION_STRIKES {
            self.evict(id, "too many strikes");
        }
    }

    /// Closes and forgets a session. Its address stays in the known set.
    fn evict(&mut self, id: SessionId, reason: &str) {
        if let Some(state) = self.sessions.remove(&id) {
            debug!(session = %id, addr = %state.addr, reason, "evicting session");
            let _ = state.session.send(SessionCommand::Close);
            self.connected_addrs.remove(&state.addr);
        }
        self.scheduler.remove_session(id);
    }

    /// A session died on its own; bookkeeping only.
    fn drop_session(&mut self, id: SessionId) {
        if let Some(state) = self.sessions.remove(&id) {
            self.connected_addrs.remove(&state.addr);
        }
        self.scheduler.remove_session(id);
    }

    /// Orderly teardown: sessions close, a final `stopped` announce goes
    /// out best-effort, and the store flushes.
    async fn wind_down(mut self) {
        for (_, state) in self.sessions.drain() {
            let _ = state.session.send(SessionCommand::Close);
        }

        self.announce(TrackerEvent::Stopped).await;

        if let Err(error) = self.store.close().await {
            warn!(%error, "store close failed");
        }
    }
}
