use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::availability::Availability;
use super::requests::{BlockRef, RequestTable};
use crate::constants::{BLOCK_SIZE, ENDGAME_BLOCK_THRESHOLD, REQUEST_TIMEOUT, REQUEST_WINDOW};
use crate::metainfo::TorrentMeta;
use crate::peer::{Bitfield, SessionId};

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Maximum in-flight requests per session.
    pub window: usize,
    /// Remaining-block count at which endgame latches on.
    pub endgame_threshold: usize,
    /// Deadline applied to each issued request.
    pub request_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window: REQUEST_WINDOW,
            endgame_threshold: ENDGAME_BLOCK_THRESHOLD,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    bitfield: Bitfield,
    choked: bool,
}

/// Decides which block to request from which peer.
///
/// Owned and driven single-threaded by the swarm's event loop; every method
/// runs to completion before the next event is processed, which is what
/// makes the availability/needed/in-flight bookkeeping appear atomic.
///
/// For every piece, each block offset is in exactly one of three places:
/// the piece's `needed` set, the request table (requested), or neither
/// (received and with the store). Pieces leave the candidate set only when
/// the store has verified them.
pub struct Scheduler {
    meta: Arc<TorrentMeta>,
    config: SchedulerConfig,
    availability: Availability,
    needed: HashMap<u32, BTreeSet<u32>>,
    needed_total: usize,
    completed: HashSet<u32>,
    endgame: bool,
    table: RequestTable,
    sessions: HashMap<SessionId, SessionState>,
}

impl Scheduler {
    /// Builds the scheduler. Pieces in `completed` (typically recovered by
    /// the store's startup scan) are never scheduled.
    pub fn new(
        meta: Arc<TorrentMeta>,
        completed: impl IntoIterator<Item = u32>,
        config: SchedulerConfig,
    ) -> Self {
        let completed: HashSet<u32> = completed.into_iter().collect();
        let availability = Availability::new(meta.piece_count(), |p| completed.contains(&p));

        let mut needed = HashMap::new();
        let mut needed_total = 0;
        for piece in 0..meta.piece_count() as u32 {
            if completed.contains(&piece) {
                continue;
            }
            let offsets: BTreeSet<u32> =
                (0..meta.block_count(piece)).map(|b| b * BLOCK_SIZE).collect();
            needed_total += offsets.len();
            needed.insert(piece, offsets);
        }

        let mut scheduler = Self {
            meta,
            config,
            availability,
            needed,
            needed_total,
            completed,
            endgame: false,
            table: RequestTable::new(),
            sessions: HashMap::new(),
        };
        scheduler.update_endgame();
        scheduler
    }

    /// Registers a connected session with an empty bitfield.
    pub fn add_session(&mut self, id: SessionId) {
        self.sessions.insert(
            id,
            SessionState {
                bitfield: Bitfield::new(self.meta.piece_count()),
                choked: true,
            },
        );
    }

    /// Removes a dead session: its requests return to needed and its
    /// advertised pieces stop counting toward availability. No wire traffic
    /// results; the socket is already gone.
    pub fn remove_session(&mut self, id: SessionId) {
        for block in self.table.remove_session(id) {
            self.restore_needed(block.piece, block.begin);
        }

        if let Some(state) = self.sessions.remove(&id) {
            for piece in state.bitfield.iter_set() {
                self.availability.decrement(piece as u32);
            }
        }
    }

    /// Replaces a session's piece map (a `bitfield` message).
    pub fn set_bitfield(&mut self, id: SessionId, bitfield: Bitfield) {
        let Some(state) = self.sessions.get_mut(&id) else {
            return;
        };

        let old = std::mem::replace(&mut state.bitfield, bitfield);
        for piece in old.iter_set() {
            self.availability.decrement(piece as u32);
        }

        // Borrow again: the bitfield was moved in above.
        let pieces: Vec<u32> = self.sessions[&id]
            .bitfield
            .iter_set()
            .map(|p| p as u32)
            .collect();
        for piece in pieces {
            self.availability.increment(piece);
        }
    }

    /// Marks one more piece in a session's map (a `have` message).
    pub fn add_have(&mut self, id: SessionId, piece: u32) {
        let Some(state) = self.sessions.get_mut(&id) else {
            return;
        };
        if (piece as usize) < self.meta.piece_count() && !state.bitfield.has(piece as usize) {
            state.bitfield.set(piece as usize);
            self.availability.increment(piece);
        }
    }

    /// The peer choked us: every request outstanding to it is abandoned
    /// locally and its blocks become needed again. Nothing goes on the wire;
    /// a choking peer discards pending requests itself.
    pub fn set_choked(&mut self, id: SessionId) {
        if let Some(state) = self.sessions.get_mut(&id) {
            state.choked = true;
        }
        for (piece, begin) in self.table.session_blocks(id) {
            self.table.remove_holder(id, piece, begin);
            self.restore_needed(piece, begin);
        }
    }

    /// The peer unchoked us; it becomes schedulable.
    pub fn set_unchoked(&mut self, id: SessionId) {
        if let Some(state) = self.sessions.get_mut(&id) {
            state.choked = false;
        }
    }

    /// True if the peer advertises any piece we still lack. Drives our
    /// interested/not-interested signalling.
    pub fn wants_from(&self, id: SessionId) -> bool {
        let Some(state) = self.sessions.get(&id) else {
            return false;
        };
        state
            .bitfield
            .iter_set()
            .any(|p| !self.completed.contains(&(p as u32)))
    }

    /// Issues requests to `id` up to the pipelining window.
    ///
    /// Pieces are taken rarest-first with the index as tie-break, blocks in
    /// ascending offset order. During endgame, blocks already requested from
    /// other sessions are eligible too.
    pub fn fill_requests(&mut self, id: SessionId, now: Instant) -> Vec<BlockRef> {
        self.update_endgame();

        match self.sessions.get(&id) {
            Some(state) if !state.choked => {}
            _ => return Vec::new(),
        }

        let mut issued = Vec::new();
        while self.table.inflight(id) < self.config.window {
            let Some(block) = self.pick_block(id) else {
                break;
            };

            if let Some(offsets) = self.needed.get_mut(&block.piece) {
                if offsets.remove(&block.begin) {
                    self.needed_total -= 1;
                }
            }
            self.table
                .insert(id, block, now + self.config.request_timeout);
            issued.push(block);
        }

        if !issued.is_empty() {
            trace!(session = %id, count = issued.len(), "issued block requests");
        }
        issued
    }

    /// Settles bookkeeping for a received block and returns the duplicate
    /// requests to cancel on the wire (endgame first-arrival rule).
    pub fn block_arrived(
        &mut self,
        id: SessionId,
        piece: u32,
        begin: u32,
    ) -> Vec<(SessionId, BlockRef)> {
        self.table.remove_holder(id, piece, begin);
        let cancels = self.table.remove_block(piece, begin);

        // A late or unsolicited block still consumes its offset; the store
        // is the authority on the payload either way.
        if let Some(offsets) = self.needed.get_mut(&piece) {
            if offsets.remove(&begin) {
                self.needed_total -= 1;
            }
        }

        self.update_endgame();
        cancels
    }

    /// The store verified and persisted `piece`. Sweeps any lingering
    /// requests for it (endgame leftovers) and retires the piece.
    pub fn piece_completed(&mut self, piece: u32) -> Vec<(SessionId, BlockRef)> {
        self.completed.insert(piece);
        self.availability.mark_complete(piece);
        if let Some(offsets) = self.needed.remove(&piece) {
            self.needed_total -= offsets.len();
        }

        let mut cancels = Vec::new();
        for (begin, _) in self.table.piece_offsets(piece) {
            cancels.extend(self.table.remove_block(piece, begin));
        }
        cancels
    }

    /// The store rejected `piece` on hash mismatch: every block becomes
    /// needed again and the piece re-enters scheduling from scratch.
    pub fn piece_failed(&mut self, piece: u32) -> Vec<(SessionId, BlockRef)> {
        if self.completed.contains(&piece) {
            return Vec::new();
        }

        let mut cancels = Vec::new();
        for (begin, _) in self.table.piece_offsets(piece) {
            cancels.extend(self.table.remove_block(piece, begin));
        }

        let offsets: BTreeSet<u32> = (0..self.meta.block_count(piece))
            .map(|b| b * BLOCK_SIZE)
            .collect();
        let fresh = offsets.len();
        if let Some(old) = self.needed.insert(piece, offsets) {
            self.needed_total -= old.len();
        }
        self.needed_total += fresh;

        debug!(piece, "piece reset after hash failure");
        cancels
    }

    /// Collects requests whose deadline has passed. Each is cancelled on the
    /// wire, dropped from tracking, and its block returned to needed unless
    /// another session still has it in flight.
    pub fn expire(&mut self, now: Instant) -> Vec<(SessionId, BlockRef)> {
        let expired = self.table.expired(now);
        for (session, block) in &expired {
            self.table.remove_holder(*session, block.piece, block.begin);
            self.restore_needed(block.piece, block.begin);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired block requests");
        }
        expired
    }

    /// True once endgame has latched on.
    pub fn is_endgame(&self) -> bool {
        self.endgame
    }

    /// Blocks not yet handed to the store: needed plus requested.
    pub fn remaining_blocks(&self) -> usize {
        self.needed_total + self.table.outstanding_blocks()
    }

    /// In-flight request count for one session.
    pub fn inflight(&self, id: SessionId) -> usize {
        self.table.inflight(id)
    }

    /// Sessions currently advertising `piece`.
    pub fn availability_of(&self, piece: u32) -> u32 {
        self.availability.count(piece)
    }

    fn pick_block(&self, id: SessionId) -> Option<BlockRef> {
        let state = self.sessions.get(&id)?;

        for piece in self.availability.iter() {
            if !state.bitfield.has(piece as usize) {
                continue;
            }

            if let Some(&begin) = self.needed.get(&piece).and_then(|offsets| offsets.first()) {
                return Some(BlockRef {
                    piece,
                    begin,
                    length: self.meta.block_size_at(piece, begin),
                });
            }

            if self.endgame {
                for (begin, length) in self.table.piece_offsets(piece) {
                    if !self.table.has_holder(id, piece, begin) {
                        return Some(BlockRef {
                            piece,
                            begin,
                            length,
                        });
                    }
                }
            }
        }

        None
    }

    /// Returns a block to its piece's needed set, unless another session
    /// still has it requested or the piece already completed.
    fn restore_needed(&mut self, piece: u32, begin: u32) {
        if self.table.is_requested(piece, begin) || self.completed.contains(&piece) {
            return;
        }
        if self.needed.entry(piece).or_default().insert(begin) {
            self.needed_total += 1;
        }
    }

    fn update_endgame(&mut self) {
        if self.endgame {
            return;
        }
        let remaining = self.remaining_blocks();
        if remaining > 0 && remaining <= self.config.endgame_threshold {
            self.endgame = true;
            debug!(remaining, "endgame latched on");
        }
    }
}
