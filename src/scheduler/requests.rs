use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::peer::SessionId;

/// One schedulable block: piece index, offset, and exact length.
///
/// `(piece, begin)` is the logical request identity; two sessions may hold
/// requests with the same identity only during endgame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    /// Piece index.
    pub piece: u32,
    /// Byte offset within the piece; always a multiple of the block size.
    pub begin: u32,
    /// Block length: the block size, or less at the end of the piece.
    pub length: u32,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    session: SessionId,
    deadline: Instant,
}

#[derive(Debug)]
struct Entry {
    length: u32,
    holders: Vec<Holder>,
}

/// The in-flight request table.
///
/// Tracks who was asked for which block and when the answer is due. Both
/// lookup directions are maintained: by block for duplicate handling and by
/// session for window accounting, choke recycling, and teardown.
#[derive(Debug, Default)]
pub(crate) struct RequestTable {
    by_block: HashMap<(u32, u32), Entry>,
    by_session: HashMap<SessionId, HashSet<(u32, u32)>>,
}

impl RequestTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a request issued to `session`, due at `deadline`.
    pub(crate) fn insert(
        &mut self,
        session: SessionId,
        block: BlockRef,
        deadline: Instant,
    ) {
        let entry = self
            .by_block
            .entry((block.piece, block.begin))
            .or_insert(Entry {
                length: block.length,
                holders: Vec::new(),
            });
        entry.holders.push(Holder { session, deadline });

        self.by_session
            .entry(session)
            .or_default()
            .insert((block.piece, block.begin));
    }

    /// Removes one session's hold on a block. Returns the block if the
    /// session actually held it.
    pub(crate) fn remove_holder(
        &mut self,
        session: SessionId,
        piece: u32,
        begin: u32,
    ) -> Option<BlockRef> {
        let entry = self.by_block.get_mut(&(piece, begin))?;
        let before = entry.holders.len();
        entry.holders.retain(|h| h.session != session);
        if entry.holders.len() == before {
            return None;
        }

        let length = entry.length;
        if entry.holders.is_empty() {
            self.by_block.remove(&(piece, begin));
        }
        if let Some(blocks) = self.by_session.get_mut(&session) {
            blocks.remove(&(piece, begin));
        }

        Some(BlockRef {
            piece,
            begin,
            length,
        })
    }

    /// Removes every hold on a block, returning the evicted holders.
    pub(crate) fn remove_block(&mut self, piece: u32, begin: u32) -> Vec<(SessionId, BlockRef)> {
        let Some(entry) = self.by_block.remove(&(piece, begin)) else {
            return Vec::new();
        };

        let block = BlockRef {
            piece,
            begin,
            length: entry.length,
        };
        entry
            .holders
            .into_iter()
            .map(|holder| {
                if let Some(blocks) = self.by_session.get_mut(&holder.session) {
                    blocks.remove(&(piece, begin));
                }
                (holder.session, block)
            })
            .collect()
    }

    /// Whether `session` currently holds a request for this block.
    pub(crate) fn has_holder(&self, session: SessionId, piece: u32, begin: u32) -> bool {
        self.by_session
            .get(&session)
            .is_some_and(|blocks| blocks.contains(&(piece, begin)))
    }

    /// Whether any session holds a request for this block.
    pub(crate) fn is_requested(&self, piece: u32, begin: u32) -> bool {
        self.by_block.contains_key(&(piece, begin))
    }

    /// Number of requests outstanding to `session`.
    pub(crate) fn inflight(&self, session: SessionId) -> usize {
        self.by_session.get(&session).map_or(0, HashSet::len)
    }

    /// Number of distinct blocks with at least one request outstanding.
    pub(crate) fn outstanding_blocks(&self) -> usize {
        self.by_block.len()
    }

    /// All blocks held by `session`, unordered.
    pub(crate) fn session_blocks(&self, session: SessionId) -> Vec<(u32, u32)> {
        self.by_session
            .get(&session)
            .map(|blocks| blocks.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Requested offsets within `piece`, ascending, with their lengths.
    pub(crate) fn piece_offsets(&self, piece: u32) -> Vec<(u32, u32)> {
        let mut offsets: Vec<(u32, u32)> = self
            .by_block
            .iter()
            .filter(|((p, _), _)| *p == piece)
            .map(|((_, begin), entry)| (*begin, entry.length))
            .collect();
        offsets.sort_unstable();
        offsets
    }

    /// Requests whose deadline is at or before `now`.
    pub(crate) fn expired(&self, now: Instant) -> Vec<(SessionId, BlockRef)> {
        let mut expired = Vec::new();
        for ((piece, begin), entry) in &self.by_block {
            for holder in &entry.holders {
                if holder.deadline <= now {
                    expired.push((
                        holder.session,
                        BlockRef {
                            piece: *piece,
                            begin: *begin,
                            length: entry.length,
                        },
                    ));
                }
            }
        }
        expired
    }

    /// Drops every request held by `session`, returning them.
    pub(crate) fn remove_session(&mut self, session: SessionId) -> Vec<BlockRef> {
        let Some(blocks) = self.by_session.remove(&session) else {
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(blocks.len());
        for (piece, begin) in blocks {
            if let Some(entry) = self.by_block.get_mut(&(piece, begin)) {
                entry.holders.retain(|h| h.session != session);
                removed.push(BlockRef {
                    piece,
                    begin,
                    length: entry.length,
                });
                if entry.holders.is_empty() {
                    self.by_block.remove(&(piece, begin));
                }
            }
        }
        removed
    }
}
