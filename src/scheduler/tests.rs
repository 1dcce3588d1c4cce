use std::sync::Arc;
use std::time::{Duration, Instant};

use super::*;
use crate::constants::BLOCK_SIZE;
use crate::metainfo::{InfoHash, TorrentMeta};
use crate::peer::{Bitfield, SessionId};

const A: SessionId = SessionId(1);
const B: SessionId = SessionId(2);

fn meta(piece_length: u64, total_length: u64) -> Arc<TorrentMeta> {
    let piece_count = if total_length == 0 {
        0
    } else {
        total_length.div_ceil(piece_length) as usize
    };
    Arc::new(
        TorrentMeta::new(
            "http://tracker.example/announce".into(),
            "test.bin".into(),
            piece_length,
            total_length,
            vec![[0u8; 20]; piece_count],
            InfoHash::from_bytes([0xAA; 20]),
        )
        .unwrap(),
    )
}

fn config(window: usize, endgame_threshold: usize) -> SchedulerConfig {
    SchedulerConfig {
        window,
        endgame_threshold,
        request_timeout: Duration::from_secs(30),
    }
}

fn full_bitfield(piece_count: usize) -> Bitfield {
    let mut bf = Bitfield::new(piece_count);
    for i in 0..piece_count {
        bf.set(i);
    }
    bf
}

fn bitfield_of(piece_count: usize, pieces: &[usize]) -> Bitfield {
    let mut bf = Bitfield::new(piece_count);
    for &i in pieces {
        bf.set(i);
    }
    bf
}

/// Session A advertises {0,1}, B advertises {1,2}: piece 1 has availability
/// 2, pieces 0 and 2 have availability 1. A must start on piece 0, B on
/// piece 2, and piece 1 waits until a rarer piece completes.
#[test]
fn test_rarest_first_ordering() {
    // 3 pieces of 4 blocks each.
    let meta = meta(4 * BLOCK_SIZE as u64, 12 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(4, 1));
    let now = Instant::now();

    sched.add_session(A);
    sched.add_session(B);
    sched.set_bitfield(A, bitfield_of(3, &[0, 1]));
    sched.set_bitfield(B, bitfield_of(3, &[1, 2]));

    assert_eq!(sched.availability_of(0), 1);
    assert_eq!(sched.availability_of(1), 2);
    assert_eq!(sched.availability_of(2), 1);

    sched.set_unchoked(A);
    sched.set_unchoked(B);

    let to_a = sched.fill_requests(A, now);
    assert_eq!(to_a.len(), 4);
    assert!(to_a.iter().all(|b| b.piece == 0), "A starts on piece 0");
    assert_eq!(to_a[0].begin, 0);
    assert_eq!(to_a[1].begin, BLOCK_SIZE);

    let to_b = sched.fill_requests(B, now);
    assert_eq!(to_b.len(), 4);
    assert!(to_b.iter().all(|b| b.piece == 2), "B starts on piece 2");

    // Complete piece 0; A may now move to piece 1.
    for block in &to_a {
        assert!(sched.block_arrived(A, block.piece, block.begin).is_empty());
    }
    assert!(sched.piece_completed(0).is_empty());

    let to_a = sched.fill_requests(A, now);
    assert!(!to_a.is_empty());
    assert!(to_a.iter().all(|b| b.piece == 1), "A moves to piece 1");
}

#[test]
fn test_window_caps_inflight() {
    let meta = meta(4 * BLOCK_SIZE as u64, 40 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(12, 1));
    let now = Instant::now();

    sched.add_session(A);
    sched.set_bitfield(A, full_bitfield(10));
    sched.set_unchoked(A);

    let issued = sched.fill_requests(A, now);
    assert_eq!(issued.len(), 12);
    assert_eq!(sched.inflight(A), 12);

    // Nothing more until the pipeline drains.
    assert!(sched.fill_requests(A, now).is_empty());

    let first = issued[0];
    sched.block_arrived(A, first.piece, first.begin);
    assert_eq!(sched.inflight(A), 11);
    assert_eq!(sched.fill_requests(A, now).len(), 1);
}

#[test]
fn test_choked_sessions_get_nothing() {
    let meta = meta(4 * BLOCK_SIZE as u64, 8 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(4, 1));

    sched.add_session(A);
    sched.set_bitfield(A, full_bitfield(2));

    // Initial state is choked.
    assert!(sched.fill_requests(A, Instant::now()).is_empty());
}

#[test]
fn test_choke_recycles_inflight_locally() {
    let meta = meta(4 * BLOCK_SIZE as u64, 8 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(4, 1));
    let now = Instant::now();

    sched.add_session(A);
    sched.set_bitfield(A, full_bitfield(2));
    sched.set_unchoked(A);

    let issued = sched.fill_requests(A, now);
    assert_eq!(issued.len(), 4);

    sched.set_choked(A);
    assert_eq!(sched.inflight(A), 0);

    // Unchoked again: the same blocks are schedulable.
    sched.set_unchoked(A);
    let again = sched.fill_requests(A, now);
    assert_eq!(again.len(), 4);
    assert_eq!(again, issued);
}

/// With 15 blocks outstanding and a threshold of 20, endgame latches at the
/// first scheduling pass; both sessions hold the same blocks, and the first
/// arrival cancels the duplicate.
#[test]
fn test_endgame_duplication_and_cancel() {
    // 5 pieces of 3 blocks: 15 blocks total, below the threshold.
    let meta = meta(3 * BLOCK_SIZE as u64, 15 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(20, 20));
    let now = Instant::now();

    sched.add_session(A);
    sched.add_session(B);
    sched.set_bitfield(A, full_bitfield(5));
    sched.set_bitfield(B, full_bitfield(5));
    sched.set_unchoked(A);
    sched.set_unchoked(B);

    let to_a = sched.fill_requests(A, now);
    assert_eq!(to_a.len(), 15);
    assert!(sched.is_endgame());

    // B duplicates A's outstanding requests.
    let to_b = sched.fill_requests(B, now);
    assert_eq!(to_b.len(), 15);
    let mut a_sorted: Vec<_> = to_a.iter().map(|b| (b.piece, b.begin)).collect();
    let mut b_sorted: Vec<_> = to_b.iter().map(|b| (b.piece, b.begin)).collect();
    a_sorted.sort_unstable();
    b_sorted.sort_unstable();
    assert_eq!(a_sorted, b_sorted);

    // First arrival from A cancels B's duplicate and decrements B's count.
    let first = to_a[0];
    let cancels = sched.block_arrived(A, first.piece, first.begin);
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].0, B);
    assert_eq!(cancels[0].1.piece, first.piece);
    assert_eq!(cancels[0].1.begin, first.begin);
    assert_eq!(sched.inflight(B), 14);
}

#[test]
fn test_endgame_latches_permanently() {
    // 30 blocks; threshold 20.
    let meta = meta(2 * BLOCK_SIZE as u64, 30 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta.clone(), [], config(64, 20));
    let now = Instant::now();

    sched.add_session(A);
    sched.set_bitfield(A, full_bitfield(15));
    sched.set_unchoked(A);
    assert!(!sched.is_endgame());

    let issued = sched.fill_requests(A, now);
    assert_eq!(issued.len(), 30);
    assert!(!sched.is_endgame(), "assignment alone does not shrink the pool");

    // Deliver 10 blocks: 20 remain, endgame latches.
    for block in issued.iter().take(10) {
        sched.block_arrived(A, block.piece, block.begin);
    }
    assert_eq!(sched.remaining_blocks(), 20);
    assert!(sched.is_endgame());

    // A hash failure pushes the count back up; the latch stays on.
    sched.piece_failed(0);
    assert!(sched.remaining_blocks() > 20);
    assert!(sched.is_endgame());
}

/// Scenario: a request issued at t=0 with no answer by t=30s is collected by
/// the maintenance pass, cancelled, and its block returned to needed.
#[test]
fn test_request_timeout_recycles_block() {
    let meta = meta(4 * BLOCK_SIZE as u64, 16 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(2, 1));
    let t0 = Instant::now();

    sched.add_session(A);
    sched.set_bitfield(A, full_bitfield(4));
    sched.set_unchoked(A);

    let issued = sched.fill_requests(A, t0);
    assert_eq!(issued.len(), 2);

    // Nothing expires before the deadline.
    assert!(sched.expire(t0 + Duration::from_secs(29)).is_empty());

    let expired = sched.expire(t0 + Duration::from_secs(31));
    assert_eq!(expired.len(), 2);
    assert!(expired.iter().all(|(s, _)| *s == A));
    assert_eq!(sched.inflight(A), 0);

    // The same blocks are assignable again.
    let reissued = sched.fill_requests(A, t0 + Duration::from_secs(31));
    assert_eq!(reissued.len(), 2);
    let mut first: Vec<_> = issued.iter().map(|b| (b.piece, b.begin)).collect();
    let mut second: Vec<_> = reissued.iter().map(|b| (b.piece, b.begin)).collect();
    first.sort_unstable();
    second.sort_unstable();
    assert_eq!(first, second);
}

#[test]
fn test_availability_tracks_sessions() {
    let meta = meta(4 * BLOCK_SIZE as u64, 16 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(4, 1));

    sched.add_session(A);
    sched.add_session(B);
    sched.set_bitfield(A, bitfield_of(4, &[0, 1]));
    sched.set_bitfield(B, bitfield_of(4, &[1]));

    assert_eq!(sched.availability_of(0), 1);
    assert_eq!(sched.availability_of(1), 2);
    assert_eq!(sched.availability_of(3), 0);

    // A have only counts once.
    sched.add_have(B, 0);
    sched.add_have(B, 0);
    assert_eq!(sched.availability_of(0), 2);

    sched.remove_session(A);
    assert_eq!(sched.availability_of(0), 1);
    assert_eq!(sched.availability_of(1), 1);
}

#[test]
fn test_session_removal_recycles_blocks() {
    let meta = meta(4 * BLOCK_SIZE as u64, 8 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(8, 1));
    let now = Instant::now();

    sched.add_session(A);
    sched.add_session(B);
    sched.set_bitfield(A, full_bitfield(2));
    sched.set_bitfield(B, full_bitfield(2));
    sched.set_unchoked(A);
    sched.set_unchoked(B);

    let issued = sched.fill_requests(A, now);
    assert_eq!(issued.len(), 8);
    assert!(sched.fill_requests(B, now).is_empty(), "nothing left for B");

    sched.remove_session(A);

    let to_b = sched.fill_requests(B, now);
    assert_eq!(to_b.len(), 8, "A's blocks recycled to B");
}

#[test]
fn test_piece_failed_resets_blocks() {
    let meta = meta(4 * BLOCK_SIZE as u64, 8 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(8, 1));
    let now = Instant::now();

    sched.add_session(A);
    sched.set_bitfield(A, full_bitfield(2));
    sched.set_unchoked(A);

    let issued = sched.fill_requests(A, now);
    let piece0: Vec<_> = issued.iter().filter(|b| b.piece == 0).collect();
    assert_eq!(piece0.len(), 4);
    for block in &piece0 {
        sched.block_arrived(A, block.piece, block.begin);
    }

    // The store found a bad hash; the whole piece is schedulable again.
    sched.piece_failed(0);
    let reissued = sched.fill_requests(A, now);
    assert_eq!(
        reissued.iter().filter(|b| b.piece == 0).count(),
        4,
        "all four blocks of piece 0 reissued"
    );
}

#[test]
fn test_piece_completed_sweeps_duplicates() {
    // Tiny torrent: endgame from the start.
    let meta = meta(2 * BLOCK_SIZE as u64, 4 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [], config(8, 20));
    let now = Instant::now();

    sched.add_session(A);
    sched.add_session(B);
    sched.set_bitfield(A, full_bitfield(2));
    sched.set_bitfield(B, full_bitfield(2));
    sched.set_unchoked(A);
    sched.set_unchoked(B);

    sched.fill_requests(A, now);
    sched.fill_requests(B, now);
    assert!(sched.is_endgame());

    // Piece 0's blocks arrive from A; duplicates to B are cancelled as they
    // land, so completion finds nothing left to sweep.
    let cancels = sched.block_arrived(A, 0, 0);
    assert_eq!(cancels.len(), 1);
    let cancels = sched.block_arrived(A, 0, BLOCK_SIZE);
    assert_eq!(cancels.len(), 1);
    assert!(sched.piece_completed(0).is_empty());

    // Completed pieces never schedule again.
    let more = sched.fill_requests(A, now);
    assert!(more.iter().all(|b| b.piece != 0));
}

#[test]
fn test_completed_pieces_excluded_at_startup() {
    let meta = meta(4 * BLOCK_SIZE as u64, 16 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [0, 2], config(32, 1));
    let now = Instant::now();

    sched.add_session(A);
    sched.set_bitfield(A, full_bitfield(4));
    sched.set_unchoked(A);

    let issued = sched.fill_requests(A, now);
    assert_eq!(issued.len(), 8);
    assert!(issued.iter().all(|b| b.piece == 1 || b.piece == 3));
}

#[test]
fn test_wants_from() {
    let meta = meta(4 * BLOCK_SIZE as u64, 16 * BLOCK_SIZE as u64);
    let mut sched = Scheduler::new(meta, [0], config(4, 1));

    sched.add_session(A);
    assert!(!sched.wants_from(A), "empty bitfield offers nothing");

    sched.set_bitfield(A, bitfield_of(4, &[0]));
    assert!(!sched.wants_from(A), "only a piece we already have");

    sched.add_have(A, 2);
    assert!(sched.wants_from(A));

    sched.piece_completed(2);
    assert!(!sched.wants_from(A));
}

#[test]
fn test_last_block_length_short() {
    // One piece of 20000 bytes: second block is 3616 bytes.
    let meta = meta(32 * 1024, 20_000);
    let mut sched = Scheduler::new(meta, [], config(4, 1));
    let now = Instant::now();

    sched.add_session(A);
    sched.set_bitfield(A, full_bitfield(1));
    sched.set_unchoked(A);

    let issued = sched.fill_requests(A, now);
    assert_eq!(issued.len(), 2);
    assert_eq!(issued[0].length, BLOCK_SIZE);
    assert_eq!(issued[1].begin, BLOCK_SIZE);
    assert_eq!(issued[1].length, 3616);
}
