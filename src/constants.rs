//! Protocol constants and tuning parameters.
//!
//! Timeouts, window sizes, and intervals used across the engine live here so
//! the knobs are visible in one place. Values follow common client defaults
//! (Transmission, libtorrent) unless a comment says otherwise.

use std::time::Duration;

// ============================================================================
// Client identification
// ============================================================================

/// Client ID prefix for peer ID generation (Azureus-style).
pub const CLIENT_PREFIX: &str = "-JS0001-";

// ============================================================================
// Ports
// ============================================================================

/// Default port reported to the tracker.
pub const DEFAULT_PORT: u16 = 6881;

// ============================================================================
// Block and piece sizes
// ============================================================================

/// Standard block size (16KB). Requests are issued in blocks of this size,
/// except the final block of a piece which may be shorter.
pub const BLOCK_SIZE: u32 = 16384;

/// Maximum message size accepted on the wire (16MB).
pub const MAX_MESSAGE_SIZE: usize = 16777216;

// ============================================================================
// Connection limits
// ============================================================================

/// Maximum concurrent peer sessions.
pub const MAX_PEERS: usize = 30;

/// Maximum outstanding block requests per peer (the pipelining window).
pub const REQUEST_WINDOW: usize = 12;

/// Remaining-block threshold at which endgame mode latches on.
pub const ENDGAME_BLOCK_THRESHOLD: usize = 20;

/// Timeout/corruption strikes before a session is evicted.
pub const MAX_SESSION_STRIKES: u32 = 8;

// ============================================================================
// Timeouts
// ============================================================================

/// Combined TCP connect + handshake deadline for outbound dials.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Block request timeout; expired requests are cancelled and re-queued.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A session that has received no bytes for this long is considered dead.
pub const PEER_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Write deadline for a single outbound message.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP tracker request timeout.
pub const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Intervals
// ============================================================================

/// Keepalive message interval (sent after this much write silence).
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Fallback tracker announce interval when the tracker supplies none.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1800);

/// Dial loop tick: how often the swarm tops up its connected peer set.
pub const DIAL_INTERVAL: Duration = Duration::from_secs(5);

/// Maintenance tick: request expiry collection and strike accounting.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Tracker retry policy
// ============================================================================

/// Announce attempts per cycle before giving up until the next interval.
pub const ANNOUNCE_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for announce retry backoff (doubles per attempt).
pub const ANNOUNCE_RETRY_BASE: Duration = Duration::from_secs(1);

/// Peers requested from the tracker per announce.
pub const DEFAULT_NUMWANT: u32 = 50;

// ============================================================================
// Protocol constants
// ============================================================================

/// BitTorrent protocol string.
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// Reserved bytes in the handshake. All zero: no extensions advertised.
pub const RESERVED_BYTES: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0];
