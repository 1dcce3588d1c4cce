//! skein - a download-only BitTorrent v1 engine
//!
//! Fetches single-file torrents over TCP from peers discovered through HTTP
//! trackers. The swarm engine keeps many concurrent peer sessions, schedules
//! block requests rarest-first with pipelining and endgame duplication, and
//! verifies every piece against its SHA-1 hash before writing it durably at
//! its offset in the output file.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode encoding/decoding
//! - [`metainfo`] - Single-file v1 torrent metainfo
//! - [`tracker`] - HTTP tracker announces
//! - [`peer`] - Peer wire protocol and sessions
//! - [`scheduler`] - Rarest-first block request scheduling
//! - [`storage`] - Piece assembly, verification, and disk persistence
//! - [`swarm`] - The orchestrator gluing it all together
//!
//! # Example
//!
//! ```no_run
//! use skein::metainfo::TorrentMeta;
//! use skein::swarm::{Swarm, SwarmConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let meta = TorrentMeta::from_bytes(&std::fs::read("example.torrent")?)?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! Swarm::new(meta, SwarmConfig::default()).run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod constants;
pub mod metainfo;
pub mod peer;
pub mod scheduler;
pub mod storage;
pub mod swarm;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use metainfo::{InfoHash, MetainfoError, PieceDescriptor, TorrentMeta};
pub use peer::{
    Bitfield, Handshake, Message, PeerError, PeerId, PeerSession, SessionCommand, SessionEvent,
    SessionId,
};
pub use scheduler::{BlockRef, Scheduler, SchedulerConfig};
pub use storage::{BlockIngest, PieceStore, StorageError};
pub use swarm::{Swarm, SwarmConfig, SwarmError};
pub use tracker::{AnnounceResponse, HttpTracker, TrackerError, TrackerEvent};
