//! Peer wire protocol (BEP-3).
//!
//! This module implements the downloader's half of the BitTorrent peer
//! protocol: the 68-byte handshake, the length-prefixed message codec, and
//! [`PeerSession`], which turns one TCP connection into a serialized stream
//! of typed events and accepts typed commands for the write path.

mod bitfield;
mod error;
mod message;
mod peer_id;
mod rate;
mod session;
mod transport;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use message::{Handshake, Message, MessageId, HANDSHAKE_LEN};
pub use peer_id::PeerId;
pub use rate::RateEstimator;
pub use session::{PeerSession, SessionCommand, SessionEvent, SessionId};
pub use transport::{FrameReader, FrameWriter, Transport};
