//! HTTP tracker protocol (BEP-3).
//!
//! Builds announce requests with the raw info-hash and peer-id
//! percent-encoded, and parses the bencoded response: the re-announce
//! interval, swarm counters, and the peer list in either compact or
//! dictionary form. Only IPv4 peers are used.

mod error;
mod http;
mod response;

pub use error::TrackerError;
pub use http::{Announce, HttpTracker};
pub use response::{parse_announce_response, AnnounceResponse, TrackerEvent};
