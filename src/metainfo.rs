//! Torrent metainfo (BEP-3, single-file v1).
//!
//! Parses `.torrent` files into [`TorrentMeta`], the immutable description
//! every other component shares: announce URL, content name, total length,
//! piece length, the ordered piece hashes, and the info-hash. Multi-file and
//! v2 torrents are rejected at parse time.

mod error;
mod info_hash;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::{PieceDescriptor, TorrentMeta};

#[cfg(test)]
mod tests;
