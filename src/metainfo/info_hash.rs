use std::fmt;

use sha1::{Digest, Sha1};

/// The 20-byte SHA-1 of a torrent's bencoded `info` dictionary.
///
/// The info-hash is the swarm identity: it names the torrent to the tracker
/// and authenticates both sides of the peer handshake.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Wraps raw hash bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Hashes the bencoded `info` dictionary bytes.
    pub fn from_info_bytes(info: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(info);
        Self(hasher.finalize().into())
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hexadecimal form.
    pub fn to_hex(&self) -> String {
        self.0.iter().fold(String::with_capacity(40), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
    }

    /// Percent-encodes every byte for use in a tracker announce URL.
    pub fn url_encode(&self) -> String {
        self.0.iter().fold(String::with_capacity(60), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "%{:02x}", b);
            s
        })
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
