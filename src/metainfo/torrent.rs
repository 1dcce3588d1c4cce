use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, encode};
use crate::constants::BLOCK_SIZE;

/// A parsed single-file torrent.
///
/// Constructed once at startup and shared read-only by every component.
///
/// # Examples
///
/// ```no_run
/// use skein::metainfo::TorrentMeta;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let meta = TorrentMeta::from_bytes(&data)?;
///
/// println!("{}: {} bytes in {} pieces", meta.name, meta.total_length, meta.piece_count());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TorrentMeta {
    /// HTTP tracker announce URL.
    pub announce: String,
    /// Suggested name for the output file.
    pub name: String,
    /// Bytes per piece; every piece but possibly the last has this length.
    pub piece_length: u64,
    /// Total content length in bytes.
    pub total_length: u64,
    /// SHA-1 hash of each piece, in piece order.
    pub pieces: Vec<[u8; 20]>,
    /// SHA-1 of the bencoded `info` dictionary.
    pub info_hash: InfoHash,
}

/// One piece's index, actual length, and expected hash, derived from
/// [`TorrentMeta`].
#[derive(Debug, Clone, Copy)]
pub struct PieceDescriptor {
    /// Piece index.
    pub index: u32,
    /// Actual length in bytes; the last piece may be shorter than
    /// `piece_length`.
    pub length: u64,
    /// Expected SHA-1 of the piece contents.
    pub hash: [u8; 20],
}

impl TorrentMeta {
    /// Parses a `.torrent` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid bencode, required fields
    /// are missing, the torrent is multi-file, or the piece bookkeeping is
    /// inconsistent (see [`TorrentMeta::validate`]).
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let root = decode(data)?;
        root.as_dict().ok_or(MetainfoError::InvalidField("root"))?;

        let announce = root
            .get(b"announce")
            .ok_or(MetainfoError::MissingField("announce"))?
            .as_str()
            .ok_or(MetainfoError::InvalidField("announce"))?
            .to_string();

        let info = root
            .get(b"info")
            .ok_or(MetainfoError::MissingField("info"))?;
        info.as_dict().ok_or(MetainfoError::InvalidField("info"))?;

        // The info-hash covers the canonical re-encoding of the info dict.
        let raw_info = encode(info)?;
        let info_hash = InfoHash::from_info_bytes(&raw_info);

        if info.get(b"files").is_some() {
            return Err(MetainfoError::MultiFile);
        }

        let name = info
            .get(b"name")
            .ok_or(MetainfoError::MissingField("name"))?
            .as_str()
            .ok_or(MetainfoError::InvalidField("name"))?
            .to_string();

        let piece_length = info
            .get(b"piece length")
            .ok_or(MetainfoError::MissingField("piece length"))?
            .as_integer()
            .filter(|v| *v >= 0)
            .ok_or(MetainfoError::InvalidField("piece length"))?
            as u64;

        let total_length = info
            .get(b"length")
            .ok_or(MetainfoError::MissingField("length"))?
            .as_integer()
            .filter(|v| *v >= 0)
            .ok_or(MetainfoError::InvalidField("length"))? as u64;

        let pieces_raw = info
            .get(b"pieces")
            .ok_or(MetainfoError::MissingField("pieces"))?
            .as_bytes()
            .ok_or(MetainfoError::InvalidField("pieces"))?;

        if pieces_raw.len() % 20 != 0 {
            return Err(MetainfoError::InvalidPiecesLength(pieces_raw.len()));
        }

        let pieces = pieces_raw
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let meta = Self {
            announce,
            name,
            piece_length,
            total_length,
            pieces,
            info_hash,
        };
        meta.validate()?;
        Ok(meta)
    }

    /// Builds a meta directly from its parts, validating consistency.
    ///
    /// Used by callers that already have the fields (and by tests).
    pub fn new(
        announce: String,
        name: String,
        piece_length: u64,
        total_length: u64,
        pieces: Vec<[u8; 20]>,
        info_hash: InfoHash,
    ) -> Result<Self, MetainfoError> {
        let meta = Self {
            announce,
            name,
            piece_length,
            total_length,
            pieces,
            info_hash,
        };
        meta.validate()?;
        Ok(meta)
    }

    /// Checks the piece bookkeeping invariants.
    ///
    /// A zero-length torrent has zero pieces; otherwise the hash count must
    /// equal `ceil(total_length / piece_length)`.
    pub fn validate(&self) -> Result<(), MetainfoError> {
        if self.total_length == 0 {
            if !self.pieces.is_empty() {
                return Err(MetainfoError::PieceCountMismatch {
                    expected: 0,
                    actual: self.pieces.len(),
                });
            }
            return Ok(());
        }

        if self.piece_length == 0 {
            return Err(MetainfoError::InvalidPieceLength(self.piece_length));
        }

        let expected = self.total_length.div_ceil(self.piece_length) as usize;
        if self.pieces.len() != expected {
            return Err(MetainfoError::PieceCountMismatch {
                expected,
                actual: self.pieces.len(),
            });
        }

        Ok(())
    }

    /// Number of pieces.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Actual length of piece `index`; the last piece absorbs the remainder.
    pub fn piece_size(&self, index: u32) -> u64 {
        if self.pieces.is_empty() {
            return 0;
        }
        let index = index as usize;
        if index + 1 < self.pieces.len() {
            self.piece_length
        } else {
            self.total_length - self.piece_length * (self.pieces.len() as u64 - 1)
        }
    }

    /// Number of 16KB blocks in piece `index`.
    pub fn block_count(&self, index: u32) -> u32 {
        self.piece_size(index).div_ceil(BLOCK_SIZE as u64) as u32
    }

    /// Length of the block at `begin` within piece `index`.
    pub fn block_size_at(&self, index: u32, begin: u32) -> u32 {
        let remaining = self.piece_size(index).saturating_sub(begin as u64);
        remaining.min(BLOCK_SIZE as u64) as u32
    }

    /// Descriptor for piece `index`.
    pub fn piece(&self, index: u32) -> Option<PieceDescriptor> {
        self.pieces.get(index as usize).map(|hash| PieceDescriptor {
            index,
            length: self.piece_size(index),
            hash: *hash,
        })
    }

    /// Iterator over all piece descriptors in index order.
    pub fn descriptors(&self) -> impl Iterator<Item = PieceDescriptor> + '_ {
        (0..self.pieces.len() as u32).map(|i| PieceDescriptor {
            index: i,
            length: self.piece_size(i),
            hash: self.pieces[i as usize],
        })
    }
}
