use thiserror::Error;

/// Errors from parsing or validating torrent metainfo.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The file is not valid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// A required dictionary field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or an unusable value.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The torrent describes multiple files, which this engine does not
    /// download.
    #[error("multi-file torrents are not supported")]
    MultiFile,

    /// `piece length` is zero or otherwise unusable.
    #[error("invalid piece length: {0}")]
    InvalidPieceLength(u64),

    /// The `pieces` string is not a whole number of 20-byte hashes.
    #[error("pieces string length {0} is not a multiple of 20")]
    InvalidPiecesLength(usize),

    /// The hash count disagrees with `length` / `piece length`.
    #[error("piece count mismatch: {actual} hashes for {expected} pieces")]
    PieceCountMismatch {
        /// Pieces implied by total length and piece length.
        expected: usize,
        /// Hashes actually present in the metainfo.
        actual: usize,
    },
}
