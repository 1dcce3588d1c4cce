use thiserror::Error;

/// Errors from the piece store.
///
/// The block-validation variants mean the peer that supplied the block broke
/// protocol; I/O errors during initialization are fatal to the engine.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("block offset {begin} in piece {piece} is not block-aligned")]
    MisalignedBlock { piece: u32, begin: u32 },

    #[error("block offset {begin} is past the end of piece {piece}")]
    BlockOutOfRange { piece: u32, begin: u32 },

    #[error("block ({piece}, {begin}) is {got} bytes, expected {expected}")]
    WrongBlockLength {
        piece: u32,
        begin: u32,
        expected: u32,
        got: usize,
    },
}
