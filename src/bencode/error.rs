use thiserror::Error;

/// Errors produced while decoding or encoding bencode data.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// The input ended in the middle of a value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A byte that cannot start or continue a value at this position.
    #[error("unexpected byte {0:?}")]
    UnexpectedByte(char),

    /// An integer with a non-canonical or unparseable body.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A byte-string length that is not a decimal number.
    #[error("invalid string length")]
    InvalidStringLength,

    /// A dictionary key that is not a byte string.
    #[error("dictionary key is not a byte string")]
    NonStringKey,

    /// Nesting deeper than the decoder is willing to follow.
    #[error("nesting too deep")]
    NestingTooDeep,

    /// Bytes left over after a complete value.
    #[error("trailing data after value")]
    TrailingData,

    /// I/O failure while encoding.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
