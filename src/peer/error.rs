use thiserror::Error;

/// Errors that can occur during peer communication.
///
/// Every variant is fatal to its session: the socket is closed and exactly
/// one terminal event is delivered. Reconnection is the swarm's concern.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's handshake is malformed or uses a different protocol.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer's handshake names a different torrent.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// A frame violated the protocol's framing or payload-length rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connect, handshake, read, or write deadline expired.
    #[error("timeout")]
    Timeout,

    /// The session's command queue overflowed; the peer is not draining
    /// its socket fast enough to keep.
    #[error("command backlog")]
    CommandBacklog,
}
