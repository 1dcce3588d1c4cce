use thiserror::Error;

/// Errors from tracker announces. None of these abort the swarm; the
/// announce driver retries with backoff and keeps the peers it already has.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("tracker refused announce: {0}")]
    Failure(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid tracker url: {0}")]
    InvalidUrl(String),
}
