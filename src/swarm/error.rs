use thiserror::Error;

/// Fatal engine errors.
///
/// Only startup-time failures land here: a bad metainfo, an unusable
/// announce URL, or a store that cannot be initialized. Everything that
/// goes wrong after startup is confined to a session, a piece, or an
/// announce cycle and handled in place.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("metainfo error: {0}")]
    Metainfo(#[from] crate::metainfo::MetainfoError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),
}
