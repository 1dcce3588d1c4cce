use std::net::SocketAddrV4;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{ANNOUNCE_RETRY_ATTEMPTS, ANNOUNCE_RETRY_BASE};
use crate::metainfo::InfoHash;
use crate::peer::PeerId;
use crate::tracker::{Announce, HttpTracker, TrackerError, TrackerEvent};

/// Drives the tracker announce schedule for one swarm.
///
/// Each cycle retries with exponential backoff before giving up; a failed
/// cycle never aborts the swarm and never clears the peers already known.
/// The effective re-announce interval follows the tracker's `interval`
/// (floored by `min interval` when present).
pub(crate) struct Announcer {
    tracker: HttpTracker,
    info_hash: InfoHash,
    peer_id: PeerId,
    port: u16,
    numwant: u32,
    interval: Duration,
}

impl Announcer {
    pub(crate) fn new(
        tracker: HttpTracker,
        info_hash: InfoHash,
        peer_id: PeerId,
        port: u16,
        numwant: u32,
        fallback_interval: Duration,
    ) -> Self {
        Self {
            tracker,
            info_hash,
            peer_id,
            port,
            numwant,
            interval: fallback_interval,
        }
    }

    /// Seconds to wait until the next periodic announce.
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one announce cycle, retrying on failure.
    ///
    /// Returns the peer addresses from the tracker on success; the caller
    /// merges them into its known set.
    pub(crate) async fn announce(
        &mut self,
        event: TrackerEvent,
        downloaded: u64,
        left: u64,
    ) -> Result<Vec<SocketAddrV4>, TrackerError> {
        let request = Announce {
            info_hash: self.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: 0,
            downloaded,
            left,
            event,
            numwant: self.numwant,
        };

        let mut last_error = None;
        for attempt in 0..ANNOUNCE_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(retry_delay(attempt - 1)).await;
            }

            match self.tracker.announce(&request).await {
                Ok(response) => {
                    let mut interval = Duration::from_secs(response.interval as u64);
                    if let Some(min) = response.min_interval {
                        interval = interval.max(Duration::from_secs(min as u64));
                    }
                    self.interval = interval;

                    debug!(
                        peers = response.peers.len(),
                        interval = interval.as_secs(),
                        seeders = response.complete,
                        leechers = response.incomplete,
                        "announce ok"
                    );
                    return Ok(response.peers);
                }
                Err(error) => {
                    warn!(attempt, %error, "announce attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| TrackerError::InvalidResponse("no attempts made".into())))
    }
}

/// Backoff before retry `attempt + 1`: the base delay doubled per attempt.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    ANNOUNCE_RETRY_BASE * 2u32.saturating_pow(attempt)
}
