use std::fmt::Write as _;

use reqwest::Client;
use tracing::{debug, warn};

use super::error::TrackerError;
use super::response::{parse_announce_response, AnnounceResponse, TrackerEvent};
use crate::constants::TRACKER_TIMEOUT;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

/// Parameters for one announce request.
#[derive(Debug, Clone)]
pub struct Announce {
    /// Torrent identity.
    pub info_hash: InfoHash,
    /// Our process-lifetime peer ID.
    pub peer_id: PeerId,
    /// Port we claim to accept connections on.
    pub port: u16,
    /// Bytes uploaded this run. Always zero for a download-only client.
    pub uploaded: u64,
    /// Verified bytes downloaded this run.
    pub downloaded: u64,
    /// Bytes still missing.
    pub left: u64,
    /// Lifecycle event, if any.
    pub event: TrackerEvent,
    /// How many peers we would like back.
    pub numwant: u32,
}

/// An HTTP tracker client.
///
/// # Examples
///
/// ```no_run
/// use skein::tracker::{Announce, HttpTracker, TrackerEvent};
/// use skein::metainfo::InfoHash;
/// use skein::peer::PeerId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let tracker = HttpTracker::new("http://tracker.example.com/announce")?;
/// let response = tracker
///     .announce(&Announce {
///         info_hash: InfoHash::from_bytes([0u8; 20]),
///         peer_id: PeerId::generate(),
///         port: 6881,
///         uploaded: 0,
///         downloaded: 0,
///         left: 1000,
///         event: TrackerEvent::Started,
///         numwant: 50,
///     })
///     .await?;
///
/// println!("{} peers, next announce in {}s", response.peers.len(), response.interval);
/// # Ok(())
/// # }
/// ```
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    /// Builds a client for `url`. Only `http`/`https` URLs are usable.
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(TRACKER_TIMEOUT)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Performs one announce and parses the response.
    pub async fn announce(&self, request: &Announce) -> Result<AnnounceResponse, TrackerError> {
        let url = build_announce_url(&self.url, request);
        debug!(event = request.event.as_str(), "tracker announce");

        let response = self.client.get(&url).send().await?;
        let body = response.bytes().await?;
        let parsed = parse_announce_response(&body)?;

        if let Some(warning) = &parsed.warning_message {
            warn!(warning, "tracker warning");
        }

        Ok(parsed)
    }

    /// The announce URL this client talks to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Assembles the announce URL with every query parameter in place.
pub(crate) fn build_announce_url(base: &str, request: &Announce) -> String {
    let mut url = format!(
        "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&numwant={}",
        base,
        request.info_hash.url_encode(),
        request.peer_id.url_encode(),
        request.port,
        request.uploaded,
        request.downloaded,
        request.left,
        request.numwant,
    );

    let event = request.event.as_str();
    if !event.is_empty() {
        let _ = write!(url, "&event={}", event);
    }

    url
}
