use std::net::{Ipv4Addr, SocketAddrV4};

use crate::bencode::decode;

use super::error::TrackerError;

/// The optional `event` parameter of an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Periodic re-announce; no event parameter is sent.
    None,
    /// First announce of a run.
    Started,
    /// Final announce at shutdown.
    Stopped,
    /// One-time announce when the download finishes.
    Completed,
}

impl TrackerEvent {
    /// The wire value; empty for [`TrackerEvent::None`].
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

/// A parsed announce response.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds until the next periodic announce.
    pub interval: u32,
    /// Tracker-imposed floor on announce frequency.
    pub min_interval: Option<u32>,
    /// Seeders in the swarm, if reported.
    pub complete: Option<u32>,
    /// Leechers in the swarm, if reported.
    pub incomplete: Option<u32>,
    /// Opaque ID to echo back, if the tracker uses one.
    pub tracker_id: Option<String>,
    /// Human-readable warning; the announce still succeeded.
    pub warning_message: Option<String>,
    /// IPv4 peers to dial.
    pub peers: Vec<SocketAddrV4>,
}

/// Parses a bencoded announce response body.
///
/// Accepts both peer formats: the compact byte string (6 bytes per peer,
/// IPv4 + big-endian port) and the list of `{ip, port}` dictionaries.
/// An explicit `failure reason` becomes [`TrackerError::Failure`].
pub fn parse_announce_response(body: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let value = decode(body)?;
    value
        .as_dict()
        .ok_or_else(|| TrackerError::InvalidResponse("response is not a dict".into()))?;

    if let Some(reason) = value.get(b"failure reason").and_then(|v| v.as_str()) {
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let interval = value
        .get(b"interval")
        .and_then(|v| v.as_integer())
        .filter(|v| *v > 0)
        .ok_or_else(|| TrackerError::InvalidResponse("missing interval".into()))?
        as u32;

    let mut peers = Vec::new();
    match value.get(b"peers") {
        Some(list) if list.as_list().is_some() => {
            for entry in list.as_list().unwrap_or_default() {
                let ip = entry
                    .get(b"ip")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<Ipv4Addr>().ok());
                let port = entry
                    .get(b"port")
                    .and_then(|v| v.as_integer())
                    .filter(|p| (1..=u16::MAX as i64).contains(p));
                if let (Some(ip), Some(port)) = (ip, port) {
                    peers.push(SocketAddrV4::new(ip, port as u16));
                }
            }
        }
        Some(compact) => {
            let bytes = compact
                .as_bytes()
                .ok_or_else(|| TrackerError::InvalidResponse("unusable peers field".into()))?;
            peers = parse_compact_peers(bytes);
        }
        None => {}
    }

    Ok(AnnounceResponse {
        interval,
        min_interval: value
            .get(b"min interval")
            .and_then(|v| v.as_integer())
            .map(|v| v as u32),
        complete: value
            .get(b"complete")
            .and_then(|v| v.as_integer())
            .map(|v| v as u32),
        incomplete: value
            .get(b"incomplete")
            .and_then(|v| v.as_integer())
            .map(|v| v as u32),
        tracker_id: value
            .get(b"tracker id")
            .and_then(|v| v.as_str())
            .map(String::from),
        warning_message: value
            .get(b"warning message")
            .and_then(|v| v.as_str())
            .map(String::from),
        peers,
    })
}

/// Parses the compact peer format: 4 IP bytes + 2 port bytes per peer.
/// A trailing partial chunk is ignored.
pub(crate) fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddrV4> {
    data.chunks_exact(6)
        .map(|chunk| {
            SocketAddrV4::new(
                Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                u16::from_be_bytes([chunk[4], chunk[5]]),
            )
        })
        .collect()
}
