use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;
use crate::constants::{PROTOCOL_STRING, RESERVED_BYTES};

/// Length of the handshake message in bytes.
pub const HANDSHAKE_LEN: usize = 68;

/// Message type identifiers in the peer wire protocol.
///
/// Each message except the keep-alive carries a one-byte ID after the length
/// prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// Stop serving the peer's requests.
    Choke = 0,
    /// Ready to serve the peer's requests.
    Unchoke = 1,
    /// Want data from the peer.
    Interested = 2,
    /// Don't want data from the peer.
    NotInterested = 3,
    /// Announce a newly acquired piece.
    Have = 4,
    /// Announce all available pieces at once.
    Bitfield = 5,
    /// Ask for a block of data.
    Request = 6,
    /// Deliver a block of data.
    Piece = 7,
    /// Withdraw a pending request.
    Cancel = 8,
    /// DHT port announcement.
    Port = 9,
}

impl MessageId {
    /// Maps a wire byte to a known message id. Unknown ids return `None`
    /// and are tolerated by the caller, never treated as errors.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageId::Choke),
            1 => Some(MessageId::Unchoke),
            2 => Some(MessageId::Interested),
            3 => Some(MessageId::NotInterested),
            4 => Some(MessageId::Have),
            5 => Some(MessageId::Bitfield),
            6 => Some(MessageId::Request),
            7 => Some(MessageId::Piece),
            8 => Some(MessageId::Cancel),
            9 => Some(MessageId::Port),
            _ => None,
        }
    }
}

/// The BitTorrent handshake.
///
/// First message on every connection: one length byte, the protocol string,
/// eight reserved bytes (all zero here, no extensions advertised), the
/// 20-byte info-hash, and the sender's 20-byte peer ID.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The torrent's info hash.
    pub info_hash: [u8; 20],
    /// The sender's peer ID.
    pub peer_id: [u8; 20],
    /// Reserved bytes as received; ignored beyond logging.
    pub reserved: [u8; 8],
}

impl Handshake {
    /// Creates an outbound handshake with all-zero reserved bytes.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            info_hash,
            peer_id,
            reserved: RESERVED_BYTES,
        }
    }

    /// Encodes the handshake for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING.len() as u8);
        buf.put_slice(PROTOCOL_STRING.as_bytes());
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    /// Decodes a received handshake.
    ///
    /// Fails if the input is short, the length byte is wrong, or the
    /// protocol string differs.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::InvalidHandshake);
        }
        if data[0] as usize != PROTOCOL_STRING.len() || &data[1..20] != PROTOCOL_STRING.as_bytes()
        {
            return Err(PeerError::InvalidHandshake);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// A peer wire protocol message.
///
/// Messages are length-prefixed: a 4-byte big-endian length, then a 1-byte
/// message ID and payload. A length of zero is a keep-alive.
///
/// # Examples
///
/// ```
/// use skein::peer::Message;
///
/// let request = Message::Request {
///     index: 0,
///     begin: 0,
///     length: 16384,
/// };
///
/// let bytes = request.encode();
/// assert_eq!(bytes.len(), 17); // 4-byte length + 1-byte ID + 12-byte payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Empty message keeping an idle connection open.
    KeepAlive,
    /// Sender will not serve requests.
    Choke,
    /// Sender will serve requests.
    Unchoke,
    /// Sender wants data.
    Interested,
    /// Sender no longer wants data.
    NotInterested,
    /// Sender acquired a piece.
    Have { piece: u32 },
    /// All pieces the sender has, high-bit-first.
    Bitfield(Bytes),
    /// Ask for a block.
    Request { index: u32, begin: u32, length: u32 },
    /// Deliver a block.
    Piece { index: u32, begin: u32, data: Bytes },
    /// Withdraw a pending request.
    Cancel { index: u32, begin: u32, length: u32 },
    /// DHT port announcement; recorded, otherwise unused here.
    Port(u16),
    /// A message id this client does not know. Ignored, never fatal.
    Unknown { id: u8 },
}

impl Message {
    /// Encodes the message including its 4-byte length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::NotInterested as u8);
            }
            Message::Have { piece } => {
                buf.put_u32(5);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_u32(1 + bits.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.put_slice(bits);
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u32(9 + data.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u32(13);
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Port(port) => {
                buf.put_u32(3);
                buf.put_u8(MessageId::Port as u8);
                buf.put_u16(*port);
            }
            Message::Unknown { id } => {
                buf.put_u32(1);
                buf.put_u8(*id);
            }
        }

        buf.freeze()
    }

    /// Decodes one complete frame (length prefix included).
    ///
    /// Payload-length validation is strict for known ids: `have` is 4 bytes,
    /// `request`/`cancel` 12, `piece` at least 8, `port` 2, and the four
    /// flag messages are empty. Unknown ids decode to [`Message::Unknown`]
    /// with their payload discarded.
    pub fn decode(mut frame: Bytes) -> Result<Self, PeerError> {
        if frame.len() < 4 {
            return Err(PeerError::InvalidMessage("frame shorter than prefix".into()));
        }

        let length = frame.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if frame.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete frame".into()));
        }

        let id = frame.get_u8();
        let payload_len = length - 1;

        let Some(id) = MessageId::from_wire(id) else {
            return Ok(Message::Unknown { id });
        };

        let exact = |want: usize, what: &str| -> Result<(), PeerError> {
            if payload_len != want {
                Err(PeerError::InvalidMessage(format!(
                    "{} payload is {} bytes, expected {}",
                    what, payload_len, want
                )))
            } else {
                Ok(())
            }
        };

        match id {
            MessageId::Choke => {
                exact(0, "choke")?;
                Ok(Message::Choke)
            }
            MessageId::Unchoke => {
                exact(0, "unchoke")?;
                Ok(Message::Unchoke)
            }
            MessageId::Interested => {
                exact(0, "interested")?;
                Ok(Message::Interested)
            }
            MessageId::NotInterested => {
                exact(0, "not interested")?;
                Ok(Message::NotInterested)
            }
            MessageId::Have => {
                exact(4, "have")?;
                Ok(Message::Have {
                    piece: frame.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(frame.copy_to_bytes(payload_len))),
            MessageId::Request => {
                exact(12, "request")?;
                Ok(Message::Request {
                    index: frame.get_u32(),
                    begin: frame.get_u32(),
                    length: frame.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload_len < 8 {
                    return Err(PeerError::InvalidMessage(format!(
                        "piece payload is {} bytes, expected at least 8",
                        payload_len
                    )));
                }
                let index = frame.get_u32();
                let begin = frame.get_u32();
                let data = frame.copy_to_bytes(payload_len - 8);
                Ok(Message::Piece { index, begin, data })
            }
            MessageId::Cancel => {
                exact(12, "cancel")?;
                Ok(Message::Cancel {
                    index: frame.get_u32(),
                    begin: frame.get_u32(),
                    length: frame.get_u32(),
                })
            }
            MessageId::Port => {
                exact(2, "port")?;
                Ok(Message::Port(frame.get_u16()))
            }
        }
    }
}
