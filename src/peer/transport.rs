use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use crate::constants::{MAX_MESSAGE_SIZE, PEER_IDLE_TIMEOUT, WRITE_TIMEOUT};

/// Length-prefix framing over a fresh TCP connection.
///
/// Used whole during the handshake, then split into a [`FrameReader`] and a
/// [`FrameWriter`] so the session's read and write halves can run as
/// independent tasks.
pub struct Transport {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl Transport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    /// Sends our handshake.
    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        let data = handshake.encode();
        timeout(WRITE_TIMEOUT, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    /// Reads and decodes the peer's 68-byte handshake.
    ///
    /// The caller wraps the whole connect+handshake exchange in its own
    /// deadline, so reads here only guard against a totally silent peer.
    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        while self.read_buf.len() < HANDSHAKE_LEN {
            let n = timeout(PEER_IDLE_TIMEOUT, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    /// Splits into independent read and write halves.
    ///
    /// Bytes already buffered past the handshake stay with the reader.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            FrameReader {
                half: read_half,
                buf: self.read_buf,
            },
            FrameWriter { half: write_half },
        )
    }
}

/// The read half: accumulates bytes and yields one decoded frame at a time.
pub struct FrameReader {
    half: OwnedReadHalf,
    buf: BytesMut,
}

impl FrameReader {
    /// Reads the next complete frame and decodes it.
    ///
    /// Returns [`PeerError::Timeout`] if no bytes arrive within the idle
    /// deadline and [`PeerError::ConnectionClosed`] on EOF at a frame
    /// boundary.
    pub async fn next_frame(&mut self) -> Result<Message, PeerError> {
        self.fill_to(4).await?;

        let length =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "frame length {} exceeds cap",
                length
            )));
        }

        self.fill_to(4 + length).await?;
        let frame = self.buf.split_to(4 + length);
        Message::decode(frame.freeze())
    }

    async fn fill_to(&mut self, len: usize) -> Result<(), PeerError> {
        while self.buf.len() < len {
            let n = timeout(PEER_IDLE_TIMEOUT, self.half.read_buf(&mut self.buf))
                .await
                .map_err(|_| PeerError::Timeout)??;
            if n == 0 {
                // EOF mid-frame is a protocol violation, at a boundary it is
                // a clean close.
                return if self.buf.is_empty() {
                    Err(PeerError::ConnectionClosed)
                } else {
                    Err(PeerError::InvalidMessage("eof inside frame".into()))
                };
            }
        }
        Ok(())
    }

    /// Bytes currently buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.remaining()
    }
}

/// The write half: encodes and sends messages under a write deadline.
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    /// Encodes and sends one message.
    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode();
        timeout(WRITE_TIMEOUT, self.half.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }
}
