use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{trace, warn};

use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{Handshake, Message};
use super::peer_id::PeerId;
use super::transport::{FrameReader, FrameWriter, Transport};
use crate::constants::{CONNECT_TIMEOUT, KEEPALIVE_INTERVAL};

/// Outbound command queue depth per session.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Identifies one peer session for the lifetime of the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// An event decoded from one peer's byte stream.
///
/// Events for a session are emitted in wire order; the last event is always
/// exactly one of [`SessionEvent::Closed`] or [`SessionEvent::Failed`].
#[derive(Debug)]
pub enum SessionEvent {
    /// The peer choked us; our outstanding requests will not be served.
    Choked,
    /// The peer unchoked us; requests may now be sent.
    Unchoked,
    /// The peer wants our data.
    Interested,
    /// The peer no longer wants our data.
    NotInterested,
    /// The peer acquired a piece.
    Have { piece: u32 },
    /// The peer's full piece map, validated and sized to the torrent.
    Bitfield { bitfield: Bitfield },
    /// A block of piece data arrived.
    Block { piece: u32, begin: u32, data: Bytes },
    /// The peer asked us for a block.
    BlockRequested { piece: u32, begin: u32, length: u32 },
    /// The peer withdrew an earlier block request.
    BlockCancelled { piece: u32, begin: u32, length: u32 },
    /// The peer announced its DHT port.
    Port { port: u16 },
    /// The connection ended cleanly. Terminal.
    Closed,
    /// The session died from a protocol or transport error. Terminal.
    Failed { error: PeerError },
}

/// A command for a session's write path.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Stop serving the peer's requests.
    Choke,
    /// Resume serving the peer's requests.
    Unchoke,
    /// Tell the peer we want its data.
    Interested,
    /// Tell the peer we no longer want its data.
    NotInterested,
    /// Announce a newly verified piece.
    Have { piece: u32 },
    /// Announce our full piece map.
    Bitfield { bits: Bytes },
    /// Request a block.
    Request { piece: u32, begin: u32, length: u32 },
    /// Withdraw a pending request.
    Cancel { piece: u32, begin: u32, length: u32 },
    /// Serve a block to the peer.
    Piece { piece: u32, begin: u32, data: Bytes },
    /// Send an explicit keep-alive now.
    KeepAlive,
    /// Close the connection.
    Close,
}

/// Handle to one live peer connection.
///
/// Created by [`PeerSession::connect`], which performs the TCP dial and
/// handshake under a single deadline and then spawns the session's reader
/// and writer tasks. The reader turns the byte stream into
/// [`SessionEvent`]s on the shared swarm channel; the writer drains
/// [`SessionCommand`]s and keeps the connection alive. Dropping the handle
/// tears the session down.
pub struct PeerSession {
    id: SessionId,
    addr: SocketAddr,
    remote_id: PeerId,
    commands: mpsc::Sender<SessionCommand>,
}

impl PeerSession {
    /// Dials `addr` and completes the handshake.
    ///
    /// The whole exchange shares one deadline. The session is rejected if
    /// the peer speaks a different protocol or names a different torrent;
    /// the remote peer ID is recorded but not checked against anything.
    pub async fn connect(
        id: SessionId,
        addr: SocketAddr,
        info_hash: [u8; 20],
        local_id: PeerId,
        piece_count: usize,
        events: mpsc::Sender<(SessionId, SessionEvent)>,
    ) -> Result<Self, PeerError> {
        let (transport, theirs) = timeout(CONNECT_TIMEOUT, async {
            let stream = TcpStream::connect(addr).await?;
            let mut transport = Transport::new(stream);

            transport
                .send_handshake(&Handshake::new(info_hash, *local_id.as_bytes()))
                .await?;
            let theirs = transport.receive_handshake().await?;

            if theirs.info_hash != info_hash {
                return Err(PeerError::InfoHashMismatch);
            }

            Ok::<_, PeerError>((transport, theirs))
        })
        .await
        .map_err(|_| PeerError::Timeout)??;

        let remote_id = PeerId::from_bytes(&theirs.peer_id).ok_or(PeerError::InvalidHandshake)?;
        trace!(session = %id, %addr, peer = ?remote_id, "handshake complete");

        let (reader, writer) = transport.into_split();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (death_tx, death_rx) = mpsc::channel(1);

        tokio::spawn(run_writer(writer, commands_rx, death_tx));
        tokio::spawn(run_reader(id, piece_count, reader, events, death_rx));

        Ok(Self {
            id,
            addr,
            remote_id,
            commands: commands_tx,
        })
    }

    /// This session's swarm-local identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The remote socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The peer ID learned at handshake time.
    pub fn remote_id(&self) -> PeerId {
        self.remote_id
    }

    /// Enqueues a command on the write path.
    ///
    /// Fails with [`PeerError::ConnectionClosed`] once the session is dead,
    /// or [`PeerError::CommandBacklog`] if the peer has stopped draining
    /// its socket and the queue is full. Both are grounds for eviction.
    pub fn send(&self, command: SessionCommand) -> Result<(), PeerError> {
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => PeerError::CommandBacklog,
            TrySendError::Closed(_) => PeerError::ConnectionClosed,
        })
    }
}

async fn run_writer(
    mut writer: FrameWriter,
    mut commands: mpsc::Receiver<SessionCommand>,
    death_tx: mpsc::Sender<PeerError>,
) {
    let mut last_write = Instant::now();

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                // Queue closed: the handle was dropped or the peer asked us
                // to hang up. Dropping the write half sends FIN.
                None | Some(SessionCommand::Close) => return,
                Some(cmd) => {
                    if let Err(error) = writer.send(&command_message(cmd)).await {
                        let _ = death_tx.send(error).await;
                        return;
                    }
                    last_write = Instant::now();
                }
            },
            _ = sleep_until(last_write + KEEPALIVE_INTERVAL) => {
                if let Err(error) = writer.send(&Message::KeepAlive).await {
                    let _ = death_tx.send(error).await;
                    return;
                }
                last_write = Instant::now();
            }
        }
    }
}

fn command_message(command: SessionCommand) -> Message {
    match command {
        SessionCommand::Choke => Message::Choke,
        SessionCommand::Unchoke => Message::Unchoke,
        SessionCommand::Interested => Message::Interested,
        SessionCommand::NotInterested => Message::NotInterested,
        SessionCommand::Have { piece } => Message::Have { piece },
        SessionCommand::Bitfield { bits } => Message::Bitfield(bits),
        SessionCommand::Request {
            piece,
            begin,
            length,
        } => Message::Request {
            index: piece,
            begin,
            length,
        },
        SessionCommand::Cancel {
            piece,
            begin,
            length,
        } => Message::Cancel {
            index: piece,
            begin,
            length,
        },
        SessionCommand::Piece { piece, begin, data } => Message::Piece {
            index: piece,
            begin,
            data,
        },
        SessionCommand::KeepAlive => Message::KeepAlive,
        // Close is handled by the writer loop before encoding.
        SessionCommand::Close => Message::KeepAlive,
    }
}

async fn run_reader(
    id: SessionId,
    piece_count: usize,
    mut reader: FrameReader,
    events: mpsc::Sender<(SessionId, SessionEvent)>,
    mut death_rx: mpsc::Receiver<PeerError>,
) {
    let mut saw_data_plane = false;

    let terminal = loop {
        tokio::select! {
            death = death_rx.recv() => {
                break match death {
                    Some(error) => SessionEvent::Failed { error },
                    // Writer exited without an error: orderly teardown.
                    None => SessionEvent::Closed,
                };
            }
            result = reader.next_frame() => {
                let message = match result {
                    Ok(message) => message,
                    Err(PeerError::ConnectionClosed) => break SessionEvent::Closed,
                    Err(error) => break SessionEvent::Failed { error },
                };

                match translate(id, piece_count, message, &mut saw_data_plane) {
                    Ok(None) => {}
                    Ok(Some(event)) => {
                        if events.send((id, event)).await.is_err() {
                            // Swarm is gone; nothing left to report to.
                            return;
                        }
                    }
                    Err(error) => break SessionEvent::Failed { error },
                }
            }
        }
    };

    let _ = events.send((id, terminal)).await;
}

/// Maps a decoded message to a session event, enforcing the rules the codec
/// cannot check on its own: bitfield sizing and piece-index range.
fn translate(
    id: SessionId,
    piece_count: usize,
    message: Message,
    saw_data_plane: &mut bool,
) -> Result<Option<SessionEvent>, PeerError> {
    let check_index = |piece: u32| -> Result<(), PeerError> {
        if (piece as usize) < piece_count {
            Ok(())
        } else {
            Err(PeerError::InvalidMessage(format!(
                "piece index {} out of range",
                piece
            )))
        }
    };

    let event = match message {
        Message::KeepAlive => None,
        Message::Choke => Some(SessionEvent::Choked),
        Message::Unchoke => Some(SessionEvent::Unchoked),
        Message::Interested => Some(SessionEvent::Interested),
        Message::NotInterested => Some(SessionEvent::NotInterested),
        Message::Have { piece } => {
            check_index(piece)?;
            *saw_data_plane = true;
            Some(SessionEvent::Have { piece })
        }
        Message::Bitfield(bits) => {
            if bits.len() < Bitfield::wire_len(piece_count) {
                return Err(PeerError::InvalidMessage(format!(
                    "bitfield is {} bytes, need {}",
                    bits.len(),
                    Bitfield::wire_len(piece_count)
                )));
            }
            if *saw_data_plane {
                warn!(session = %id, "bitfield received mid-stream, replacing piece map");
            }
            Some(SessionEvent::Bitfield {
                bitfield: Bitfield::from_bytes(&bits, piece_count),
            })
        }
        Message::Request {
            index,
            begin,
            length,
        } => {
            check_index(index)?;
            *saw_data_plane = true;
            Some(SessionEvent::BlockRequested {
                piece: index,
                begin,
                length,
            })
        }
        Message::Piece { index, begin, data } => {
            check_index(index)?;
            *saw_data_plane = true;
            Some(SessionEvent::Block {
                piece: index,
                begin,
                data,
            })
        }
        Message::Cancel {
            index,
            begin,
            length,
        } => {
            check_index(index)?;
            *saw_data_plane = true;
            Some(SessionEvent::BlockCancelled {
                piece: index,
                begin,
                length,
            })
        }
        Message::Port(port) => Some(SessionEvent::Port { port }),
        Message::Unknown { id: wire_id } => {
            trace!(session = %id, id = wire_id, "ignoring unknown message id");
            None
        }
    };

    Ok(event)
}
