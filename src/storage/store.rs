use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::buffer::PieceBuffer;
use super::error::StorageError;
use crate::constants::BLOCK_SIZE;
use crate::metainfo::TorrentMeta;
use crate::peer::Bitfield;

/// What became of an ingested block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIngest {
    /// Buffered; the piece is still incomplete.
    Stored,
    /// Silently discarded: duplicate offset or the piece is already done.
    Ignored,
    /// The block completed its piece, the hash matched, and the bytes are
    /// durably on disk.
    PieceWritten { piece: u32 },
    /// The block completed its piece but the hash did not match; the buffer
    /// was discarded and the piece must be re-downloaded.
    HashFailed { piece: u32 },
    /// The piece verified but could not be written; the buffer was
    /// discarded so the piece will be re-downloaded and re-tried.
    WriteFailed { piece: u32 },
}

/// Owner of the output file and the set of verified pieces.
///
/// All ingest and completion work runs on the swarm's event loop, so writes
/// are naturally serialized. Verification is offloaded to a blocking thread.
pub struct PieceStore {
    file: File,
    meta: Arc<TorrentMeta>,
    buffers: HashMap<u32, PieceBuffer>,
    completed: HashSet<u32>,
}

impl PieceStore {
    /// Opens (creating if absent) the output file and reserves its space.
    ///
    /// When the file already has exactly the torrent's length and
    /// `verify_existing` is set, every piece is hashed up front and matching
    /// pieces count as already downloaded; unreadable pieces are treated as
    /// absent. Otherwise the file is sized to the torrent's length.
    ///
    /// Failures here are fatal to the engine.
    pub async fn open(
        path: &Path,
        meta: Arc<TorrentMeta>,
        verify_existing: bool,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await?;

        let existing_len = file.metadata().await?.len();
        let mut completed = HashSet::new();

        if verify_existing && existing_len == meta.total_length && meta.total_length > 0 {
            completed = Self::scan_existing(&mut file, &meta).await;
        } else if existing_len != meta.total_length {
            file.set_len(meta.total_length).await?;
        }

        Ok(Self {
            file,
            meta,
            buffers: HashMap::new(),
            completed,
        })
    }

    /// Hashes every piece of a size-matched existing file. Read failures
    /// mark the piece absent rather than aborting: the swarm will simply
    /// fetch it again.
    async fn scan_existing(file: &mut File, meta: &TorrentMeta) -> HashSet<u32> {
        let mut completed = HashSet::new();

        for descriptor in meta.descriptors() {
            let mut data = vec![0u8; descriptor.length as usize];
            let offset = descriptor.index as u64 * meta.piece_length;

            let read = async {
                file.seek(SeekFrom::Start(offset)).await?;
                file.read_exact(&mut data).await?;
                Ok::<_, std::io::Error>(())
            };
            if read.await.is_err() {
                continue;
            }

            let expected = descriptor.hash;
            let matched = tokio::task::spawn_blocking(move || sha1_matches(&data, &expected))
                .await
                .unwrap_or(false);
            if matched {
                completed.insert(descriptor.index);
            }

            if descriptor.index > 0 && descriptor.index % 100 == 0 {
                debug!(
                    checked = descriptor.index,
                    valid = completed.len(),
                    "verifying existing file"
                );
            }
        }

        debug!(
            valid = completed.len(),
            total = meta.piece_count(),
            "existing file scan complete"
        );
        completed
    }

    /// Ingests one block.
    ///
    /// Validation failures are the supplying peer's protocol violation:
    /// the index must be in range, `begin` block-aligned and inside the
    /// piece, and the length exactly `min(BLOCK_SIZE, piece length - begin)`.
    /// Duplicates and blocks for completed pieces are silently discarded.
    /// The last block of a piece triggers verification and the durable
    /// write; the outcome reports how that went.
    pub async fn add_block(
        &mut self,
        piece: u32,
        begin: u32,
        data: &[u8],
    ) -> Result<BlockIngest, StorageError> {
        let piece_len = match self.meta.piece(piece) {
            Some(descriptor) => descriptor.length,
            None => return Err(StorageError::InvalidPieceIndex(piece)),
        };
        if begin % BLOCK_SIZE != 0 {
            return Err(StorageError::MisalignedBlock { piece, begin });
        }
        if begin as u64 >= piece_len {
            return Err(StorageError::BlockOutOfRange { piece, begin });
        }
        let expected = self.meta.block_size_at(piece, begin);
        if data.len() != expected as usize {
            return Err(StorageError::WrongBlockLength {
                piece,
                begin,
                expected,
                got: data.len(),
            });
        }

        if self.completed.contains(&piece) {
            return Ok(BlockIngest::Ignored);
        }

        let buffer = self
            .buffers
            .entry(piece)
            .or_insert_with(|| PieceBuffer::new(piece_len as usize));
        if buffer.has(begin) {
            return Ok(BlockIngest::Ignored);
        }
        buffer.insert(begin, data);

        if buffer.received_count() < self.meta.block_count(piece) as usize {
            return Ok(BlockIngest::Stored);
        }

        self.complete_piece(piece).await
    }

    /// Verification and durable write for a fully buffered piece.
    async fn complete_piece(&mut self, piece: u32) -> Result<BlockIngest, StorageError> {
        let Some(buffer) = self.buffers.remove(&piece) else {
            return Ok(BlockIngest::Ignored);
        };
        let Some(descriptor) = self.meta.piece(piece) else {
            return Err(StorageError::InvalidPieceIndex(piece));
        };

        let expected = descriptor.hash;
        let data = buffer.into_data();
        let (data, matched) =
            tokio::task::spawn_blocking(move || {
                let ok = sha1_matches(&data, &expected);
                (data, ok)
            })
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        if !matched {
            warn!(piece, "piece failed hash verification, discarding buffer");
            return Ok(BlockIngest::HashFailed { piece });
        }

        let offset = piece as u64 * self.meta.piece_length;
        let write = async {
            self.file.seek(SeekFrom::Start(offset)).await?;
            self.file.write_all(&data).await?;
            // The piece must be durable before anyone hears it completed.
            self.file.sync_data().await?;
            Ok::<_, std::io::Error>(())
        };
        if let Err(error) = write.await {
            warn!(piece, %error, "piece write failed, discarding buffer");
            return Ok(BlockIngest::WriteFailed { piece });
        }

        self.completed.insert(piece);
        debug!(
            piece,
            done = self.completed.len(),
            total = self.meta.piece_count(),
            "piece verified and written"
        );
        Ok(BlockIngest::PieceWritten { piece })
    }

    /// Reads a verified block back from disk.
    pub async fn read_block(
        &mut self,
        piece: u32,
        begin: u32,
        length: u32,
    ) -> Result<Bytes, StorageError> {
        let piece_len = self
            .meta
            .piece(piece)
            .ok_or(StorageError::InvalidPieceIndex(piece))?
            .length;
        if begin as u64 + length as u64 > piece_len {
            return Err(StorageError::BlockOutOfRange { piece, begin });
        }

        let offset = piece as u64 * self.meta.piece_length + begin as u64;
        let mut data = vec![0u8; length as usize];
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut data).await?;
        Ok(Bytes::from(data))
    }

    /// Whether every piece has been verified and written.
    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.meta.piece_count()
    }

    /// Whether one piece is done.
    pub fn contains(&self, piece: u32) -> bool {
        self.completed.contains(&piece)
    }

    /// Number of verified pieces.
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Verified piece indices, unordered.
    pub fn completed_pieces(&self) -> impl Iterator<Item = u32> + '_ {
        self.completed.iter().copied()
    }

    /// Verified bytes on disk.
    pub fn downloaded_bytes(&self) -> u64 {
        self.completed
            .iter()
            .map(|&piece| self.meta.piece_size(piece))
            .sum()
    }

    /// Bytes still to fetch; what the tracker calls `left`.
    pub fn bytes_left(&self) -> u64 {
        self.meta.total_length - self.downloaded_bytes()
    }

    /// Our piece map, for a future `bitfield` announcement.
    pub fn bitfield(&self) -> Bitfield {
        let mut bf = Bitfield::new(self.meta.piece_count());
        for &piece in &self.completed {
            bf.set(piece as usize);
        }
        bf
    }

    /// Flushes file state on shutdown. Best-effort durability for anything
    /// the per-piece syncs already covered.
    pub async fn close(&mut self) -> Result<(), StorageError> {
        self.file.sync_all().await?;
        Ok(())
    }
}

fn sha1_matches(data: &[u8], expected: &[u8; 20]) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let actual: [u8; 20] = hasher.finalize().into();
    actual == *expected
}
