use super::*;
use sha1::{Digest, Sha1};

fn single_file_torrent(length: u64, piece_length: u64, piece_count: usize) -> Vec<u8> {
    let mut pieces = Vec::with_capacity(piece_count * 20);
    for i in 0..piece_count {
        pieces.extend([i as u8; 20]);
    }

    let mut data = Vec::new();
    data.extend(b"d8:announce31:http://tracker.example/announce4:infod6:lengthi");
    data.extend(length.to_string().as_bytes());
    data.extend(b"e4:name8:test.bin12:piece lengthi");
    data.extend(piece_length.to_string().as_bytes());
    data.extend(b"e6:pieces");
    data.extend(pieces.len().to_string().as_bytes());
    data.push(b':');
    data.extend(&pieces);
    data.extend(b"ee");
    data
}

fn dummy_meta(total_length: u64, piece_length: u64, piece_count: usize) -> TorrentMeta {
    TorrentMeta::new(
        "http://tracker.example/announce".into(),
        "test.bin".into(),
        piece_length,
        total_length,
        vec![[0u8; 20]; piece_count],
        InfoHash::from_bytes([0xAA; 20]),
    )
    .unwrap()
}

#[test]
fn test_parse_single_file() {
    let data = single_file_torrent(100_000, 16384, 7);
    let meta = TorrentMeta::from_bytes(&data).unwrap();

    assert_eq!(meta.announce, "http://tracker.example/announce");
    assert_eq!(meta.name, "test.bin");
    assert_eq!(meta.total_length, 100_000);
    assert_eq!(meta.piece_length, 16384);
    assert_eq!(meta.piece_count(), 7);
}

#[test]
fn test_info_hash_covers_info_dict() {
    let data = single_file_torrent(16384, 16384, 1);
    let meta = TorrentMeta::from_bytes(&data).unwrap();

    // The hash must equal SHA-1 over the raw info dict slice.
    let start = data.windows(4).position(|w| w == b"info").unwrap() + 4;
    let end = data.len() - 1; // trailing 'e' of the root dict
    let mut hasher = Sha1::new();
    hasher.update(&data[start..end]);
    let expected: [u8; 20] = hasher.finalize().into();

    assert_eq!(meta.info_hash.as_bytes(), &expected);
}

#[test]
fn test_rejects_multi_file() {
    let data = b"d8:announce4:http4:infod5:filesld6:lengthi5e4:pathl1:aeee4:name1:a12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
    assert!(matches!(
        TorrentMeta::from_bytes(data),
        Err(MetainfoError::MultiFile)
    ));
}

#[test]
fn test_rejects_missing_announce() {
    let data = b"d4:infod6:lengthi1e4:name1:a12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
    assert!(matches!(
        TorrentMeta::from_bytes(data),
        Err(MetainfoError::MissingField("announce"))
    ));
}

#[test]
fn test_rejects_bad_pieces_length() {
    let data = single_file_torrent(16384, 16384, 1);
    // Claim 19 bytes of pieces: the 20th hash byte lands where the parser
    // expects the next dictionary key.
    let text = String::from_utf8_lossy(&data).replace("6:pieces20:", "6:pieces19:");
    assert!(TorrentMeta::from_bytes(text.as_bytes()).is_err());
}

#[test]
fn test_rejects_piece_count_mismatch() {
    let result = TorrentMeta::new(
        "http://t/a".into(),
        "x".into(),
        16384,
        100_000, // needs 7 pieces
        vec![[0u8; 20]; 3],
        InfoHash::from_bytes([0; 20]),
    );
    assert!(matches!(
        result,
        Err(MetainfoError::PieceCountMismatch {
            expected: 7,
            actual: 3
        })
    ));
}

#[test]
fn test_rejects_zero_piece_length() {
    let result = TorrentMeta::new(
        "http://t/a".into(),
        "x".into(),
        0,
        10,
        vec![[0u8; 20]],
        InfoHash::from_bytes([0; 20]),
    );
    assert!(matches!(result, Err(MetainfoError::InvalidPieceLength(0))));
}

#[test]
fn test_zero_length_torrent_has_no_pieces() {
    let meta = dummy_meta(0, 16384, 0);
    assert_eq!(meta.piece_count(), 0);
    assert_eq!(meta.piece_size(0), 0);
    assert!(meta.piece(0).is_none());
}

#[test]
fn test_piece_arithmetic_short_tail() {
    // 3 pieces of 32KB, last piece 10 bytes; last block 10 bytes.
    let meta = dummy_meta(65_546, 32_768, 3);

    assert_eq!(meta.piece_size(0), 32_768);
    assert_eq!(meta.piece_size(1), 32_768);
    assert_eq!(meta.piece_size(2), 10);

    assert_eq!(meta.block_count(0), 2);
    assert_eq!(meta.block_count(2), 1);

    assert_eq!(meta.block_size_at(0, 0), 16_384);
    assert_eq!(meta.block_size_at(0, 16_384), 16_384);
    assert_eq!(meta.block_size_at(2, 0), 10);
}

#[test]
fn test_one_block_torrent() {
    let meta = dummy_meta(16_384, 16_384, 1);
    assert_eq!(meta.piece_count(), 1);
    assert_eq!(meta.piece_size(0), 16_384);
    assert_eq!(meta.block_count(0), 1);
    assert_eq!(meta.block_size_at(0, 0), 16_384);
}

#[test]
fn test_last_block_shorter_than_block_size() {
    // One piece of 20000 bytes: blocks are 16384 then 3616.
    let meta = dummy_meta(20_000, 32_768, 1);
    assert_eq!(meta.block_count(0), 2);
    assert_eq!(meta.block_size_at(0, 0), 16_384);
    assert_eq!(meta.block_size_at(0, 16_384), 3_616);
}

#[test]
fn test_descriptors_cover_all_pieces() {
    let meta = dummy_meta(100_000, 16_384, 7);
    let descriptors: Vec<_> = meta.descriptors().collect();
    assert_eq!(descriptors.len(), 7);
    assert_eq!(descriptors[6].length, 100_000 - 6 * 16_384);
    let total: u64 = descriptors.iter().map(|d| d.length).sum();
    assert_eq!(total, meta.total_length);
}
