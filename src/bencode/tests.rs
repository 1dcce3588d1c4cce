use super::*;
use bytes::Bytes;
use std::collections::BTreeMap;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap().as_integer(), Some(42));
    assert_eq!(decode(b"i-7e").unwrap().as_integer(), Some(-7));
    assert_eq!(decode(b"i0e").unwrap().as_integer(), Some(0));
}

#[test]
fn test_decode_integer_rejects_non_canonical() {
    assert!(decode(b"i-0e").is_err());
    assert!(decode(b"i042e").is_err());
    assert!(decode(b"ie").is_err());
    assert!(decode(b"i12").is_err());
}

#[test]
fn test_decode_string() {
    let value = decode(b"5:hello").unwrap();
    assert_eq!(value.as_str(), Some("hello"));

    let empty = decode(b"0:").unwrap();
    assert_eq!(empty.as_bytes().map(|b| b.len()), Some(0));
}

#[test]
fn test_decode_string_truncated() {
    assert!(decode(b"5:hi").is_err());
    assert!(decode(b"5hello").is_err());
}

#[test]
fn test_decode_list() {
    let value = decode(b"li1ei2ei3ee").unwrap();
    let list = value.as_list().unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(list[2].as_integer(), Some(3));
}

#[test]
fn test_decode_dict() {
    let value = decode(b"d3:agei30e4:name5:Alicee").unwrap();
    assert_eq!(value.get(b"name").and_then(|v| v.as_str()), Some("Alice"));
    assert_eq!(value.get(b"age").and_then(|v| v.as_integer()), Some(30));
    assert_eq!(value.get(b"missing"), None);
}

#[test]
fn test_decode_dict_rejects_integer_key() {
    assert!(decode(b"di1ei2ee").is_err());
}

#[test]
fn test_decode_trailing_data() {
    assert!(matches!(
        decode(b"i1ei2e"),
        Err(BencodeError::TrailingData)
    ));
}

#[test]
fn test_decode_depth_cap() {
    let mut data = Vec::new();
    data.extend(std::iter::repeat(b'l').take(80));
    data.extend(std::iter::repeat(b'e').take(80));
    assert!(matches!(
        decode(&data),
        Err(BencodeError::NestingTooDeep)
    ));
}

#[test]
fn test_encode_round_trip() {
    let mut dict = BTreeMap::new();
    dict.insert(
        Bytes::from_static(b"announce"),
        Value::string("http://tracker.example/announce"),
    );
    dict.insert(Bytes::from_static(b"length"), Value::Integer(16384));
    dict.insert(
        Bytes::from_static(b"tiers"),
        Value::List(vec![Value::Integer(1), Value::string("a")]),
    );
    let value = Value::Dict(dict);

    let encoded = encode(&value).unwrap();
    let decoded = decode(&encoded).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn test_encode_is_canonical() {
    // Dict keys re-encode in sorted order regardless of insertion order.
    let raw = b"d1:bi2e1:ai1ee";
    let decoded = decode(raw).unwrap();
    let encoded = encode(&decoded).unwrap();
    assert_eq!(encoded, b"d1:ai1e1:bi2ee");
}

#[test]
fn test_binary_strings_survive() {
    let mut data = Vec::from(&b"3:"[..]);
    data.extend([0x00, 0xFF, 0x80]);
    let value = decode(&data).unwrap();
    assert_eq!(value.as_bytes().unwrap().as_ref(), &[0x00, 0xFF, 0x80]);
    assert_eq!(value.as_str(), None);
}
