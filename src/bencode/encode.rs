use std::io::Write;

use super::error::BencodeError;
use super::value::Value;

/// Encodes a value to bencode bytes.
///
/// Dictionary entries are emitted in key order, so encoding a decoded value
/// reproduces the original bytes. This matters for info-hash computation.
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut out = Vec::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value<W: Write>(value: &Value, out: &mut W) -> Result<(), BencodeError> {
    match value {
        Value::Integer(i) => {
            write!(out, "i{}e", i)?;
        }
        Value::Bytes(b) => {
            write!(out, "{}:", b.len())?;
            out.write_all(b)?;
        }
        Value::List(items) => {
            out.write_all(b"l")?;
            for item in items {
                write_value(item, out)?;
            }
            out.write_all(b"e")?;
        }
        Value::Dict(entries) => {
            out.write_all(b"d")?;
            for (key, val) in entries {
                write!(out, "{}:", key.len())?;
                out.write_all(key)?;
                write_value(val, out)?;
            }
            out.write_all(b"e")?;
        }
    }
    Ok(())
}
