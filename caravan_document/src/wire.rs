//! The destination's wire encoding: a little-endian length-prefixed
//! element list with a trailing NUL. Arrays encode as documents keyed by
//! their decimal index. The total length field counts itself and the
//! terminator.

use crate::error::{
    DecodeSnafu, DocumentTooLargeSnafu, EncodeSnafu, Result, TruncatedSnafu,
};
use crate::value::{Document, Value};

/// Maximum serialized size of a single document.
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

const TAG_DOUBLE: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_DOCUMENT: u8 = 0x03;
const TAG_ARRAY: u8 = 0x04;
const TAG_BINARY: u8 = 0x05;
const TAG_BOOL: u8 = 0x08;
const TAG_DATETIME: u8 = 0x09;
const TAG_NULL: u8 = 0x0a;
const TAG_INT32: u8 = 0x10;
const TAG_TIMESTAMP: u8 = 0x11;
const TAG_INT64: u8 = 0x12;

const BINARY_SUBTYPE_GENERIC: u8 = 0x00;

/// Serializes a document, enforcing [`MAX_DOCUMENT_SIZE`].
pub fn encode(doc: &Document) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_document(&mut buf, doc)?;
    if buf.len() > MAX_DOCUMENT_SIZE {
        return DocumentTooLargeSnafu { size: buf.len() }.fail();
    }
    Ok(buf)
}

/// Returns the serialized size of a document without keeping the bytes.
pub fn encoded_size(doc: &Document) -> Result<usize> {
    encode(doc).map(|bytes| bytes.len())
}

fn encode_document(buf: &mut Vec<u8>, doc: &Document) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    for (key, value) in doc.iter() {
        encode_element(buf, key, value)?;
    }
    buf.push(0);
    finish_frame(buf, start)
}

fn encode_element(buf: &mut Vec<u8>, key: &str, value: &Value) -> Result<()> {
    buf.push(tag_of(value));
    encode_cstring(buf, key)?;
    match value {
        Value::Null => {}
        Value::Bool(v) => buf.push(u8::from(*v)),
        Value::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::Timestamp(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::DateTime(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::String(v) => encode_string(buf, v)?,
        Value::Binary(v) => {
            buf.extend_from_slice(&frame_len(v.len(), 0)?.to_le_bytes());
            buf.push(BINARY_SUBTYPE_GENERIC);
            buf.extend_from_slice(v);
        }
        Value::Document(v) => encode_document(buf, v)?,
        Value::Array(items) => {
            let start = buf.len();
            buf.extend_from_slice(&[0; 4]);
            for (index, item) in items.iter().enumerate() {
                let key = index.to_string();
                encode_element(buf, &key, item)?;
            }
            buf.push(0);
            finish_frame(buf, start)?;
        }
    }
    Ok(())
}

fn tag_of(value: &Value) -> u8 {
    match value {
        Value::Null => TAG_NULL,
        Value::Bool(_) => TAG_BOOL,
        Value::Int32(_) => TAG_INT32,
        Value::Int64(_) => TAG_INT64,
        Value::Double(_) => TAG_DOUBLE,
        Value::String(_) => TAG_STRING,
        Value::Binary(_) => TAG_BINARY,
        Value::Timestamp(_) => TAG_TIMESTAMP,
        Value::DateTime(_) => TAG_DATETIME,
        Value::Array(_) => TAG_ARRAY,
        Value::Document(_) => TAG_DOCUMENT,
    }
}

fn encode_cstring(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return EncodeSnafu {
            message: format!("key {s:?} contains a NUL byte"),
        }
        .fail();
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn encode_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    // string length counts the terminator but not the length field
    buf.extend_from_slice(&frame_len(s.len(), 1)?.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn frame_len(len: usize, extra: usize) -> Result<i32> {
    i32::try_from(len + extra).map_err(|_| {
        EncodeSnafu {
            message: format!("length {len} overflows the wire length field"),
        }
        .build()
    })
}

fn finish_frame(buf: &mut Vec<u8>, start: usize) -> Result<()> {
    let len = frame_len(buf.len() - start, 0)?;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Deserializes exactly one document from `bytes`.
///
/// The slice must contain the whole document and nothing else; the binary
/// record reader is responsible for framing.
pub fn decode(bytes: &[u8]) -> Result<Document> {
    let mut cursor = Cursor::new(bytes);
    let doc = decode_document(&mut cursor)?;
    if cursor.pos != bytes.len() {
        return DecodeSnafu {
            offset: cursor.pos,
            message: format!("{} trailing bytes after document", bytes.len() - cursor.pos),
        }
        .fail();
    }
    Ok(doc)
}

/// Structurally validates one serialized document without materializing it.
///
/// This is the `objcheck` pass: every length field must stay in bounds,
/// every tag must be known, and every string and key must be
/// NUL-terminated UTF-8.
pub fn validate(bytes: &[u8]) -> Result<()> {
    let mut cursor = Cursor::new(bytes);
    walk_document(&mut cursor)?;
    if cursor.pos != bytes.len() {
        return DecodeSnafu {
            offset: cursor.pos,
            message: format!("{} trailing bytes after document", bytes.len() - cursor.pos),
        }
        .fail();
    }
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| {
            DecodeSnafu {
                offset: self.pos,
                message: "length overflow".to_string(),
            }
            .build()
        })?;
        if end > self.bytes.len() {
            return TruncatedSnafu {
                expected: end,
                actual: self.bytes.len(),
            }
            .fail();
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_cstring(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let rest = &self.bytes[self.pos..];
        let nul = rest.iter().position(|b| *b == 0).ok_or_else(|| {
            TruncatedSnafu {
                expected: self.bytes.len() + 1,
                actual: self.bytes.len(),
            }
            .build()
        })?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| {
            DecodeSnafu {
                offset: start,
                message: "key is not valid UTF-8".to_string(),
            }
            .build()
        })?;
        self.pos += nul + 1;
        Ok(s)
    }

    /// Reads a length-prefixed, NUL-terminated string value.
    fn read_string(&mut self) -> Result<&'a str> {
        let offset = self.pos;
        let len = self.read_i32()?;
        if len < 1 {
            return DecodeSnafu {
                offset,
                message: format!("invalid string length {len}"),
            }
            .fail();
        }
        let bytes = self.take(len as usize)?;
        let (body, terminator) = bytes.split_at(len as usize - 1);
        if terminator != [0] {
            return DecodeSnafu {
                offset,
                message: "string is missing its NUL terminator".to_string(),
            }
            .fail();
        }
        std::str::from_utf8(body).map_err(|_| {
            DecodeSnafu {
                offset,
                message: "string is not valid UTF-8".to_string(),
            }
            .build()
        })
    }
}

fn decode_document(cursor: &mut Cursor<'_>) -> Result<Document> {
    let start = cursor.pos;
    let declared = read_document_length(cursor)?;
    let mut doc = Document::new();
    loop {
        let tag = cursor.read_u8()?;
        if tag == 0 {
            break;
        }
        let key = cursor.read_cstring()?.to_string();
        let value = decode_value(cursor, tag)?;
        doc.insert(key, value);
    }
    check_frame(cursor, start, declared)?;
    Ok(doc)
}

fn decode_value(cursor: &mut Cursor<'_>, tag: u8) -> Result<Value> {
    let value = match tag {
        TAG_NULL => Value::Null,
        TAG_BOOL => Value::Bool(cursor.read_u8()? != 0),
        TAG_INT32 => Value::Int32(i32::from_le_bytes(cursor.read_fixed()?)),
        TAG_INT64 => Value::Int64(i64::from_le_bytes(cursor.read_fixed()?)),
        TAG_DOUBLE => Value::Double(f64::from_le_bytes(cursor.read_fixed()?)),
        TAG_TIMESTAMP => Value::Timestamp(u64::from_le_bytes(cursor.read_fixed()?)),
        TAG_DATETIME => Value::DateTime(i64::from_le_bytes(cursor.read_fixed()?)),
        TAG_STRING => Value::String(cursor.read_string()?.to_string()),
        TAG_BINARY => {
            let offset = cursor.pos;
            let len = cursor.read_i32()?;
            if len < 0 {
                return DecodeSnafu {
                    offset,
                    message: format!("invalid binary length {len}"),
                }
                .fail();
            }
            let _subtype = cursor.read_u8()?;
            Value::Binary(cursor.take(len as usize)?.to_vec())
        }
        TAG_DOCUMENT => Value::Document(decode_document(cursor)?),
        TAG_ARRAY => {
            let doc = decode_document(cursor)?;
            Value::Array(doc.into_iter().map(|(_, value)| value).collect())
        }
        other => {
            return DecodeSnafu {
                offset: cursor.pos - 1,
                message: format!("unknown element tag {other:#04x}"),
            }
            .fail();
        }
    };
    Ok(value)
}

fn read_document_length(cursor: &mut Cursor<'_>) -> Result<usize> {
    let offset = cursor.pos;
    let declared = cursor.read_i32()?;
    if declared < 5 {
        return DecodeSnafu {
            offset,
            message: format!("invalid document length {declared}"),
        }
        .fail();
    }
    let declared = declared as usize;
    if offset + declared > cursor.bytes.len() {
        return TruncatedSnafu {
            expected: offset + declared,
            actual: cursor.bytes.len(),
        }
        .fail();
    }
    Ok(declared)
}

fn check_frame(cursor: &Cursor<'_>, start: usize, declared: usize) -> Result<()> {
    if cursor.pos - start != declared {
        return DecodeSnafu {
            offset: cursor.pos,
            message: format!(
                "document consumed {} bytes but declared {declared}",
                cursor.pos - start
            ),
        }
        .fail();
    }
    Ok(())
}

fn walk_document(cursor: &mut Cursor<'_>) -> Result<()> {
    let start = cursor.pos;
    let declared = read_document_length(cursor)?;
    loop {
        let tag = cursor.read_u8()?;
        if tag == 0 {
            break;
        }
        cursor.read_cstring()?;
        walk_value(cursor, tag)?;
    }
    check_frame(cursor, start, declared)
}

fn walk_value(cursor: &mut Cursor<'_>, tag: u8) -> Result<()> {
    match tag {
        TAG_NULL => {}
        TAG_BOOL => {
            cursor.take(1)?;
        }
        TAG_INT32 => {
            cursor.take(4)?;
        }
        TAG_INT64 | TAG_DOUBLE | TAG_TIMESTAMP | TAG_DATETIME => {
            cursor.take(8)?;
        }
        TAG_STRING => {
            cursor.read_string()?;
        }
        TAG_BINARY => {
            let offset = cursor.pos;
            let len = cursor.read_i32()?;
            if len < 0 {
                return DecodeSnafu {
                    offset,
                    message: format!("invalid binary length {len}"),
                }
                .fail();
            }
            cursor.take(1 + len as usize)?;
        }
        TAG_DOCUMENT | TAG_ARRAY => walk_document(cursor)?,
        other => {
            return DecodeSnafu {
                offset: cursor.pos - 1,
                message: format!("unknown element tag {other:#04x}"),
            }
            .fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::error::DocumentError;

    fn sample() -> Document {
        doc! {
            "name" => "ae",
            "count" => 42i64,
            "ratio" => 1.5,
            "flag" => true,
            "none" => Value::Null,
            "raw" => vec![0u8, 1, 2],
            "ts" => Value::Timestamp((7u64 << 32) | 3),
            "when" => Value::DateTime(1_400_000_000_000),
            "tags" => vec![Value::Int32(1), Value::String("x".to_string())],
            "sub" => doc! {"a" => 1},
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let doc = sample();
        let bytes = encode(&doc).unwrap();
        assert_eq!(decode(&bytes).unwrap(), doc);
        validate(&bytes).unwrap();
    }

    #[test]
    fn test_empty_document_is_five_bytes() {
        let bytes = encode(&Document::new()).unwrap();
        assert_eq!(bytes, vec![5, 0, 0, 0, 0]);
        assert_eq!(decode(&bytes).unwrap(), Document::new());
    }

    #[test]
    fn test_length_field_counts_itself_and_terminator() {
        let bytes = encode(&doc! {"a" => 1}).unwrap();
        let declared = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(declared as usize, bytes.len());
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_truncated_body_is_reported() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, DocumentError::Truncated { .. }), "{err}");
    }

    #[test]
    fn test_unknown_tag_fails_validation() {
        let mut bytes = encode(&doc! {"a" => 1}).unwrap();
        bytes[4] = 0x7f;
        assert!(matches!(
            validate(&bytes).unwrap_err(),
            DocumentError::Decode { .. }
        ));
    }

    #[test]
    fn test_oversized_document_is_rejected() {
        let huge = doc! {"blob" => vec![0u8; MAX_DOCUMENT_SIZE]};
        assert!(matches!(
            encode(&huge).unwrap_err(),
            DocumentError::DocumentTooLarge { .. }
        ));
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let mut bytes = encode(&doc! {"a" => 1}).unwrap();
        bytes.push(0x41);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            DocumentError::Decode { .. }
        ));
    }
}
