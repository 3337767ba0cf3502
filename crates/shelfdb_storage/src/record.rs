//! Log record framing shared by the log-structured backends.
//!
//! Each record on disk is laid out as:
//!
//! ```text
//! | payload_len (4, LE) | header_crc (4, LE) | payload_crc (4, LE) | payload (N) |
//! ```
//!
//! The payload is canonical CBOR: `[key, value]` for a put, `[key]` for a
//! delete. `header_crc` covers the length field, `payload_crc` the payload.
//! A frame whose header checks out but whose payload runs past the end of
//! the data is a torn write; any other mismatch is corruption.

use crate::error::{StorageError, StorageResult};
use shelfdb_codec::{from_cbor, to_canonical_cbor, Value};

/// Size of the fixed record header.
pub(crate) const HEADER_SIZE: usize = 12;

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogRecord {
    /// `key` now holds `value`.
    Put {
        /// Record key.
        key: String,
        /// Stored value.
        value: Value,
    },
    /// `key` was deleted.
    Delete {
        /// Record key.
        key: String,
    },
}

impl LogRecord {
    /// Key this record applies to.
    pub(crate) fn key(&self) -> &str {
        match self {
            LogRecord::Put { key, .. } | LogRecord::Delete { key } => key,
        }
    }

    /// Encodes this record's payload (without the frame header).
    pub(crate) fn encode_payload(&self) -> StorageResult<Vec<u8>> {
        let array = match self {
            LogRecord::Put { key, value } => {
                vec![Value::Text(key.clone()), value.clone()]
            }
            LogRecord::Delete { key } => vec![Value::Text(key.clone())],
        };
        Ok(to_canonical_cbor(&Value::Array(array))?)
    }

    /// Decodes a record payload.
    pub(crate) fn decode_payload(payload: &[u8]) -> StorageResult<Self> {
        match from_cbor(payload)? {
            Value::Array(mut items) => {
                let value = if items.len() == 2 { items.pop() } else { None };
                match (items.pop(), items.is_empty(), value) {
                    (Some(Value::Text(key)), true, Some(value)) => Ok(LogRecord::Put { key, value }),
                    (Some(Value::Text(key)), true, None) => Ok(LogRecord::Delete { key }),
                    _ => Err(StorageError::corrupted("malformed log record")),
                }
            }
            _ => Err(StorageError::corrupted("log record is not an array")),
        }
    }
}

/// Wraps a payload in its frame header.
pub(crate) fn frame(payload: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::corrupted("record exceeds 4 GiB"))?
        .to_le_bytes();
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&len);
    buf.extend_from_slice(&crc32fast::hash(&len).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Outcome of reading one frame from a buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame<'a> {
    /// A complete frame with valid checksums.
    Valid {
        /// The payload bytes.
        payload: &'a [u8],
        /// Total bytes consumed, header included.
        consumed: usize,
    },
    /// The buffer ends before the frame does: a partial header, or an
    /// intact header whose payload is cut short.
    Truncated,
    /// The header or payload checksum does not match.
    Corrupted(&'static str),
}

/// Reads the frame starting at the beginning of `data`.
pub(crate) fn read_frame(data: &[u8]) -> Frame<'_> {
    if data.len() < HEADER_SIZE {
        return Frame::Truncated;
    }
    let len_bytes = [data[0], data[1], data[2], data[3]];
    let header_crc = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if crc32fast::hash(&len_bytes) != header_crc {
        return Frame::Corrupted("header checksum mismatch");
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    let payload_crc = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let Some(end) = HEADER_SIZE.checked_add(len).filter(|end| *end <= data.len()) else {
        return Frame::Truncated;
    };
    let payload = &data[HEADER_SIZE..end];
    if crc32fast::hash(payload) != payload_crc {
        return Frame::Corrupted("payload checksum mismatch");
    }
    Frame::Valid {
        payload,
        consumed: end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, value: Value) -> LogRecord {
        LogRecord::Put {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn put_and_delete_payloads() {
        let record = put("t.1", Value::from("x"));
        let payload = record.encode_payload().unwrap();
        assert_eq!(LogRecord::decode_payload(&payload).unwrap(), record);
        assert_eq!(record.key(), "t.1");

        let delete = LogRecord::Delete {
            key: "t.1".to_string(),
        };
        let payload = delete.encode_payload().unwrap();
        assert_eq!(LogRecord::decode_payload(&payload).unwrap(), delete);
    }

    #[test]
    fn malformed_payloads() {
        let not_array = to_canonical_cbor(&Value::from(1)).unwrap();
        assert!(matches!(
            LogRecord::decode_payload(&not_array),
            Err(StorageError::Corrupted(_))
        ));
        let bad_key = to_canonical_cbor(&Value::Array(vec![Value::from(1)])).unwrap();
        assert!(matches!(
            LogRecord::decode_payload(&bad_key),
            Err(StorageError::Corrupted(_))
        ));
        let too_long = to_canonical_cbor(&Value::Array(vec![
            Value::from("k"),
            Value::Null,
            Value::Null,
        ]))
        .unwrap();
        assert!(LogRecord::decode_payload(&too_long).is_err());
    }

    #[test]
    fn frame_roundtrip() {
        let framed = frame(b"payload").unwrap();
        assert_eq!(framed.len(), HEADER_SIZE + 7);
        assert_eq!(
            read_frame(&framed),
            Frame::Valid {
                payload: b"payload",
                consumed: framed.len()
            }
        );
    }

    #[test]
    fn truncated_frames() {
        let framed = frame(b"payload").unwrap();
        assert_eq!(read_frame(&framed[..5]), Frame::Truncated);
        assert_eq!(read_frame(&framed[..framed.len() - 1]), Frame::Truncated);
    }

    #[test]
    fn payload_checksum_mismatch() {
        let mut framed = frame(b"payload").unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        assert_eq!(
            read_frame(&framed),
            Frame::Corrupted("payload checksum mismatch")
        );
    }

    #[test]
    fn damaged_length_is_corruption_not_truncation() {
        let mut framed = frame(b"payload").unwrap();
        framed[3] = 0x7f;
        assert_eq!(
            read_frame(&framed),
            Frame::Corrupted("header checksum mismatch")
        );

        let mut framed = frame(b"payload").unwrap();
        framed[0] = 1;
        assert!(matches!(read_frame(&framed), Frame::Corrupted(_)));
    }
}
