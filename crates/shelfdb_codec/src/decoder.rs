//! Canonical CBOR decoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Decode exactly one value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid canonical CBOR, contain
/// forbidden constructs (NaN, indefinite-length, tags) or carry trailing
/// bytes after the value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining().len(),
        });
    }
    Ok(value)
}

/// A canonical CBOR decoder.
///
/// This decoder validates that input follows canonical CBOR rules
/// and rejects forbidden constructs.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Maximum allowed element count for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode the next value.
    #[allow(clippy::cast_possible_wrap)]
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 => {
                let n = self.decode_unsigned(additional_info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::unsupported_type("integer above i64::MAX"))
            }
            1 => {
                // Negative integer: value is -(n+1)
                let n = self.decode_unsigned(additional_info)?;
                if i64::try_from(n).is_ok() {
                    Ok(Value::Integer(-(n as i64) - 1))
                } else {
                    Err(CodecError::unsupported_type("integer below i64::MIN"))
                }
            }
            2 => self.decode_bytes(additional_info),
            3 => self.decode_text(additional_info),
            4 => self.decode_array(additional_info),
            5 => self.decode_map(additional_info),
            6 => Err(CodecError::unsupported_type("tagged value")),
            7 => self.decode_simple(additional_info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.data.len() - self.pos {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    #[inline]
    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => {
                let byte = self.read_byte()?;
                // Validate shortest encoding
                if byte < 24 {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(byte))
            }
            25 => {
                let bytes = self.read_bytes(2)?;
                let value = u16::from_be_bytes([bytes[0], bytes[1]]);
                // Validate shortest encoding
                if u8::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(value))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                // Validate shortest encoding
                if u16::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(value))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                let value = u64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                // Validate shortest encoding
                if u32::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(value)
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::IndefiniteLengthForbidden),
            _ => unreachable!(),
        }
    }

    fn decode_bytes(&mut self, additional_info: u8) -> CodecResult<Value> {
        if additional_info == 31 {
            return Err(CodecError::IndefiniteLengthForbidden);
        }
        let len_u64 = self.decode_unsigned(additional_info)?;
        if len_u64 > MAX_BYTES_LENGTH {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len_u64,
                max_allowed: MAX_BYTES_LENGTH,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = len_u64 as usize;
        let bytes = self.read_bytes(len)?;
        Ok(Value::Bytes(bytes.to_vec()))
    }

    fn decode_text(&mut self, additional_info: u8) -> CodecResult<Value> {
        if additional_info == 31 {
            return Err(CodecError::IndefiniteLengthForbidden);
        }
        let len_u64 = self.decode_unsigned(additional_info)?;
        if len_u64 > MAX_BYTES_LENGTH {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len_u64,
                max_allowed: MAX_BYTES_LENGTH,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = len_u64 as usize;
        let bytes = self.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Value::Text(text.to_string()))
    }

    fn decode_array(&mut self, additional_info: u8) -> CodecResult<Value> {
        if additional_info == 31 {
            return Err(CodecError::IndefiniteLengthForbidden);
        }
        let len_u64 = self.decode_unsigned(additional_info)?;
        if len_u64 > MAX_CONTAINER_ELEMENTS {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len_u64,
                max_allowed: MAX_CONTAINER_ELEMENTS,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = len_u64 as usize;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::Array(items))
    }

    fn decode_map(&mut self, additional_info: u8) -> CodecResult<Value> {
        if additional_info == 31 {
            return Err(CodecError::IndefiniteLengthForbidden);
        }
        let len_u64 = self.decode_unsigned(additional_info)?;
        if len_u64 > MAX_CONTAINER_ELEMENTS {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len_u64,
                max_allowed: MAX_CONTAINER_ELEMENTS,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let len = len_u64 as usize;
        let mut pairs = Vec::with_capacity(len.min(1024));

        let mut prev_key_bytes: Option<Vec<u8>> = None;

        for _ in 0..len {
            // Remember position before decoding key
            let key_start = self.pos;
            let key = self.decode()?;
            let key_end = self.pos;
            let key_bytes = self.data[key_start..key_end].to_vec();
            if key.as_text().is_none() && key.as_integer().is_none() {
                return Err(CodecError::invalid_structure(
                    "map keys must be text or integers",
                ));
            }

            // Validate key ordering (must be strictly increasing)
            if let Some(ref prev) = prev_key_bytes {
                let ordering = compare_cbor_bytes(prev, &key_bytes);
                if ordering != std::cmp::Ordering::Less {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: map keys not in sorted order",
                    ));
                }
            }
            prev_key_bytes = Some(key_bytes);

            let value = self.decode()?;
            pairs.push((key, value));
        }

        Ok(Value::Map(pairs))
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<Value> {
        match additional_info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            23 => Err(CodecError::unsupported_type("undefined")),
            24 => {
                let simple = self.read_byte()?;
                match simple {
                    0..=31 => Err(CodecError::invalid_structure(
                        "non-canonical: simple value should use direct encoding",
                    )),
                    _ => Err(CodecError::unsupported_type(format!(
                        "simple value {simple}"
                    ))),
                }
            }
            // Only the 64-bit form is canonical for stored documents.
            25 | 26 => Err(CodecError::invalid_structure(
                "non-canonical: floats must use the 64-bit form",
            )),
            27 => {
                let bytes = self.read_bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                let x = f64::from_bits(u64::from_be_bytes(raw));
                if x.is_nan() {
                    return Err(CodecError::NaNForbidden);
                }
                Ok(Value::Float(x))
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            _ => Err(CodecError::unsupported_type(format!(
                "simple value {additional_info}"
            ))),
        }
    }
}

/// Compare two CBOR byte sequences for canonical ordering.
/// Uses length-first, then bytewise comparison.
fn compare_cbor_bytes(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Equal => a.cmp(b),
        other => other,
    }
}
