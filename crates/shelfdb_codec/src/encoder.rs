//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Encode a value to canonical CBOR bytes.
///
/// This function produces deterministic output following the canonical
/// CBOR rules specified in RFC 8949 Section 4.2.1:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers use the shortest possible encoding
/// - Floats always use the 64-bit form, with `-0.0` folded into `0.0`
/// - No indefinite-length encoding
///
/// Equal values therefore always produce identical bytes, which is what
/// lets the encoding double as an index key.
///
/// # Errors
///
/// Returns an error if the value contains a NaN float, a map key that is not
/// text or an integer, or a duplicate map key.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Rewrites `value` into the exact form decoding its encoding yields.
///
/// Map pairs are reordered by encoded key, recursively. A value that
/// canonicalizes successfully always survives an encode/decode round trip
/// and compares equal to the result.
///
/// # Errors
///
/// Returns an error for NaN floats, map keys that are not text or integers,
/// and duplicate map keys.
pub fn canonicalize(value: Value) -> CodecResult<Value> {
    match value {
        Value::Float(x) if x.is_nan() => Err(CodecError::NaNForbidden),
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(canonicalize)
                .collect::<CodecResult<_>>()?,
        )),
        Value::Map(pairs) => {
            let mut keyed = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                check_map_key(&key)?;
                keyed.push((to_canonical_cbor(&key)?, key, canonicalize(value)?));
            }
            keyed.sort_by(|a, b| cmp_encoded(&a.0, &b.0));
            if keyed.windows(2).any(|w| w[0].0 == w[1].0) {
                return Err(CodecError::invalid_structure("duplicate map key"));
            }
            Ok(Value::Map(
                keyed.into_iter().map(|(_, key, value)| (key, value)).collect(),
            ))
        }
        other => Ok(other),
    }
}

fn check_map_key(key: &Value) -> CodecResult<()> {
    match key {
        Value::Text(_) | Value::Integer(_) => Ok(()),
        _ => Err(CodecError::invalid_structure(
            "map keys must be text or integers",
        )),
    }
}

/// Length-first, then bytewise.
fn cmp_encoded(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// A canonical CBOR encoder.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => {
                self.buffer.push(0xf6);
                Ok(())
            }
            Value::Bool(b) => {
                self.buffer.push(if *b { 0xf5 } else { 0xf4 });
                Ok(())
            }
            Value::Integer(n) => {
                self.encode_integer(*n);
                Ok(())
            }
            Value::Float(x) => self.encode_float(*x),
            Value::Bytes(b) => {
                self.encode_unsigned(2, b.len() as u64);
                self.buffer.extend_from_slice(b);
                Ok(())
            }
            Value::Text(s) => {
                self.encode_unsigned(3, s.len() as u64);
                self.buffer.extend_from_slice(s.as_bytes());
                Ok(())
            }
            Value::Array(arr) => self.encode_array(arr),
            Value::Map(pairs) => self.encode_map(pairs),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // CBOR negative integers encode -(n+1)
            self.encode_unsigned(1, (-(n + 1)) as u64);
        }
    }

    fn encode_float(&mut self, x: f64) -> CodecResult<()> {
        if x.is_nan() {
            return Err(CodecError::NaNForbidden);
        }
        let x = if x == 0.0 { 0.0 } else { x };
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&x.to_bits().to_be_bytes());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_array(&mut self, arr: &[Value]) -> CodecResult<()> {
        self.encode_unsigned(4, arr.len() as u64);
        for item in arr {
            self.encode(item)?;
        }
        Ok(())
    }

    fn encode_map(&mut self, pairs: &[(Value, Value)]) -> CodecResult<()> {
        let mut encoded_pairs: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            check_map_key(key)?;
            encoded_pairs.push((to_canonical_cbor(key)?, value));
        }

        encoded_pairs.sort_by(|a, b| cmp_encoded(&a.0, &b.0));
        if encoded_pairs.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(CodecError::invalid_structure("duplicate map key"));
        }

        self.encode_unsigned(5, pairs.len() as u64);
        for (encoded_key, value) in encoded_pairs {
            self.buffer.extend_from_slice(&encoded_key);
            self.encode(value)?;
        }

        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_simple_values() {
        assert_eq!(to_canonical_cbor(&Value::Null).unwrap(), vec![0xf6]);
        assert_eq!(to_canonical_cbor(&Value::Bool(false)).unwrap(), vec![0xf4]);
        assert_eq!(to_canonical_cbor(&Value::Bool(true)).unwrap(), vec![0xf5]);
    }

    #[test]
    fn encode_integers_shortest_form() {
        assert_eq!(to_canonical_cbor(&Value::Integer(23)).unwrap(), vec![0x17]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(255)).unwrap(),
            vec![0x18, 255]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Integer(256)).unwrap(),
            vec![0x19, 0x01, 0x00]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Integer(65536)).unwrap(),
            vec![0x1a, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_negative_integers() {
        assert_eq!(to_canonical_cbor(&Value::Integer(-1)).unwrap(), vec![0x20]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(-100)).unwrap(),
            vec![0x38, 99]
        );
    }

    #[test]
    fn encode_float_as_double() {
        let bytes = to_canonical_cbor(&Value::Float(1.5)).unwrap();
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(&bytes[1..], &1.5f64.to_bits().to_be_bytes());
    }

    #[test]
    fn negative_zero_encodes_like_zero() {
        assert_eq!(
            to_canonical_cbor(&Value::Float(-0.0)).unwrap(),
            to_canonical_cbor(&Value::Float(0.0)).unwrap()
        );
    }

    #[test]
    fn nan_is_rejected() {
        assert_eq!(
            to_canonical_cbor(&Value::Float(f64::NAN)),
            Err(CodecError::NaNForbidden)
        );
    }

    #[test]
    fn encode_text_and_bytes() {
        assert_eq!(
            to_canonical_cbor(&Value::Text("a".to_string())).unwrap(),
            vec![0x61, b'a']
        );
        assert_eq!(
            to_canonical_cbor(&Value::Bytes(vec![1, 2, 3])).unwrap(),
            vec![0x43, 1, 2, 3]
        );
    }

    #[test]
    fn encode_map_sorted() {
        let map = Value::Map(vec![
            (Value::Text("bb".to_string()), Value::Integer(2)),
            (Value::Text("a".to_string()), Value::Integer(1)),
        ]);
        let bytes = to_canonical_cbor(&map).unwrap();

        assert_eq!(bytes, vec![0xa2, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]);
    }

    #[test]
    fn duplicate_map_keys_rejected() {
        let map = Value::Map(vec![
            (Value::from("a"), Value::Integer(1)),
            (Value::from("a"), Value::Integer(2)),
        ]);
        assert!(matches!(
            to_canonical_cbor(&map),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn non_text_map_keys_rejected() {
        let map = Value::Map(vec![(Value::Bool(true), Value::Integer(1))]);
        assert!(matches!(
            to_canonical_cbor(&map),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert!(canonicalize(Value::Array(vec![map])).is_err());
    }

    #[test]
    fn canonicalize_matches_decoded_form() {
        let map = Value::Map(vec![
            (Value::from("b"), Value::Integer(1)),
            (Value::Integer(1000), Value::Map(vec![
                (Value::from("zz"), Value::Null),
                (Value::from("a"), Value::Null),
            ])),
            (Value::from("a"), Value::Integer(2)),
        ]);
        let canonical = canonicalize(map.clone()).unwrap();
        let decoded = crate::from_cbor(&to_canonical_cbor(&map).unwrap()).unwrap();

        assert_ne!(canonical, map);
        assert_eq!(canonical, decoded);
        assert_eq!(canonicalize(canonical.clone()).unwrap(), canonical);
    }

    #[test]
    fn canonicalize_rejects_nan_and_duplicates() {
        assert!(matches!(
            canonicalize(Value::Array(vec![Value::Float(f64::NAN)])),
            Err(CodecError::NaNForbidden)
        ));
        let dup = Value::Map(vec![
            (Value::from("a"), Value::Null),
            (Value::from("a"), Value::Integer(1)),
        ]);
        assert!(canonicalize(dup).is_err());
    }

    #[test]
    fn deterministic_encoding() {
        let map1 = Value::Map(vec![
            (Value::Text("z".to_string()), Value::Integer(1)),
            (Value::Text("a".to_string()), Value::Integer(2)),
        ]);
        let map2 = Value::Map(vec![
            (Value::Text("a".to_string()), Value::Integer(2)),
            (Value::Text("z".to_string()), Value::Integer(1)),
        ]);

        assert_eq!(
            to_canonical_cbor(&map1).unwrap(),
            to_canonical_cbor(&map2).unwrap()
        );
    }
}
