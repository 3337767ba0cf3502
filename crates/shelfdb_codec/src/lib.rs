//! # ShelfDB Codec
//!
//! The document value model and its canonical CBOR encoding.
//!
//! Every record ShelfDB writes to disk, and every index key it builds,
//! goes through this crate. The encoding is deterministic:
//! - Identical values produce identical bytes
//! - Map keys are sorted (length-first, then bytewise on their encoding)
//! - Integers use the shortest encoding
//! - Floats use the 64-bit form; NaN is rejected
//! - No indefinite-length items and no tags
//!
//! ## Usage
//!
//! ```
//! use shelfdb_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let value = Value::map(vec![
//!     (Value::from("name"), Value::from("Sam")),
//!     (Value::from("age"), Value::from(41)),
//! ]);
//! let bytes = to_canonical_cbor(&value).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{canonicalize, to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use value::{Value, ValueKind};

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
