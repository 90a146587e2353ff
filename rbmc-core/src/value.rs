//! Flag-tagged value encoding (component B).
//!
//! A stored value always travels as `(flags, bytes)`. The flags bitfield
//! records how `bytes` should be turned back into something meaningful:
//! a pickled blob, a textual integer, a textual wide integer, or (when no
//! bit is set) an opaque byte string. Compression, when applied, is layered
//! on top and must always be undone first.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

/// `bit0` -- the value was serialized by the configured [`Serializer`].
pub const FLAG_PICKLED: u32 = 1 << 0;
/// `bit1` -- the value is a machine-word integer, encoded as decimal text.
pub const FLAG_INTEGER: u32 = 1 << 1;
/// `bit2` -- the value is a wide integer, encoded as decimal text.
pub const FLAG_LONG: u32 = 1 << 2;
/// `bit3` -- the payload was compressed after the tagging below was applied.
pub const FLAG_COMPRESSED: u32 = 1 << 3;

/// Values smaller than this are never compressed, matching upstream
/// memcached clients: the framing overhead isn't worth it below a few
/// header-widths of data.
pub const COMPRESSION_THRESHOLD: usize = 128;

/// The dynamically-typed value a cache operation sends or receives.
///
/// Rust has no runtime `isinstance` check, so unlike the client this crate
/// was modeled on, callers pick the variant explicitly (or rely on the
/// `From` impls below) rather than have it inferred from a value's runtime
/// type. [`Value::Pickled`] carries pre-serialized bytes; use
/// [`Value::pickle`]/[`Value::unpickle`] with a [`Serializer`] to move
/// between it and a concrete type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An opaque byte string, or a UTF-8 string -- both travel with no flags
    /// set and are indistinguishable on the wire.
    Bytes(Vec<u8>),
    /// A machine-word (32-bit-scale) integer.
    Int(i64),
    /// A wide (64-bit-and-up) integer.
    Long(i128),
    /// Bytes produced by the configured [`Serializer`].
    Pickled(Vec<u8>),
}

impl Value {
    pub fn bytes(self) -> Vec<u8> {
        match self {
            Value::Bytes(b) => b,
            Value::Int(i) => i.to_string().into_bytes(),
            Value::Long(i) => i.to_string().into_bytes(),
            Value::Pickled(b) => b,
        }
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            Value::Bytes(b) => {
                std::str::from_utf8(b).map_err(|_| crate::protocol::ProtocolError::InvalidUtf8.into())
            }
            _ => Err(crate::protocol::ProtocolError::InvalidUtf8.into()),
        }
    }

    /// Serialize `value` with `serializer` into a [`Value::Pickled`].
    pub fn pickle<T: Serialize, S: Serializer>(value: &T, serializer: &S) -> Result<Self, Error> {
        Ok(Value::Pickled(serializer.serialize(value)?))
    }

    /// Deserialize a [`Value::Pickled`] back into `T`. Any other variant is
    /// an error: the caller asked for a pickled value but didn't get one.
    pub fn unpickle<T: DeserializeOwned, S: Serializer>(&self, serializer: &S) -> Result<T, Error> {
        match self {
            Value::Pickled(b) => serializer.deserialize(b),
            _ => Err(crate::protocol::ProtocolError::InvalidUtf8.into()),
        }
    }

    /// Tag and flatten this value into the `(flags, bytes)` pair that goes
    /// in a storage packet's extras/value, before compression is applied.
    pub(crate) fn encode(&self) -> (u32, Vec<u8>) {
        match self {
            Value::Bytes(b) => (0, b.clone()),
            Value::Int(i) => (FLAG_INTEGER, i.to_string().into_bytes()),
            Value::Long(i) => (FLAG_LONG, i.to_string().into_bytes()),
            Value::Pickled(b) => (FLAG_PICKLED, b.clone()),
        }
    }

    /// The strict inverse of [`Value::encode`]. Compression (if any) must
    /// already have been undone by the caller.
    pub(crate) fn decode(flags: u32, bytes: Vec<u8>) -> Result<Self, Error> {
        if flags & FLAG_INTEGER != 0 {
            let text = std::str::from_utf8(&bytes)
                .map_err(|_| Error::from(crate::protocol::ProtocolError::InvalidUtf8))?;
            let i: i64 = text
                .parse()
                .map_err(|_| Error::from(crate::protocol::ProtocolError::InvalidUtf8))?;
            Ok(Value::Int(i))
        } else if flags & FLAG_LONG != 0 {
            let text = std::str::from_utf8(&bytes)
                .map_err(|_| Error::from(crate::protocol::ProtocolError::InvalidUtf8))?;
            let i: i128 = text
                .parse()
                .map_err(|_| Error::from(crate::protocol::ProtocolError::InvalidUtf8))?;
            Ok(Value::Long(i))
        } else if flags & FLAG_PICKLED != 0 {
            Ok(Value::Pickled(bytes))
        } else {
            Ok(Value::Bytes(bytes))
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(s.into_bytes())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}

macro_rules! impl_long {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Long(v as i128)
                }
            }
        )*
    };
}

// Booleans deliberately have no `From<bool> for Value` impl: the protocol
// this crate speaks forbids a boolean from ever taking the integer-flag
// path, and the easiest way to enforce that is to never give it one.
impl_int!(i8, i16, i32, u8, u16, u32);
impl_long!(i64, u64, i128, u128);

/// A pluggable serializer for values that are neither bytes, text, nor a
/// plain integer. The default, [`BincodeSerializer`], is a compact
/// self-describing encoding; nothing about the wire format or the rest of
/// the codec depends on which one is used; swap it for any `Serialize`-based
/// scheme.
pub trait Serializer: Clone + Send + Sync + 'static {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, Error>;
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, Error>;
}

/// The default [`Serializer`]: bincode with a fixed-width, big-endian
/// configuration so encoded sizes don't depend on the host's endianness.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, Error> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_bytes() {
        let value = Value::from(b"hello world".to_vec());
        let (flags, bytes) = value.encode();
        assert_eq!(flags, 0);
        assert_eq!(Value::decode(flags, bytes).unwrap(), value);
    }

    #[test]
    fn test_round_trip_int() {
        let value: Value = 42_i32.into();
        let (flags, bytes) = value.encode();
        assert_eq!(flags, FLAG_INTEGER);
        assert_eq!(bytes, b"42");
        assert_eq!(Value::decode(flags, bytes).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_round_trip_long() {
        let value: Value = 9_000_000_000_i64.into();
        let (flags, bytes) = value.encode();
        assert_eq!(flags, FLAG_LONG);
        assert_eq!(Value::decode(flags, bytes).unwrap(), Value::Long(9_000_000_000));
    }

    #[test]
    fn test_round_trip_pickled() {
        let serializer = BincodeSerializer;
        let value = Value::pickle(&vec![1_u32, 2, 3], &serializer).unwrap();
        let (flags, bytes) = value.encode();
        assert_eq!(flags, FLAG_PICKLED);
        let decoded = Value::decode(flags, bytes).unwrap();
        let restored: Vec<u32> = decoded.unpickle(&serializer).unwrap();
        assert_eq!(restored, vec![1, 2, 3]);
    }
}
