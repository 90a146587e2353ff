use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Framing violations. Any of these mean the byte stream can no longer be
/// trusted, so the connection that produced them is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The header's magic byte was neither a request nor a response magic.
    InvalidMagic(u8),
    /// Fewer than 24 bytes were available to decode a header.
    PacketTooSmall,
    /// The body read did not match `body_len` from the header.
    BodySizeMismatch,
    /// A response's opcode did not match what the pending request expected.
    OpcodeMismatch { expected: u8, actual: u8 },
    /// A body that was expected to be UTF-8 (e.g. a SASL mechanism list) was not.
    InvalidUtf8,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProtocolError::InvalidMagic(b) => write!(f, "invalid magic byte: {}", b),
            ProtocolError::PacketTooSmall => write!(f, "packet smaller than the 24 byte header"),
            ProtocolError::BodySizeMismatch => write!(f, "body length did not match header"),
            ProtocolError::OpcodeMismatch { expected, actual } => write!(
                f,
                "expected response opcode 0x{:02x}, got 0x{:02x}",
                expected, actual
            ),
            ProtocolError::InvalidUtf8 => write!(f, "expected a UTF-8 body"),
        }
    }
}

impl StdError for ProtocolError {}
