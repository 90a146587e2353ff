use crate::protocol::{ProtocolError, Status};
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// An error raised while talking to a memcached server.
///
/// Transient I/O failures never reach this type: the engine swallows them
/// into the neutral per-operation results described by the protocol (a miss,
/// `false`, `0`, an empty stats map). Only permanent conditions -- framing
/// violations, authentication failures, and unexpected server statuses --
/// are surfaced here.
#[derive(Debug)]
pub enum Error {
    /// An error communicating over the wire.
    IoError(std::io::Error),
    /// An error caused by incorrectly implementing the memcached protocol.
    Protocol(ProtocolError),
    /// An error caused by (de-)serializing an opaque value.
    Serialize(bincode::Error),
    /// A non-zero status the caller is not expected to recover from locally.
    Status(Status),
    /// The server's SASL mechanism list did not include `PLAIN`.
    AuthenticationNotSupported,
    /// The server rejected the configured username/password.
    InvalidCredentials,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialize(err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Self::Status(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::IoError(err) => write!(f, "IoError: {}", err),
            Error::Protocol(err) => write!(f, "ProtocolError: {}", err),
            Error::Serialize(err) => write!(f, "SerializeError: {}", err),
            Error::Status(err) => write!(f, "StatusError: {}", err),
            Error::AuthenticationNotSupported => {
                write!(f, "server does not support PLAIN authentication")
            }
            Error::InvalidCredentials => write!(f, "incorrect username or password"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::Protocol(err) => Some(err),
            Error::Serialize(err) => Some(err),
            Error::Status(err) => Some(err),
            Error::AuthenticationNotSupported | Error::InvalidCredentials => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::protocol::{ProtocolError, Status};

    #[test]
    fn test_err_display() {
        assert_eq!(
            "ProtocolError: invalid magic byte: 8",
            format!("{}", Error::Protocol(ProtocolError::InvalidMagic(8)))
        );
        assert_eq!(
            "StatusError: key not found",
            format!("{}", Error::Status(Status::KeyNotFound))
        );
    }
}
