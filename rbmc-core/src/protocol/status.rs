use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Status codes carried in the header's `vbucket_or_status` field on a
/// response packet.
///
/// [`Status::ServerDisconnected`] is synthetic: the wire is a 16-bit field,
/// so the server can never actually send it. The engine manufactures it
/// internally whenever a response never reached the client, so the rest of
/// the code can treat "no response" as just another status to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    IncrDecrOnNonNumericValue,
    VbucketBelongsToAnotherServer,
    AuthError,
    AuthContinue,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TemporaryFailure,
    Unknown(u16),
    ServerDisconnected,
}

impl From<u16> for Status {
    fn from(val: u16) -> Self {
        match val {
            0x0000 => Status::Success,
            0x0001 => Status::KeyNotFound,
            0x0002 => Status::KeyExists,
            0x0003 => Status::ValueTooLarge,
            0x0004 => Status::InvalidArguments,
            0x0005 => Status::ItemNotStored,
            0x0006 => Status::IncrDecrOnNonNumericValue,
            0x0007 => Status::VbucketBelongsToAnotherServer,
            0x0008 => Status::AuthError,
            0x0009 => Status::AuthContinue,
            0x0081 => Status::UnknownCommand,
            0x0082 => Status::OutOfMemory,
            0x0083 => Status::NotSupported,
            0x0084 => Status::InternalError,
            0x0085 => Status::Busy,
            0x0086 => Status::TemporaryFailure,
            other => Status::Unknown(other),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Status::Success => write!(f, "success"),
            Status::KeyNotFound => write!(f, "key not found"),
            Status::KeyExists => write!(f, "key exists"),
            Status::ValueTooLarge => write!(f, "value too large"),
            Status::InvalidArguments => write!(f, "invalid arguments"),
            Status::ItemNotStored => write!(f, "item not stored"),
            Status::IncrDecrOnNonNumericValue => write!(f, "incr/decr on non-numeric value"),
            Status::VbucketBelongsToAnotherServer => write!(f, "vbucket owned by another server"),
            Status::AuthError => write!(f, "authentication error"),
            Status::AuthContinue => write!(f, "authentication continue"),
            Status::UnknownCommand => write!(f, "unknown command"),
            Status::OutOfMemory => write!(f, "server out of memory"),
            Status::NotSupported => write!(f, "not supported"),
            Status::InternalError => write!(f, "internal error"),
            Status::Busy => write!(f, "busy"),
            Status::TemporaryFailure => write!(f, "temporary failure"),
            Status::Unknown(code) => write!(f, "unknown status 0x{:04x}", code),
            Status::ServerDisconnected => write!(f, "server disconnected"),
        }
    }
}

impl StdError for Status {}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn test_from_u16() {
        assert_eq!(Status::Success, Status::from(0x0000));
        assert_eq!(Status::KeyNotFound, Status::from(0x0001));
        assert_eq!(Status::UnknownCommand, Status::from(0x0081));
        assert_eq!(Status::Unknown(0x00ff), Status::from(0x00ff));
    }
}
