//! Runtime-agnostic core of a memcached binary protocol client.
//!
//! This crate knows how to speak the wire protocol, tag and compress
//! values, authenticate, and route keys across a set of servers. It does
//! not know how to open a socket: that's one small trait
//! ([`transport::Stream`]) implemented once per async runtime, e.g. by
//! `rbmc-tokio`.
//!
//! If compression is undesired, disable the `zlib` feature (on by default).

pub mod client;
pub mod compression;
pub(crate) mod connection;
pub mod engine;
pub mod error;
pub(crate) mod protocol;
pub(crate) mod ring;
pub mod router;
pub mod transport;
pub mod value;

pub use client::{Client, ClientBuilder, RouterPolicy};
pub use connection::Credentials;
pub use error::Error;
pub use protocol::{ProtocolError, Status};
pub use value::{BincodeSerializer, Serializer, Value};
