//! The stream transport (component C): a connect/send/receive surface that
//! is blind to the memcached protocol, implemented once per async runtime.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Error;

pub const DEFAULT_PORT: u16 = 11211;

/// A parsed endpoint string, per the grammar `"<host>:<port>" | "<host>" |
/// "/<path>"`. A leading `/` selects a local (Unix domain) socket; anything
/// else is TCP, with the port defaulting to 11211 when absent or
/// unparseable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Local { path: String },
}

impl Endpoint {
    pub fn parse(server: &str) -> Self {
        if let Some(path) = server.strip_prefix('/') {
            return Endpoint::Local {
                path: format!("/{}", path),
            };
        }
        match server.rsplit_once(':') {
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) if port > 0 => Endpoint::Tcp {
                    host: host.to_string(),
                    port,
                },
                _ => Endpoint::Tcp {
                    host: server.to_string(),
                    port: DEFAULT_PORT,
                },
            },
            None => Endpoint::Tcp {
                host: server.to_string(),
                port: DEFAULT_PORT,
            },
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Endpoint::Local { .. })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Local { path } => write!(f, "{}", path),
        }
    }
}

/// A raw, protocol-blind byte stream to one server. One implementation per
/// async runtime (e.g. `rbmc-tokio`'s `TokioStream`) lives outside this
/// crate; it need only know how to connect, push bytes out, and pull an
/// exact number back.
#[async_trait]
pub trait Stream: Sized + Send + Sync + 'static {
    /// Open a fresh connection to `endpoint`. `socket_timeout` bounds each
    /// subsequent read; `None` disables the timeout.
    async fn connect(endpoint: &Endpoint, socket_timeout: Option<Duration>) -> Result<Self, Error>;

    /// Write the entire buffer, blocking until all of it is accepted.
    async fn send_all(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Read exactly `n` bytes. A short read (the peer closed the
    /// connection) must be reported as an `Error::IoError` so the caller can
    /// treat it as a disconnect, never returned as a truncated buffer.
    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error>;

    /// Best-effort shutdown; failures here are not actionable.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_with_port() {
        assert_eq!(
            Endpoint::parse("127.0.0.1:11211"),
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 11211
            }
        );
    }

    #[test]
    fn test_parse_tcp_without_port() {
        assert_eq!(
            Endpoint::parse("127.0.0.1"),
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: DEFAULT_PORT
            }
        );
    }

    #[test]
    fn test_parse_tcp_with_unparseable_port() {
        // Not a valid port: the whole string is the host.
        assert_eq!(
            Endpoint::parse("example.com:not-a-port"),
            Endpoint::Tcp {
                host: "example.com:not-a-port".into(),
                port: DEFAULT_PORT
            }
        );
    }

    #[test]
    fn test_parse_local_socket() {
        assert_eq!(
            Endpoint::parse("/tmp/memcached.sock"),
            Endpoint::Local {
                path: "/tmp/memcached.sock".into()
            }
        );
    }
}
