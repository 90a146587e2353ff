//! Connection and authentication state machine (component D).
//!
//! A [`Connection`] lazily opens its stream on first use, runs the SASL
//! PLAIN handshake when credentials are configured, and tracks a
//! retry-deferral window so repeated failures don't hammer a dead server.
//! It deliberately does not use a connection pool: the state transitions
//! here (especially "the first reconnect after a break is immediate, only a
//! *failed* reconnect arms the delay") are easiest to get right against a
//! single owned stream, acquired for the duration of one operation by the
//! engine above it.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    error::Error,
    protocol::{Header, Packet, Status, HEADER_LEN},
    transport::{Endpoint, Stream},
};

/// Credentials for the SASL PLAIN handshake.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The default retry-deferral window for TCP endpoints. Local-socket
/// endpoints default to zero: a Unix socket either exists or it doesn't,
/// there's no network flakiness to wait out.
pub const DEFAULT_TCP_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_LOCAL_RETRY_DELAY: Duration = Duration::from_secs(0);

/// A single lazily-opened, optionally-authenticated connection to one
/// server, plus its retry-deferral window.
pub struct Connection<S: Stream> {
    endpoint: Endpoint,
    socket_timeout: Option<Duration>,
    credentials: Option<Credentials>,
    retry_delay: Duration,
    reconnects_deferred_until: Option<Instant>,
    stream: Option<S>,
    authenticated: bool,
}

impl<S: Stream> Connection<S> {
    pub fn new(endpoint: Endpoint, socket_timeout: Option<Duration>, credentials: Option<Credentials>) -> Self {
        let retry_delay = if endpoint.is_local() {
            DEFAULT_LOCAL_RETRY_DELAY
        } else {
            DEFAULT_TCP_RETRY_DELAY
        };
        Connection {
            endpoint,
            socket_timeout,
            credentials,
            retry_delay,
            reconnects_deferred_until: None,
            stream: None,
            authenticated: false,
        }
    }

    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay = delay;
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Build a connection already holding an open, authenticated stream,
    /// bypassing `connect()`/the SASL handshake. Only meant for tests that
    /// need to hand the engine a pre-scripted stream.
    #[cfg(test)]
    pub(crate) fn from_stream(endpoint: Endpoint, stream: S) -> Self {
        Connection {
            endpoint,
            socket_timeout: None,
            credentials: None,
            retry_delay: DEFAULT_TCP_RETRY_DELAY,
            reconnects_deferred_until: None,
            stream: Some(stream),
            authenticated: true,
        }
    }

    fn arm_deferral(&mut self) {
        self.reconnects_deferred_until = Some(Instant::now() + self.retry_delay);
    }

    /// Drop the stream without arming the retry-deferral window. Used when
    /// an otherwise-`Ready` connection breaks mid-operation: per the spec,
    /// the very next request must still attempt an immediate reconnect.
    async fn mark_broken(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await;
        }
        self.authenticated = false;
    }

    /// Fully close the connection, as if by an explicit `disconnect()` call.
    pub async fn disconnect(&mut self) {
        self.mark_broken().await;
        self.reconnects_deferred_until = None;
    }

    /// Ensure the connection is open and authenticated, performing the
    /// lazy-connect and SASL handshake if needed.
    ///
    /// Returns `Ok(true)` when ready to issue a request, `Ok(false)` when
    /// the connection is deferred or the connect attempt itself failed
    /// (transient; callers should produce the neutral disconnected result
    /// for the in-flight operation), and `Err(_)` for permanent
    /// authentication failures that must propagate to the caller.
    pub async fn ensure_ready(&mut self) -> Result<bool, Error> {
        if self.stream.is_some() {
            return Ok(true);
        }

        if let Some(until) = self.reconnects_deferred_until {
            if until > Instant::now() {
                return Ok(false);
            }
        }

        match S::connect(&self.endpoint, self.socket_timeout).await {
            Ok(stream) => {
                debug!(endpoint = %self.endpoint, "connected");
                self.stream = Some(stream);
                self.reconnects_deferred_until = None;
            }
            Err(_) => {
                warn!(endpoint = %self.endpoint, delay = ?self.retry_delay, "connect failed, deferring retries");
                self.arm_deferral();
                return Ok(false);
            }
        }

        let credentials = self.credentials.clone();
        match credentials {
            None => {
                self.authenticated = true;
                Ok(true)
            }
            Some(creds) => match self.authenticate(&creds).await {
                Ok(()) => {
                    self.authenticated = true;
                    Ok(true)
                }
                Err(Error::IoError(_)) => {
                    // The handshake itself saw a disconnect: transient.
                    self.mark_broken().await;
                    Ok(false)
                }
                Err(err @ (Error::AuthenticationNotSupported | Error::InvalidCredentials)) => {
                    warn!(endpoint = %self.endpoint, "authentication failed permanently: {}", err);
                    self.mark_broken().await;
                    Err(err)
                }
                Err(err) => {
                    self.mark_broken().await;
                    Err(err)
                }
            },
        }
    }

    async fn authenticate(&mut self, creds: &Credentials) -> Result<(), Error> {
        info!(username = %creds.username, "authenticating");
        self.write_packet_raw(&Packet::sasl_list()).await?;
        let list_response = self.read_packet_raw().await?;

        if list_response.status() == Status::UnknownCommand {
            debug!("server does not require authentication");
            return Ok(());
        }

        let mechanisms = std::str::from_utf8(&list_response.value).unwrap_or("");
        if !mechanisms.split_whitespace().any(|m| m == "PLAIN") {
            return Err(Error::AuthenticationNotSupported);
        }

        let mut payload = Vec::with_capacity(creds.username.len() + creds.password.len() + 2);
        payload.push(0_u8);
        payload.extend_from_slice(creds.username.as_bytes());
        payload.push(0_u8);
        payload.extend_from_slice(creds.password.as_bytes());

        self.write_packet_raw(&Packet::sasl_auth(b"PLAIN", payload)).await?;
        let auth_response = self.read_packet_raw().await?;

        match auth_response.status() {
            Status::Success => {
                debug!("authentication succeeded");
                Ok(())
            }
            Status::AuthError => Err(Error::InvalidCredentials),
            other => Err(Error::Status(other)),
        }
    }

    /// Write a request packet. The caller must have already confirmed
    /// [`Connection::ensure_ready`] returned `Ok(true)`.
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<(), Error> {
        match self.write_packet_raw(packet).await {
            Ok(()) => Ok(()),
            Err(err @ Error::IoError(_)) => {
                self.mark_broken().await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Read one response packet.
    pub async fn read_packet(&mut self) -> Result<Packet, Error> {
        match self.read_packet_raw().await {
            Ok(packet) => Ok(packet),
            Err(err @ Error::IoError(_)) => {
                self.mark_broken().await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn write_packet_raw(&mut self, packet: &Packet) -> Result<(), Error> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        stream.send_all(&packet.encode()).await
    }

    async fn read_packet_raw(&mut self) -> Result<Packet, Error> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let header_bytes = stream.read_exact(HEADER_LEN).await?;
        let header = Header::decode_response(&header_bytes)?;
        let body = if header.body_len > 0 {
            stream.read_exact(header.body_len as usize).await?
        } else {
            vec![]
        };
        Ok(Packet::from_header(header, body)?)
    }
}

fn not_connected() -> Error {
    Error::IoError(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "connection is not open",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FlakyStream {
        fail_connects: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Stream for FlakyStream {
        async fn connect(_endpoint: &Endpoint, _timeout: Option<Duration>) -> Result<Self, Error> {
            Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        }

        async fn send_all(&mut self, _bytes: &[u8]) -> Result<(), Error> {
            Ok(())
        }

        async fn read_exact(&mut self, _n: usize) -> Result<Vec<u8>, Error> {
            Ok(vec![])
        }

        async fn close(&mut self) {}
    }

    #[test]
    fn test_retry_deferral_armed_only_after_failed_connect() {
        tokio_test::block_on(async {
            let mut conn: Connection<FlakyStream> =
                Connection::new(Endpoint::parse("127.0.0.1:1"), None, None);
            conn.set_retry_delay(Duration::from_secs(60));

            assert_eq!(conn.ensure_ready().await.unwrap(), false);
            assert!(conn.reconnects_deferred_until.is_some());

            // A second attempt within the window must not touch the network
            // again (FlakyStream would just fail again, but the point is
            // ensure_ready short-circuits before calling connect()).
            assert_eq!(conn.ensure_ready().await.unwrap(), false);
        });
    }

    #[test]
    fn test_local_socket_default_retry_delay_is_zero() {
        let conn: Connection<FlakyStream> =
            Connection::new(Endpoint::parse("/tmp/memcached.sock"), None, None);
        assert_eq!(conn.retry_delay, DEFAULT_LOCAL_RETRY_DELAY);
    }

    #[test]
    fn test_tcp_default_retry_delay_is_five_seconds() {
        let conn: Connection<FlakyStream> =
            Connection::new(Endpoint::parse("127.0.0.1:11211"), None, None);
        assert_eq!(conn.retry_delay, DEFAULT_TCP_RETRY_DELAY);
    }
}
