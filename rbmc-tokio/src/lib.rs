//! Tokio transport binding for `rbmc-core`.
//!
//! This crate supplies the one thing the core client can't be
//! runtime-agnostic about: an actual socket. [`TokioStream`] connects over
//! TCP or a Unix domain socket; with the `tls` feature, [`TokioTlsStream`]
//! wraps the TCP connection in rustls.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

use rbmc_core::error::Error;
use rbmc_core::transport::{Endpoint, Stream};

enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// A plaintext TCP or Unix domain socket, selected by [`Endpoint`]'s shape.
pub struct TokioStream {
    socket: Socket,
    read_timeout: Option<Duration>,
}

#[async_trait]
impl Stream for TokioStream {
    async fn connect(endpoint: &Endpoint, socket_timeout: Option<Duration>) -> Result<Self, Error> {
        let socket = match endpoint {
            Endpoint::Tcp { host, port } => {
                debug!(host = %host, port = %port, "opening tcp connection");
                Socket::Tcp(TcpStream::connect((host.as_str(), *port)).await?)
            }
            Endpoint::Local { path } => {
                debug!(path = %path, "opening unix socket");
                Socket::Unix(UnixStream::connect(path).await?)
            }
        };
        Ok(TokioStream {
            socket,
            read_timeout: socket_timeout,
        })
    }

    async fn send_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        match &mut self.socket {
            Socket::Tcp(s) => s.write_all(bytes).await?,
            Socket::Unix(s) => s.write_all(bytes).await?,
        }
        Ok(())
    }

    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0_u8; n];
        let read = async {
            match &mut self.socket {
                Socket::Tcp(s) => s.read_exact(&mut buf).await,
                Socket::Unix(s) => s.read_exact(&mut buf).await,
            }
        };
        match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| Error::IoError(io::Error::new(io::ErrorKind::TimedOut, "read timed out")))??,
            None => read.await?,
        };
        Ok(buf)
    }

    async fn close(&mut self) {
        let _ = match &mut self.socket {
            Socket::Tcp(s) => s.shutdown().await,
            Socket::Unix(s) => s.shutdown().await,
        };
    }
}

#[cfg(feature = "tls")]
mod tls {
    use super::*;
    use std::sync::Arc;
    use tokio_rustls::{
        client::TlsStream,
        rustls::{ClientConfig, RootCertStore},
        TlsConnector,
    };

    fn default_tls_config() -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }

    /// A TCP connection wrapped in TLS. Local (Unix) endpoints are rejected:
    /// TLS is a network-transport concern, not a local-IPC one.
    pub struct TokioTlsStream {
        stream: TlsStream<TcpStream>,
        read_timeout: Option<Duration>,
    }

    #[async_trait]
    impl Stream for TokioTlsStream {
        async fn connect(endpoint: &Endpoint, socket_timeout: Option<Duration>) -> Result<Self, Error> {
            let (host, port) = match endpoint {
                Endpoint::Tcp { host, port } => (host.clone(), *port),
                Endpoint::Local { .. } => {
                    return Err(Error::IoError(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "TLS is not supported over a local socket endpoint",
                    )))
                }
            };
            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            let connector = TlsConnector::from(default_tls_config());
            let server_name = rustls_pki_types::ServerName::try_from(host)
                .map_err(|_| Error::IoError(io::Error::new(io::ErrorKind::InvalidInput, "invalid server name")))?;
            let stream = connector.connect(server_name, tcp).await?;
            Ok(TokioTlsStream {
                stream,
                read_timeout: socket_timeout,
            })
        }

        async fn send_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
            self.stream.write_all(bytes).await?;
            Ok(())
        }

        async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error> {
            let mut buf = vec![0_u8; n];
            let read = self.stream.read_exact(&mut buf);
            match self.read_timeout {
                Some(timeout) => tokio::time::timeout(timeout, read)
                    .await
                    .map_err(|_| Error::IoError(io::Error::new(io::ErrorKind::TimedOut, "read timed out")))??,
                None => read.await?,
            };
            Ok(buf)
        }

        async fn close(&mut self) {
            let _ = self.stream.shutdown().await;
        }
    }
}

#[cfg(feature = "tls")]
pub use tls::TokioTlsStream;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0_u8; 5];
                if socket.read_exact(&mut buf).await.is_ok() {
                    let _ = socket.write_all(&buf).await;
                }
            }
        });
        addr
    }

    #[test]
    fn test_tcp_round_trip() {
        tokio_test::block_on(async {
            let addr = echo_server().await;
            let endpoint = Endpoint::parse(&addr.to_string());
            let mut stream = TokioStream::connect(&endpoint, None).await.unwrap();
            stream.send_all(b"hello").await.unwrap();
            let echoed = stream.read_exact(5).await.unwrap();
            assert_eq!(echoed, b"hello");
        });
    }

    #[test]
    fn test_connection_refused_surfaces_as_io_error() {
        tokio_test::block_on(async {
            let endpoint = Endpoint::parse("127.0.0.1:1");
            let result = TokioStream::connect(&endpoint, None).await;
            assert!(result.is_err());
        });
    }
}
