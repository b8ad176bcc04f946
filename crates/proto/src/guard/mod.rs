//! Connection guard.
//!
//! The single gateway through which every protocol client reaches the
//! network. The guard validates caller input, refuses destinations inside
//! blocked network ranges before any socket operation, races connect, TLS,
//! and each read/write against one wall-clock deadline, and guarantees the
//! socket is released on every early-return path by tying it to the
//! [`GuardedConnection`] value.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sonde_proto::guard::{self, ConnectionRequest};
//!
//! # async fn example() -> sonde_platform::SondeResult<()> {
//! let request = ConnectionRequest::new("example.com", 79, Duration::from_secs(5));
//! let mut conn = guard::connect(&request).await?;
//! conn.write_all(b"admin\r\n").await?;
//! let reply = conn.read(4096).await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod ranges;

use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use sonde_platform::{SondeError, SondeResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Parameters for one guarded connection.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    /// Destination hostname or literal IP address.
    pub host: String,
    /// Destination TCP port.
    pub port: u16,
    /// Wrap the TCP stream in TLS after connecting.
    pub tls: bool,
    /// Total wall-clock budget for the whole exchange.
    pub deadline: Duration,
}

impl ConnectionRequest {
    /// Creates a plain-TCP request.
    pub fn new(host: impl Into<String>, port: u16, deadline: Duration) -> Self {
        ConnectionRequest {
            host: host.into(),
            port,
            tls: false,
            deadline,
        }
    }

    /// Enables TLS wrapping for this request.
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }

    /// Checks the request parameters.
    ///
    /// # Errors
    ///
    /// Returns [`SondeError::Validation`] for an empty host, port 0, or a
    /// non-positive deadline. Runs before any socket operation.
    pub fn validate(&self) -> SondeResult<()> {
        if self.host.trim().is_empty() {
            return Err(SondeError::Validation("Host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(SondeError::Validation("Port must be at least 1".to_string()));
        }
        if self.deadline.is_zero() {
            return Err(SondeError::Validation(
                "Deadline must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wall-clock budget shared by every phase of one exchange.
///
/// The remaining budget is re-derived at each suspension point, so time spent
/// connecting is not available again for reads.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// Starts a deadline `budget` from now.
    pub fn new(budget: Duration) -> Self {
        Deadline {
            expires_at: Instant::now() + budget,
        }
    }

    /// Returns the leftover budget, or [`SondeError::TimedOut`] naming
    /// `phase` once it is exhausted.
    pub fn remaining(&self, phase: &str) -> SondeResult<Duration> {
        let now = Instant::now();
        if now >= self.expires_at {
            return Err(SondeError::TimedOut(format!("{} deadline elapsed", phase)));
        }
        Ok(self.expires_at - now)
    }

    /// Races `future` against the leftover budget.
    pub async fn race<F, T>(&self, phase: &str, future: F) -> SondeResult<T>
    where
        F: std::future::Future<Output = SondeResult<T>>,
    {
        let budget = self.remaining(phase)?;
        match tokio::time::timeout(budget, future).await {
            Ok(result) => result,
            Err(_) => Err(SondeError::TimedOut(format!("{} deadline elapsed", phase))),
        }
    }
}

/// The underlying transport of a guarded connection.
pub enum ProbeStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS over TCP.
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for ProbeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeStream::Plain(_) => write!(f, "ProbeStream::Plain"),
            ProbeStream::Tls(_) => write!(f, "ProbeStream::Tls"),
        }
    }
}

impl AsyncRead for ProbeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ProbeStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            ProbeStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ProbeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ProbeStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            ProbeStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ProbeStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            ProbeStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ProbeStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            ProbeStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// An open, deadline-scoped connection to a vetted destination.
///
/// Owns the socket; dropping the value (on any early-return path) releases
/// it. [`GuardedConnection::close`] consumes the value, so a torn-down
/// connection cannot be used again.
#[derive(Debug)]
pub struct GuardedConnection {
    stream: ProbeStream,
    deadline: Deadline,
}

impl GuardedConnection {
    /// Reads up to `max` bytes, racing the remaining deadline.
    ///
    /// Returns an empty vector on clean EOF.
    pub async fn read(&mut self, max: usize) -> SondeResult<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let deadline = self.deadline;
        let n = deadline
            .race("read", async {
                self.stream.read(&mut buf).await.map_err(SondeError::from)
            })
            .await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Reads exactly `n` bytes, racing the remaining deadline.
    pub async fn read_exact(&mut self, n: usize) -> SondeResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let deadline = self.deadline;
        deadline
            .race("read", async {
                self.stream
                    .read_exact(&mut buf)
                    .await
                    .map(|_| ())
                    .map_err(SondeError::from)
            })
            .await?;
        Ok(buf)
    }

    /// Reads until the peer closes the connection, racing the deadline.
    pub async fn read_to_end(&mut self) -> SondeResult<Vec<u8>> {
        let mut buf = Vec::new();
        let deadline = self.deadline;
        deadline
            .race("read", async {
                self.stream
                    .read_to_end(&mut buf)
                    .await
                    .map(|_| ())
                    .map_err(SondeError::from)
            })
            .await?;
        Ok(buf)
    }

    /// Writes all of `bytes`, racing the remaining deadline.
    pub async fn write_all(&mut self, bytes: &[u8]) -> SondeResult<()> {
        let deadline = self.deadline;
        deadline
            .race("write", async {
                self.stream.write_all(bytes).await.map_err(SondeError::from)?;
                self.stream.flush().await.map_err(SondeError::from)
            })
            .await
    }

    /// Shuts the stream down and consumes the connection.
    pub async fn close(mut self) -> SondeResult<()> {
        // Teardown failures are not interesting to callers; the socket is
        // released either way when `self` drops.
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Hands the raw stream and the remaining deadline to a protocol engine
    /// that manages its own framing.
    pub fn into_stream(self) -> (ProbeStream, Deadline) {
        (self.stream, self.deadline)
    }

    /// The deadline governing this connection.
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }
}

/// Opens a guarded connection.
///
/// Order of operations: parameter validation, blocked-range check on the
/// literal or resolved addresses, TCP connect, optional TLS handshake. The
/// range check never performs I/O and always precedes the connect; every
/// network step is raced against the request deadline.
///
/// # Errors
///
/// [`SondeError::Validation`], [`SondeError::BlockedRange`],
/// [`SondeError::TimedOut`], [`SondeError::ConnectionFailed`], or
/// [`SondeError::TlsFailed`].
pub async fn connect(request: &ConnectionRequest) -> SondeResult<GuardedConnection> {
    request.validate()?;
    let deadline = Deadline::new(request.deadline);

    let addrs: Vec<SocketAddr> = match request.host.parse::<IpAddr>() {
        Ok(ip) => {
            // Literal address: classified with zero I/O.
            check_blocked(ip)?;
            vec![SocketAddr::new(ip, request.port)]
        }
        Err(_) => {
            let host = request.host.clone();
            let port = request.port;
            let resolved = deadline
                .race("resolve", async {
                    tokio::net::lookup_host((host.as_str(), port))
                        .await
                        .map_err(|e| {
                            SondeError::ConnectionFailed(format!(
                                "could not resolve {}: {}",
                                host, e
                            ))
                        })
                })
                .await?
                .collect::<Vec<_>>();
            if resolved.is_empty() {
                return Err(SondeError::ConnectionFailed(format!(
                    "no addresses for {}",
                    request.host
                )));
            }
            for addr in &resolved {
                check_blocked(addr.ip())?;
            }
            resolved
        }
    };

    debug!(host = %request.host, port = request.port, tls = request.tls, "connecting");
    let stream = deadline
        .race("connect", async {
            TcpStream::connect(addrs.as_slice())
                .await
                .map_err(SondeError::from)
        })
        .await?;

    let stream = if request.tls {
        let connector = tls_connector();
        let server_name = ServerName::try_from(request.host.clone())
            .map_err(|e| SondeError::TlsFailed(format!("invalid server name: {}", e)))?;
        let tls_stream = deadline
            .race("TLS handshake", async {
                connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| SondeError::TlsFailed(e.to_string()))
            })
            .await?;
        ProbeStream::Tls(Box::new(tls_stream))
    } else {
        ProbeStream::Plain(stream)
    };

    Ok(GuardedConnection { stream, deadline })
}

fn check_blocked(ip: IpAddr) -> SondeResult<()> {
    match ranges::classify(ip) {
        Some(matched) => Err(SondeError::BlockedRange { matched }),
        None => Ok(()),
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_host() {
        let request = ConnectionRequest::new("  ", 80, Duration::from_secs(1));
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("Host"));
    }

    #[test]
    fn test_validate_zero_port() {
        let request = ConnectionRequest::new("example.com", 0, Duration::from_secs(1));
        assert!(matches!(
            request.validate(),
            Err(SondeError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_zero_deadline() {
        let request = ConnectionRequest::new("example.com", 80, Duration::ZERO);
        assert!(matches!(
            request.validate(),
            Err(SondeError::Validation(_))
        ));
    }

    #[test]
    fn test_with_tls_flag() {
        let request = ConnectionRequest::new("example.com", 443, Duration::from_secs(5)).with_tls();
        assert!(request.tls);
        request.validate().unwrap();
        // The connector builds from the bundled roots without touching the
        // network.
        let _connector = tls_connector();
    }

    #[test]
    fn test_deadline_elapses() {
        let deadline = Deadline {
            expires_at: Instant::now() - Duration::from_millis(1),
        };
        assert!(matches!(
            deadline.remaining("read"),
            Err(SondeError::TimedOut(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_blocked_literal_ip() {
        // Must fail before any socket op, so a tight deadline still returns
        // BlockedRange rather than TimedOut.
        let request = ConnectionRequest::new("104.16.1.1", 443, Duration::from_millis(1));
        match connect(&request).await {
            Err(SondeError::BlockedRange { matched }) => {
                assert_eq!(matched, "104.16.0.0/13");
            }
            other => panic!("expected BlockedRange, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_connect_invalid_request_short_circuits() {
        let request = ConnectionRequest::new("", 80, Duration::from_secs(1));
        assert!(matches!(
            connect(&request).await,
            Err(SondeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_guarded_read_write_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(b"pong").await.unwrap();
        });

        let request =
            ConnectionRequest::new(addr.ip().to_string(), addr.port(), Duration::from_secs(5));
        let mut conn = connect(&request).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        let reply = conn.read_exact(4).await.unwrap();
        assert_eq!(&reply, b"pong");
        conn.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_times_out_against_silent_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Keep the listener alive but never respond.
        let request =
            ConnectionRequest::new(addr.ip().to_string(), addr.port(), Duration::from_millis(100));
        let mut conn = connect(&request).await.unwrap();
        match conn.read(16).await {
            Err(SondeError::TimedOut(msg)) => assert!(msg.contains("read")),
            other => panic!("expected TimedOut, got {:?}", other),
        }
        drop(listener);
    }
}
