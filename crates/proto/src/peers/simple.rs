//! Clients for the classic single-shot TCP protocols.
//!
//! - Echo (RFC 862): the client sends a payload and the server must return
//!   it byte for byte.
//! - Discard (RFC 863): the client sends a payload; the server reads and
//!   drops it, answering nothing.
//! - Daytime (RFC 867): the server sends one human-readable line and closes.
//! - Chargen (RFC 864): the server streams characters indefinitely; the
//!   client reads a bounded sample and disconnects.
//! - Time (RFC 868): the server sends a 32-bit big-endian count of seconds
//!   since 1900-01-01 and closes; the client converts to Unix seconds.
//! - Finger (RFC 1288): the client sends a query line, the server answers
//!   until EOF.

use async_trait::async_trait;
use sonde_platform::{ProtocolResult, SondeError, SondeResult};
use std::time::Duration;

use crate::codec;
use crate::exchange::{run_exchange, Exchange};
use crate::guard::{ConnectionRequest, GuardedConnection};

/// Offset between the RFC 868 epoch (1900) and the Unix epoch (1970).
pub const RFC868_UNIX_OFFSET: u64 = 2_208_988_800;

/// Parameters shared by the single-shot probes.
#[derive(Debug, Clone)]
pub struct SimpleParams {
    /// Destination hostname or literal IP address.
    pub host: String,
    /// Destination port.
    pub port: u16,
    /// Total budget in milliseconds.
    pub timeout_ms: u64,
}

impl SimpleParams {
    fn request(&self) -> ConnectionRequest {
        ConnectionRequest::new(
            self.host.clone(),
            self.port,
            Duration::from_millis(self.timeout_ms),
        )
    }
}

/// Largest payload accepted by the Echo and Discard probes.
pub const MAX_SIMPLE_PAYLOAD: usize = 64 * 1024;

/// Largest sample the Chargen probe will collect.
pub const MAX_CHARGEN_SAMPLE: usize = 64 * 1024;

/// Sends `message` to an Echo server (RFC 862) and verifies the reply.
///
/// The server must return the payload byte for byte; any deviation is a
/// protocol error, not a partial success.
pub async fn echo(params: &SimpleParams, message: &str) -> ProtocolResult<String> {
    let exchange = Echo {
        message: message.to_string(),
    };
    run_exchange(&params.request(), exchange).await
}

/// Sends `payload` to a Discard server (RFC 863).
///
/// The server answers nothing; success means the bytes were flushed. Returns
/// the number of bytes written.
pub async fn discard(params: &SimpleParams, payload: &[u8]) -> ProtocolResult<usize> {
    let exchange = Discard {
        payload: payload.to_vec(),
    };
    run_exchange(&params.request(), exchange).await
}

/// Reads the Daytime line (RFC 867), trimmed of its terminator.
pub async fn daytime(params: &SimpleParams) -> ProtocolResult<String> {
    run_exchange(&params.request(), Daytime).await
}

/// Samples up to `max_bytes` from a Chargen server (RFC 864).
///
/// The server streams forever; the client disconnects once the sample is
/// collected or the server closes first.
pub async fn chargen(params: &SimpleParams, max_bytes: usize) -> ProtocolResult<String> {
    run_exchange(&params.request(), Chargen { max_bytes }).await
}

/// Reads the Time value (RFC 868) as Unix seconds.
pub async fn time(params: &SimpleParams) -> ProtocolResult<u64> {
    run_exchange(&params.request(), Time).await
}

/// Sends a Finger query (RFC 1288) and returns the full response.
///
/// An empty query asks for the server's default user listing.
pub async fn finger(params: &SimpleParams, query: &str) -> ProtocolResult<String> {
    let exchange = Finger {
        query: query.to_string(),
    };
    run_exchange(&params.request(), exchange).await
}

struct Echo {
    message: String,
}

#[async_trait]
impl Exchange for Echo {
    type Output = String;

    fn validate(&self) -> SondeResult<()> {
        if self.message.is_empty() {
            return Err(SondeError::Validation(
                "Echo message must not be empty".to_string(),
            ));
        }
        if self.message.len() > MAX_SIMPLE_PAYLOAD {
            return Err(SondeError::Validation(format!(
                "Echo message must be at most {} bytes",
                MAX_SIMPLE_PAYLOAD
            )));
        }
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<String> {
        conn.write_all(self.message.as_bytes()).await?;
        let reply = conn.read_exact(self.message.len()).await?;
        if reply != self.message.as_bytes() {
            return Err(SondeError::UnexpectedMessage(
                "echo reply differs from the sent payload".to_string(),
            ));
        }
        Ok(self.message.clone())
    }
}

struct Discard {
    payload: Vec<u8>,
}

#[async_trait]
impl Exchange for Discard {
    type Output = usize;

    fn validate(&self) -> SondeResult<()> {
        if self.payload.is_empty() {
            return Err(SondeError::Validation(
                "Discard payload must not be empty".to_string(),
            ));
        }
        if self.payload.len() > MAX_SIMPLE_PAYLOAD {
            return Err(SondeError::Validation(format!(
                "Discard payload must be at most {} bytes",
                MAX_SIMPLE_PAYLOAD
            )));
        }
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<usize> {
        conn.write_all(&self.payload).await?;
        Ok(self.payload.len())
    }
}

struct Chargen {
    max_bytes: usize,
}

#[async_trait]
impl Exchange for Chargen {
    type Output = String;

    fn validate(&self) -> SondeResult<()> {
        if self.max_bytes == 0 {
            return Err(SondeError::Validation(
                "Chargen sample size must be at least 1 byte".to_string(),
            ));
        }
        if self.max_bytes > MAX_CHARGEN_SAMPLE {
            return Err(SondeError::Validation(format!(
                "Chargen sample size must be at most {} bytes",
                MAX_CHARGEN_SAMPLE
            )));
        }
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<String> {
        let mut sample = Vec::with_capacity(self.max_bytes);
        while sample.len() < self.max_bytes {
            let chunk = conn.read(self.max_bytes - sample.len()).await?;
            if chunk.is_empty() {
                break;
            }
            sample.extend_from_slice(&chunk);
        }
        if sample.is_empty() {
            return Err(SondeError::ConnectionFailed(
                "server closed without sending any characters".to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&sample).into_owned())
    }
}

struct Daytime;

#[async_trait]
impl Exchange for Daytime {
    type Output = String;

    fn validate(&self) -> SondeResult<()> {
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<String> {
        let bytes = conn.read_to_end().await?;
        if bytes.is_empty() {
            return Err(SondeError::ConnectionFailed(
                "server closed without sending a daytime line".to_string(),
            ));
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| SondeError::Parse("daytime line is not UTF-8".to_string()))?;
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }
}

struct Time;

#[async_trait]
impl Exchange for Time {
    type Output = u64;

    fn validate(&self) -> SondeResult<()> {
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<u64> {
        let bytes = conn.read_exact(4).await?;
        let (since_1900, _) = codec::read_u32_be(&bytes, 0)?;
        u64::from(since_1900)
            .checked_sub(RFC868_UNIX_OFFSET)
            .ok_or_else(|| {
                SondeError::Parse(format!(
                    "time value {} predates the Unix epoch",
                    since_1900
                ))
            })
    }
}

struct Finger {
    query: String,
}

#[async_trait]
impl Exchange for Finger {
    type Output = String;

    fn validate(&self) -> SondeResult<()> {
        if self.query.contains(['\r', '\n']) {
            return Err(SondeError::Validation(
                "Finger query must not contain line breaks".to_string(),
            ));
        }
        if self.query.len() > 256 {
            return Err(SondeError::Validation(
                "Finger query must be at most 256 bytes".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<String> {
        conn.write_all(format!("{}\r\n", self.query).as_bytes()).await?;
        let bytes = conn.read_to_end().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn one_shot_server<F>(respond: F) -> std::net::SocketAddr
    where
        F: FnOnce(Vec<u8>) -> Vec<u8> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            // Read whatever arrives in the first chunk; one-shot servers do
            // not wait for more.
            let mut buf = [0u8; 512];
            if let Ok(n) = tokio::time::timeout(
                Duration::from_millis(100),
                sock.read(&mut buf),
            )
            .await
            .unwrap_or(Ok(0))
            {
                request.extend_from_slice(&buf[..n]);
            }
            let response = respond(request);
            sock.write_all(&response).await.unwrap();
            sock.shutdown().await.unwrap();
        });
        addr
    }

    fn params(addr: std::net::SocketAddr) -> SimpleParams {
        SimpleParams {
            host: addr.ip().to_string(),
            port: addr.port(),
            timeout_ms: 5000,
        }
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let addr = one_shot_server(|request| request).await;
        let result = echo(&params(addr), "hello echo").await;
        assert_eq!(result.payload().map(String::as_str), Some("hello echo"));
    }

    #[tokio::test]
    async fn test_echo_mismatch_is_protocol_error() {
        let addr = one_shot_server(|request| vec![b'X'; request.len()]).await;
        let result = echo(&params(addr), "hello echo").await;
        assert!(result.error().unwrap().contains("differs"));
    }

    #[tokio::test]
    async fn test_echo_rejects_empty_message() {
        let params = SimpleParams {
            host: "127.0.0.1".to_string(),
            port: 7,
            timeout_ms: 1000,
        };
        let result = echo(&params, "").await;
        assert!(result.error().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_discard_write_only() {
        let addr = one_shot_server(|request| {
            assert_eq!(request, b"drop these bytes");
            Vec::new()
        })
        .await;
        let result = discard(&params(addr), b"drop these bytes").await;
        assert_eq!(result.payload(), Some(&16usize));
    }

    #[tokio::test]
    async fn test_chargen_bounded_sample() {
        let addr = one_shot_server(|_| {
            // More than the client asked for; the sample must stay bounded.
            b"!\"#$%&'()*+,-./0123456789".repeat(8)
        })
        .await;
        let result = chargen(&params(addr), 10).await;
        assert_eq!(result.payload().map(String::len), Some(10));
    }

    #[tokio::test]
    async fn test_chargen_rejects_zero_sample() {
        let params = SimpleParams {
            host: "127.0.0.1".to_string(),
            port: 19,
            timeout_ms: 1000,
        };
        let result = chargen(&params, 0).await;
        assert!(result.error().unwrap().contains("at least 1"));
    }

    #[tokio::test]
    async fn test_daytime() {
        let addr = one_shot_server(|_| b"Wed Aug 27 12:00:00 2026\r\n".to_vec()).await;
        let result = daytime(&params(addr)).await;
        assert_eq!(
            result.payload().map(String::as_str),
            Some("Wed Aug 27 12:00:00 2026")
        );
    }

    #[tokio::test]
    async fn test_time_conversion() {
        // 2208988800 seconds since 1900 is exactly the Unix epoch.
        let addr =
            one_shot_server(|_| (RFC868_UNIX_OFFSET as u32 + 1000).to_be_bytes().to_vec()).await;
        let result = time(&params(addr)).await;
        assert_eq!(result.payload(), Some(&1000u64));
    }

    #[tokio::test]
    async fn test_time_before_epoch_rejected() {
        let addr = one_shot_server(|_| 1000u32.to_be_bytes().to_vec()).await;
        let result = time(&params(addr)).await;
        assert!(result.error().unwrap().contains("epoch"));
    }

    #[tokio::test]
    async fn test_finger_query() {
        let addr = one_shot_server(|request| {
            assert_eq!(request, b"admin\r\n");
            b"Login: admin\nNo plan.\n".to_vec()
        })
        .await;
        let result = finger(&params(addr), "admin").await;
        assert_eq!(
            result.payload().map(String::as_str),
            Some("Login: admin\nNo plan.\n")
        );
    }

    #[tokio::test]
    async fn test_finger_rejects_injection() {
        let params = SimpleParams {
            host: "127.0.0.1".to_string(),
            port: 79,
            timeout_ms: 1000,
        };
        let result = finger(&params, "admin\r\nQUIT").await;
        assert!(result.error().unwrap().contains("line breaks"));
    }
}
