//! Redis client: RESP2 encoder and bounded recursive decoder.
//!
//! Commands go out as RESP arrays of bulk strings. Replies are decoded by a
//! total recursive parser over the five RESP2 types; nesting is bounded by
//! the shared [`DepthGuard`] at depth 10, so a hostile server cannot drive
//! unbounded recursion with a stream of `*1\r\n*1\r\n…`.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use sonde_platform::{ProtocolResult, SondeError, SondeResult};
use std::time::Duration;

use crate::codec::{Decode, DepthGuard, DEFAULT_MAX_DEPTH};
use crate::exchange::{run_exchange, Exchange};
use crate::guard::{ConnectionRequest, GuardedConnection};

/// Upper bound on a single bulk string or array the decoder will accept.
const MAX_ELEMENT_LEN: i64 = 8 * 1024 * 1024;

/// One decoded RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK\r\n`
    SimpleString(String),
    /// `-ERR …\r\n`
    Error(String),
    /// `:42\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`; `$-1\r\n` is the null bulk string.
    BulkString(Option<Vec<u8>>),
    /// `*2\r\n…`; `*-1\r\n` is the null array.
    Array(Option<Vec<RespValue>>),
}

/// Encodes a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.put_slice(arg.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.to_vec()
}

/// Decodes one RESP value from `buf` at `offset`.
///
/// Truncated input yields [`Decode::NeedMore`]; malformed input and nesting
/// past the guard's budget are parse errors.
pub fn decode(buf: &[u8], offset: usize, depth: DepthGuard) -> SondeResult<Decode<(RespValue, usize)>> {
    let type_byte = match buf.get(offset) {
        Some(&b) => b,
        None => return Ok(Decode::NeedMore),
    };

    match type_byte {
        b'+' | b'-' | b':' => {
            let (line, consumed) = match read_crlf_line(buf, offset + 1)? {
                Some(found) => found,
                None => return Ok(Decode::NeedMore),
            };
            let value = match type_byte {
                b'+' => RespValue::SimpleString(line),
                b'-' => RespValue::Error(line),
                _ => RespValue::Integer(parse_integer(&line)?),
            };
            Ok(Decode::Complete {
                value: (value, 1 + consumed),
                consumed: 1 + consumed,
            })
        }
        b'$' => {
            let (line, header) = match read_crlf_line(buf, offset + 1)? {
                Some(found) => found,
                None => return Ok(Decode::NeedMore),
            };
            let length = parse_integer(&line)?;
            if length == -1 {
                let consumed = 1 + header;
                return Ok(Decode::Complete {
                    value: (RespValue::BulkString(None), consumed),
                    consumed,
                });
            }
            if length < 0 || length > MAX_ELEMENT_LEN {
                return Err(SondeError::Parse(format!(
                    "bulk string length {} out of range",
                    length
                )));
            }
            let start = offset + 1 + header;
            let end = start + length as usize;
            if buf.len() < end + 2 {
                return Ok(Decode::NeedMore);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(SondeError::Parse(
                    "bulk string not CRLF-terminated".to_string(),
                ));
            }
            let consumed = 1 + header + length as usize + 2;
            Ok(Decode::Complete {
                value: (RespValue::BulkString(Some(buf[start..end].to_vec())), consumed),
                consumed,
            })
        }
        b'*' => {
            let inner = depth.descend()?;
            let (line, header) = match read_crlf_line(buf, offset + 1)? {
                Some(found) => found,
                None => return Ok(Decode::NeedMore),
            };
            let length = parse_integer(&line)?;
            if length == -1 {
                let consumed = 1 + header;
                return Ok(Decode::Complete {
                    value: (RespValue::Array(None), consumed),
                    consumed,
                });
            }
            if length < 0 || length > MAX_ELEMENT_LEN {
                return Err(SondeError::Parse(format!(
                    "array length {} out of range",
                    length
                )));
            }
            let mut items = Vec::with_capacity(length as usize);
            let mut cursor = offset + 1 + header;
            for _ in 0..length {
                match decode(buf, cursor, inner)? {
                    Decode::Complete {
                        value: (item, used), ..
                    } => {
                        items.push(item);
                        cursor += used;
                    }
                    Decode::NeedMore => return Ok(Decode::NeedMore),
                }
            }
            let consumed = cursor - offset;
            Ok(Decode::Complete {
                value: (RespValue::Array(Some(items)), consumed),
                consumed,
            })
        }
        other => Err(SondeError::Parse(format!(
            "unknown RESP type byte {:#04x}",
            other
        ))),
    }
}

/// Reads a CRLF-terminated line; `None` when the terminator has not arrived.
fn read_crlf_line(buf: &[u8], offset: usize) -> SondeResult<Option<(String, usize)>> {
    let haystack = match buf.get(offset..) {
        Some(rest) => rest,
        None => return Ok(None),
    };
    let pos = match haystack.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => pos,
        None => return Ok(None),
    };
    let line = std::str::from_utf8(&haystack[..pos])
        .map_err(|_| SondeError::Parse("RESP line is not UTF-8".to_string()))?;
    Ok(Some((line.to_string(), pos + 2)))
}

fn parse_integer(line: &str) -> SondeResult<i64> {
    line.parse::<i64>()
        .map_err(|_| SondeError::Parse(format!("invalid RESP integer {:?}", line)))
}

/// Parameters for a PING probe.
#[derive(Debug, Clone)]
pub struct RedisParams {
    /// Destination hostname or literal IP address.
    pub host: String,
    /// Destination port, usually 6379.
    pub port: u16,
    /// Optional message to echo instead of the default PONG.
    pub message: Option<String>,
    /// Total budget in milliseconds.
    pub timeout_ms: u64,
}

/// Sends PING and returns the server's reply text.
pub async fn ping(params: &RedisParams) -> ProtocolResult<String> {
    let request = ConnectionRequest::new(
        params.host.clone(),
        params.port,
        Duration::from_millis(params.timeout_ms),
    );
    let exchange = Ping {
        message: params.message.clone(),
    };
    run_exchange(&request, exchange).await
}

struct Ping {
    message: Option<String>,
}

#[async_trait]
impl Exchange for Ping {
    type Output = String;

    fn validate(&self) -> SondeResult<()> {
        if let Some(message) = &self.message {
            if message.len() > 512 {
                return Err(SondeError::Validation(
                    "Ping message must be at most 512 bytes".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<String> {
        let command = match &self.message {
            Some(message) => encode_command(&["PING", message]),
            None => encode_command(&["PING"]),
        };
        conn.write_all(&command).await?;

        let mut buf = Vec::new();
        loop {
            let chunk = conn.read(4096).await?;
            if chunk.is_empty() {
                return Err(SondeError::ConnectionFailed(
                    "server closed before a full reply".to_string(),
                ));
            }
            buf.extend_from_slice(&chunk);

            match decode(&buf, 0, DepthGuard::new(DEFAULT_MAX_DEPTH))? {
                Decode::Complete { value: (value, _), .. } => {
                    return match value {
                        RespValue::SimpleString(text) => Ok(text),
                        RespValue::BulkString(Some(bytes)) => String::from_utf8(bytes)
                            .map_err(|_| SondeError::Parse("reply is not UTF-8".to_string())),
                        RespValue::Error(text) => Err(SondeError::UnexpectedMessage(format!(
                            "server error: {}",
                            text
                        ))),
                        other => Err(SondeError::UnexpectedMessage(format!(
                            "unexpected PING reply {:?}",
                            other
                        ))),
                    };
                }
                Decode::NeedMore => continue,
            }
        }
    }
}
