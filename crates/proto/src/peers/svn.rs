//! svnserve greeting client.
//!
//! An svnserve server speaks first: it sends an S-expression greeting of the
//! form
//!
//! ```text
//! ( success ( minver maxver ( cap ... ) ( mech ... ) ) )
//! ( failure ( ( code "message" "file" line ) ) )
//! ```
//!
//! The probe reads the greeting, parses it with the bounded S-expression
//! parser, and reports the protocol versions and capability list without
//! ever authenticating.

use async_trait::async_trait;
use sonde_platform::{ProtocolResult, SondeError, SondeResult};
use std::time::Duration;

use crate::codec::{parse_sexpr, SExpr, DEFAULT_MAX_DEPTH};
use crate::exchange::{run_exchange, Exchange};
use crate::guard::{ConnectionRequest, GuardedConnection};

/// Parsed svnserve greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Greeting {
    /// The server is ready.
    Success {
        /// Minimum protocol version.
        min_version: u32,
        /// Maximum protocol version.
        max_version: u32,
        /// Advertised capabilities.
        capabilities: Vec<String>,
        /// Advertised auth mechanisms.
        mechanisms: Vec<String>,
    },
    /// The server refused the connection.
    Failure {
        /// Concatenated failure messages.
        message: String,
    },
}

/// Parameters for a greeting probe.
#[derive(Debug, Clone)]
pub struct SvnParams {
    /// Destination hostname or literal IP address.
    pub host: String,
    /// Destination port, usually 3690.
    pub port: u16,
    /// Total budget in milliseconds.
    pub timeout_ms: u64,
}

/// Connects and reads the server greeting.
pub async fn read_greeting(params: &SvnParams) -> ProtocolResult<Greeting> {
    let request = ConnectionRequest::new(
        params.host.clone(),
        params.port,
        Duration::from_millis(params.timeout_ms),
    );
    run_exchange(&request, ReadGreeting).await
}

/// Parses greeting text into a typed [`Greeting`].
pub fn parse_greeting(text: &str) -> SondeResult<Greeting> {
    let expr = parse_sexpr(text.trim(), DEFAULT_MAX_DEPTH)?;
    let items = expr
        .as_list()
        .ok_or_else(|| SondeError::Parse("greeting is not a list".to_string()))?;
    let head = items
        .first()
        .and_then(SExpr::as_atom)
        .ok_or_else(|| SondeError::Parse("greeting missing status atom".to_string()))?;

    match head {
        "success" => {
            let body = items
                .get(1)
                .and_then(SExpr::as_list)
                .ok_or_else(|| SondeError::Parse("success greeting missing body".to_string()))?;
            let min_version = atom_u32(body.first(), "minimum version")?;
            let max_version = atom_u32(body.get(1), "maximum version")?;
            let capabilities = atom_list(body.get(2));
            let mechanisms = atom_list(body.get(3));
            Ok(Greeting::Success {
                min_version,
                max_version,
                capabilities,
                mechanisms,
            })
        }
        "failure" => {
            let body = items
                .get(1)
                .and_then(SExpr::as_list)
                .ok_or_else(|| SondeError::Parse("failure greeting missing body".to_string()))?;
            let mut parts = Vec::new();
            for entry in body {
                if let Some(fields) = entry.as_list() {
                    // ( code "message" "file" line ); the message is field 1.
                    if let Some(message) = fields.get(1).and_then(SExpr::as_atom) {
                        parts.push(message.to_string());
                    }
                }
            }
            Ok(Greeting::Failure {
                message: parts.join("; "),
            })
        }
        other => Err(SondeError::Parse(format!(
            "unknown greeting status {:?}",
            other
        ))),
    }
}

fn atom_u32(node: Option<&SExpr>, what: &str) -> SondeResult<u32> {
    node.and_then(SExpr::as_atom)
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| SondeError::Parse(format!("greeting missing {}", what)))
}

fn atom_list(node: Option<&SExpr>) -> Vec<String> {
    node.and_then(SExpr::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(SExpr::as_atom)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

struct ReadGreeting;

#[async_trait]
impl Exchange for ReadGreeting {
    type Output = Greeting;

    fn validate(&self) -> SondeResult<()> {
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<Greeting> {
        let mut buf = Vec::new();
        loop {
            let chunk = conn.read(4096).await?;
            if chunk.is_empty() {
                return Err(SondeError::ConnectionFailed(
                    "server closed before a full greeting".to_string(),
                ));
            }
            buf.extend_from_slice(&chunk);
            if buf.len() > 64 * 1024 {
                return Err(SondeError::Parse("greeting too large".to_string()));
            }
            if balanced(&buf) {
                let text = std::str::from_utf8(&buf)
                    .map_err(|_| SondeError::Parse("greeting is not UTF-8".to_string()))?;
                return parse_greeting(text);
            }
        }
    }
}

/// True once the buffer holds at least one complete top-level list.
///
/// Parens inside a double-quoted token are content, not structure, so the
/// scan tracks quoting the same way the parser does.
fn balanced(buf: &[u8]) -> bool {
    let mut depth = 0i32;
    let mut opened = false;
    let mut in_quote = false;
    for &byte in buf {
        if in_quote {
            if byte == b'"' {
                in_quote = false;
            }
            continue;
        }
        match byte {
            b'"' => in_quote = true,
            b'(' => {
                depth += 1;
                opened = true;
            }
            b')' => depth -= 1,
            _ => {}
        }
        if opened && depth == 0 {
            return true;
        }
    }
    false
}
