//! Error taxonomy for Sonde probe operations.
//!
//! Every component of the engine returns typed results; protocol modules map
//! internal failures into exactly one of these kinds before the value crosses
//! the boundary back to the caller.

use std::fmt;

/// Unified error type for all probe operations.
#[derive(Debug)]
pub enum SondeError {
    /// Malformed caller input, detected before any socket operation.
    Validation(String),

    /// Destination resolves into a disallowed network range.
    ///
    /// Carries the matched range in CIDR notation.
    BlockedRange {
        /// The blocked CIDR range the destination fell into.
        matched: String,
    },

    /// Deadline elapsed during connect, read, or write.
    ///
    /// The message names the phase that ran out of budget.
    TimedOut(String),

    /// Destination refused, unreachable, or reset mid-exchange.
    ConnectionFailed(String),

    /// TLS handshake with the destination failed.
    TlsFailed(String),

    /// The peer sent a message the protocol state machine did not expect.
    UnexpectedMessage(String),

    /// MAC verification failed on an encrypted packet. Terminal, never retried.
    Integrity(String),

    /// Codec-level malformed data (unbalanced, too deep, short garbage).
    Parse(String),

    /// SSH algorithm negotiation found no intersection for a category.
    NoCommonAlgorithm {
        /// Negotiation category with an empty intersection (e.g. "cipher").
        category: String,
    },

    /// The peer rejected authentication with no further methods to try.
    AuthenticationFailed(String),

    /// Invariant violated inside the engine itself; treated as a bug.
    Internal(String),
}

impl fmt::Display for SondeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SondeError::Validation(msg) => write!(f, "Validation error: {}", msg),
            SondeError::BlockedRange { matched } => {
                write!(f, "Destination is in blocked range {}", matched)
            }
            SondeError::TimedOut(msg) => write!(f, "Timed out: {}", msg),
            SondeError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            SondeError::TlsFailed(msg) => write!(f, "TLS failed: {}", msg),
            SondeError::UnexpectedMessage(msg) => write!(f, "Unexpected message: {}", msg),
            SondeError::Integrity(msg) => write!(f, "Integrity error: {}", msg),
            SondeError::Parse(msg) => write!(f, "Parse error: {}", msg),
            SondeError::NoCommonAlgorithm { category } => {
                write!(f, "No common algorithm for {}", category)
            }
            SondeError::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            SondeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for SondeError {}

impl From<std::io::Error> for SondeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                SondeError::TimedOut(err.to_string())
            }
            _ => SondeError::ConnectionFailed(err.to_string()),
        }
    }
}

/// Result type for probe operations.
pub type SondeResult<T> = Result<T, SondeError>;
