//! Uniform boundary value returned by every protocol operation.
//!
//! The routing layer that calls into the engine never sees a raw
//! [`SondeError`](crate::SondeError); it receives a [`ProtocolResult`] whose
//! failure arm carries a human-readable cause string and a flag marking
//! blocked-range rejections. The success payload is protocol-specific and
//! fixed at compile time, never an open map.

use crate::error::SondeError;

/// Outcome of one protocol operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolResult<T> {
    /// The exchange completed; `T` is the protocol-specific payload.
    Success(T),

    /// The exchange failed.
    Failure {
        /// Non-empty human-readable cause.
        error: String,
        /// Set when the destination fell into a blocked network range.
        blocked_range: bool,
    },
}

impl<T> ProtocolResult<T> {
    /// Returns true for the success arm.
    pub fn is_success(&self) -> bool {
        matches!(self, ProtocolResult::Success(_))
    }

    /// Returns the payload, if the operation succeeded.
    pub fn payload(&self) -> Option<&T> {
        match self {
            ProtocolResult::Success(payload) => Some(payload),
            ProtocolResult::Failure { .. } => None,
        }
    }

    /// Returns the error string, if the operation failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            ProtocolResult::Success(_) => None,
            ProtocolResult::Failure { error, .. } => Some(error),
        }
    }

    /// Returns true when the failure was a blocked-range rejection.
    pub fn is_blocked_range(&self) -> bool {
        matches!(
            self,
            ProtocolResult::Failure {
                blocked_range: true,
                ..
            }
        )
    }
}

impl<T> From<SondeError> for ProtocolResult<T> {
    fn from(err: SondeError) -> Self {
        let blocked_range = matches!(err, SondeError::BlockedRange { .. });
        ProtocolResult::Failure {
            error: err.to_string(),
            blocked_range,
        }
    }
}

impl<T> From<Result<T, SondeError>> for ProtocolResult<T> {
    fn from(result: Result<T, SondeError>) -> Self {
        match result {
            Ok(payload) => ProtocolResult::Success(payload),
            Err(err) => err.into(),
        }
    }
}
