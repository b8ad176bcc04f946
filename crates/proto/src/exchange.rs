//! Protocol exchange abstraction.
//!
//! Every peer client follows the same shape: validate parameters, connect
//! through the guard, run one or more request/response round trips, tear the
//! connection down on every path. [`Exchange`] captures the protocol-specific
//! part; [`run_exchange`] supplies the shared skeleton and maps the result
//! into the uniform [`ProtocolResult`] boundary value.

use async_trait::async_trait;
use sonde_platform::{ProtocolResult, SondeResult};
use tracing::debug;

use crate::guard::{self, ConnectionRequest, GuardedConnection};

/// One protocol conversation over an established guarded connection.
#[async_trait]
pub trait Exchange {
    /// Protocol-specific success payload.
    type Output;

    /// Checks protocol parameters. Runs before any socket operation.
    fn validate(&self) -> SondeResult<()>;

    /// Runs the conversation over `conn`.
    ///
    /// Implementations perform their round trips here; the caller owns
    /// connect and teardown. On timeout, partially received data is
    /// discarded with the returned error.
    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<Self::Output>;
}

/// Runs an exchange end to end and folds the outcome into a
/// [`ProtocolResult`].
///
/// Parameter validation (request and exchange) happens before any socket
/// operation. The connection is closed on success and failure alike; errors
/// are mapped through the taxonomy, setting the blocked-range flag where it
/// applies.
pub async fn run_exchange<E: Exchange>(
    request: &ConnectionRequest,
    mut exchange: E,
) -> ProtocolResult<E::Output> {
    let result = async {
        request.validate()?;
        exchange.validate()?;
        let mut conn = guard::connect(request).await?;
        let outcome = exchange.run(&mut conn).await;
        // Closed on both arms; a teardown hiccup never masks the outcome.
        conn.close().await?;
        outcome
    }
    .await;

    if let Err(ref err) = result {
        debug!(host = %request.host, port = request.port, error = %err, "exchange failed");
    }
    result.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonde_platform::SondeError;
    use std::time::Duration;

    struct NeverRuns;

    #[async_trait]
    impl Exchange for NeverRuns {
        type Output = ();

        fn validate(&self) -> SondeResult<()> {
            Ok(())
        }

        async fn run(&mut self, _conn: &mut GuardedConnection) -> SondeResult<()> {
            panic!("exchange ran despite failed validation");
        }
    }

    struct RejectsParams;

    #[async_trait]
    impl Exchange for RejectsParams {
        type Output = ();

        fn validate(&self) -> SondeResult<()> {
            Err(SondeError::Validation("Command must not be empty".to_string()))
        }

        async fn run(&mut self, _conn: &mut GuardedConnection) -> SondeResult<()> {
            panic!("exchange ran despite failed validation");
        }
    }

    #[tokio::test]
    async fn test_invalid_request_never_connects() {
        let request = ConnectionRequest::new("", 80, Duration::from_secs(1));
        let result = run_exchange(&request, NeverRuns).await;
        assert!(result.error().unwrap().contains("Host"));
    }

    #[tokio::test]
    async fn test_invalid_exchange_params_never_connect() {
        let request = ConnectionRequest::new("127.0.0.1", 80, Duration::from_secs(1));
        let result = run_exchange(&request, RejectsParams).await;
        assert!(result.error().unwrap().contains("Command"));
    }

    #[tokio::test]
    async fn test_blocked_range_sets_flag() {
        let request = ConnectionRequest::new("104.16.1.1", 443, Duration::from_secs(1));
        let result = run_exchange(&request, NeverRuns).await;
        assert!(result.is_blocked_range());
    }
}
