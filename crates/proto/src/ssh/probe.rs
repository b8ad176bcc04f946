//! SSH probe boundary operation.
//!
//! Ties the guard and the client engine together behind the uniform
//! [`ProtocolResult`] boundary: validate, connect through the guard, run the
//! full SSH session, execute one command, tear down on every path.

use std::time::Duration;

use sonde_platform::{ProtocolResult, SondeError, SondeResult};
use tracing::debug;
use zeroize::Zeroizing;

use super::client::{ExecOutput, SshClient};
use crate::guard::{self, ConnectionRequest};

/// Parameters for one SSH command execution.
pub struct ExecParams {
    /// Destination hostname or literal IP address.
    pub host: String,
    /// Destination port, usually 22.
    pub port: u16,
    /// Account name.
    pub username: String,
    /// Password, wiped on drop.
    pub password: Zeroizing<String>,
    /// Command line to run.
    pub command: String,
    /// Total budget for the whole session in milliseconds.
    pub timeout_ms: u64,
}

impl std::fmt::Debug for ExecParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("command", &self.command)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

impl ExecParams {
    /// Checks all parameters; runs before any socket operation.
    pub fn validate(&self) -> SondeResult<()> {
        if self.host.trim().is_empty() {
            return Err(SondeError::Validation("Host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(SondeError::Validation("Port must be at least 1".to_string()));
        }
        if self.username.is_empty() {
            return Err(SondeError::Validation(
                "Username must not be empty".to_string(),
            ));
        }
        if self.command.trim().is_empty() {
            return Err(SondeError::Validation(
                "Command must not be empty".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(SondeError::Validation(
                "Timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Executes one command over SSH and returns its stdout and exit status.
///
/// All failures, from blocked ranges to MAC mismatches, come back as the
/// failure arm of [`ProtocolResult`]; nothing panics on hostile input.
pub async fn exec(params: &ExecParams) -> ProtocolResult<ExecOutput> {
    run(params).await.into()
}

async fn run(params: &ExecParams) -> SondeResult<ExecOutput> {
    params.validate()?;

    let request = ConnectionRequest::new(
        params.host.clone(),
        params.port,
        Duration::from_millis(params.timeout_ms),
    );
    let conn = guard::connect(&request).await?;
    let (stream, deadline) = conn.into_stream();
    let mut client = SshClient::new(stream, deadline);

    let result = async {
        client.handshake().await?;
        client.authenticate(&params.username, &params.password).await?;
        client.exec(&params.command).await
    }
    .await;

    // Torn down on success and failure alike.
    if let Err(close_err) = client.close().await {
        debug!(error = %close_err, "teardown after exec");
    }
    result
}
