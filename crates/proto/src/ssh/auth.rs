//! User authentication messages (RFC 4252), password method only.
//!
//! After NEWKEYS the client requests the `ssh-userauth` service, then sends
//! a password USERAUTH_REQUEST. USERAUTH_SUCCESS advances the session;
//! USERAUTH_FAILURE is surfaced as an authentication error together with the
//! methods the server said could continue.

use bytes::{BufMut, BytesMut};
use sonde_platform::{SondeError, SondeResult};
use zeroize::Zeroizing;

use super::message::MessageType;
use super::wire;

/// Service name for user authentication.
pub const USERAUTH_SERVICE: &str = "ssh-userauth";

/// Service name for the connection protocol.
pub const CONNECTION_SERVICE: &str = "ssh-connection";

/// SSH_MSG_SERVICE_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Requested service name.
    pub service: String,
}

impl ServiceRequest {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ServiceRequest.to_u8());
        wire::put_string(&mut buf, self.service.as_bytes());
        buf.to_vec()
    }

    /// Parses a SERVICE_REQUEST payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ServiceRequest.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected SERVICE_REQUEST, got message type {}",
                msg_type
            )));
        }
        let (service, _) = wire::read_utf8(payload, offset)?;
        Ok(ServiceRequest { service })
    }
}

/// SSH_MSG_SERVICE_ACCEPT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccept {
    /// Accepted service name.
    pub service: String,
}

impl ServiceAccept {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ServiceAccept.to_u8());
        wire::put_string(&mut buf, self.service.as_bytes());
        buf.to_vec()
    }

    /// Parses a SERVICE_ACCEPT payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ServiceAccept.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected SERVICE_ACCEPT, got message type {}",
                msg_type
            )));
        }
        let (service, _) = wire::read_utf8(payload, offset)?;
        Ok(ServiceAccept { service })
    }
}

/// Password USERAUTH_REQUEST. The password is zeroized on drop.
pub struct PasswordRequest {
    /// Account name.
    pub username: String,
    /// Password, wiped when the request is dropped.
    pub password: Zeroizing<String>,
}

impl std::fmt::Debug for PasswordRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordRequest")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl PasswordRequest {
    /// Builds a password request.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        PasswordRequest {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Serializes the payload, message type byte included.
    ///
    /// ```text
    /// byte      SSH_MSG_USERAUTH_REQUEST
    /// string    user name
    /// string    "ssh-connection"
    /// string    "password"
    /// boolean   FALSE
    /// string    plaintext password
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthRequest.to_u8());
        wire::put_string(&mut buf, self.username.as_bytes());
        wire::put_string(&mut buf, CONNECTION_SERVICE.as_bytes());
        wire::put_string(&mut buf, b"password");
        wire::put_bool(&mut buf, false);
        wire::put_string(&mut buf, self.password.as_bytes());
        buf.to_vec()
    }
}

/// SSH_MSG_USERAUTH_FAILURE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    /// Methods the server says could still succeed.
    pub methods_that_can_continue: Vec<String>,
    /// Partial success flag.
    pub partial_success: bool,
}

impl AuthFailure {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::UserauthFailure.to_u8());
        let refs: Vec<&str> = self
            .methods_that_can_continue
            .iter()
            .map(String::as_str)
            .collect();
        wire::put_name_list(&mut buf, &refs);
        wire::put_bool(&mut buf, self.partial_success);
        buf.to_vec()
    }

    /// Parses a USERAUTH_FAILURE payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::UserauthFailure.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected USERAUTH_FAILURE, got message type {}",
                msg_type
            )));
        }
        let (methods, offset) = wire::read_name_list(payload, offset)?;
        let (partial_success, _) = wire::read_bool(payload, offset)?;
        Ok(AuthFailure {
            methods_that_can_continue: methods,
            partial_success,
        })
    }

    /// The error surfaced to the caller when no viable method remains.
    pub fn into_error(self) -> SondeError {
        SondeError::AuthenticationFailed(format!(
            "password rejected; server accepts: {}",
            if self.methods_that_can_continue.is_empty() {
                "nothing".to_string()
            } else {
                self.methods_that_can_continue.join(",")
            }
        ))
    }
}

/// SSH_MSG_USERAUTH_BANNER. Displayed material only; never acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBanner {
    /// Banner text.
    pub message: String,
}

impl AuthBanner {
    /// Parses a USERAUTH_BANNER payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::UserauthBanner.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected USERAUTH_BANNER, got message type {}",
                msg_type
            )));
        }
        let (message, _) = wire::read_utf8(payload, offset)?;
        Ok(AuthBanner { message })
    }
}
