//! Connection protocol channel messages (RFC 4254), session channels only.
//!
//! The engine opens exactly one "session" channel per connection, sends one
//! "exec" request on it, and streams data until EOF/CLOSE. Channel windows
//! follow the RFC 4254 flow-control rules: the peer may never push the
//! advertised receive window below zero.

use bytes::{BufMut, BytesMut};
use sonde_platform::{SondeError, SondeResult};

use super::message::MessageType;
use super::wire;

/// Receive window advertised when opening a channel.
pub const INITIAL_WINDOW: u32 = 2 * 1024 * 1024;

/// Maximum packet size advertised when opening a channel.
pub const CHANNEL_MAX_PACKET: u32 = 32768;

/// Extended data type code for stderr (RFC 4254 Section 5.2).
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// CHANNEL_OPEN sent, waiting for confirmation.
    Opening,
    /// Confirmed; data may flow.
    Open,
    /// EOF or CLOSE seen; draining.
    Closing,
    /// Fully closed.
    Closed,
}

/// Client-side view of the one session channel.
#[derive(Debug)]
pub struct Channel {
    /// Our channel id.
    pub local_id: u32,
    /// The server's channel id, known after confirmation.
    pub remote_id: u32,
    /// Receive window we have advertised and not yet re-granted.
    pub window: u32,
    /// Lifecycle state.
    pub state: ChannelState,
}

impl Channel {
    /// Creates a channel in `Opening` with the initial receive window.
    pub fn new(local_id: u32) -> Self {
        Channel {
            local_id,
            remote_id: 0,
            window: INITIAL_WINDOW,
            state: ChannelState::Opening,
        }
    }

    /// Records the server's confirmation.
    pub fn confirm(&mut self, remote_id: u32) -> SondeResult<()> {
        if self.state != ChannelState::Opening {
            return Err(SondeError::UnexpectedMessage(format!(
                "channel confirmation in state {:?}",
                self.state
            )));
        }
        self.remote_id = remote_id;
        self.state = ChannelState::Open;
        Ok(())
    }

    /// Accounts for `len` bytes of peer data against the receive window.
    ///
    /// # Errors
    ///
    /// [`SondeError::UnexpectedMessage`] when the peer overruns the window.
    pub fn consume_window(&mut self, len: u32) -> SondeResult<()> {
        match self.window.checked_sub(len) {
            Some(window) => {
                self.window = window;
                Ok(())
            }
            None => Err(SondeError::UnexpectedMessage(format!(
                "peer overran receive window by {} bytes",
                len - self.window
            ))),
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN for a "session" channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    /// Sender (our) channel id.
    pub sender_channel: u32,
    /// Advertised receive window.
    pub initial_window: u32,
    /// Advertised maximum packet size.
    pub max_packet: u32,
}

impl ChannelOpen {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelOpen.to_u8());
        wire::put_string(&mut buf, b"session");
        wire::put_u32(&mut buf, self.sender_channel);
        wire::put_u32(&mut buf, self.initial_window);
        wire::put_u32(&mut buf, self.max_packet);
        buf.to_vec()
    }

    /// Parses a CHANNEL_OPEN payload, requiring channel type "session".
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ChannelOpen.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected CHANNEL_OPEN, got message type {}",
                msg_type
            )));
        }
        let (channel_type, offset) = wire::read_utf8(payload, offset)?;
        if channel_type != "session" {
            return Err(SondeError::UnexpectedMessage(format!(
                "unsupported channel type {:?}",
                channel_type
            )));
        }
        let (sender_channel, offset) = wire::read_u32(payload, offset)?;
        let (initial_window, offset) = wire::read_u32(payload, offset)?;
        let (max_packet, _) = wire::read_u32(payload, offset)?;
        Ok(ChannelOpen {
            sender_channel,
            initial_window,
            max_packet,
        })
    }
}

/// SSH_MSG_CHANNEL_OPEN_CONFIRMATION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenConfirmation {
    /// Our channel id, echoed back.
    pub recipient_channel: u32,
    /// The server's channel id.
    pub sender_channel: u32,
    /// The server's receive window.
    pub initial_window: u32,
    /// The server's maximum packet size.
    pub max_packet: u32,
}

impl ChannelOpenConfirmation {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelOpenConfirmation.to_u8());
        wire::put_u32(&mut buf, self.recipient_channel);
        wire::put_u32(&mut buf, self.sender_channel);
        wire::put_u32(&mut buf, self.initial_window);
        wire::put_u32(&mut buf, self.max_packet);
        buf.to_vec()
    }

    /// Parses a CHANNEL_OPEN_CONFIRMATION payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ChannelOpenConfirmation.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected CHANNEL_OPEN_CONFIRMATION, got message type {}",
                msg_type
            )));
        }
        let (recipient_channel, offset) = wire::read_u32(payload, offset)?;
        let (sender_channel, offset) = wire::read_u32(payload, offset)?;
        let (initial_window, offset) = wire::read_u32(payload, offset)?;
        let (max_packet, _) = wire::read_u32(payload, offset)?;
        Ok(ChannelOpenConfirmation {
            recipient_channel,
            sender_channel,
            initial_window,
            max_packet,
        })
    }
}

/// SSH_MSG_CHANNEL_OPEN_FAILURE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    /// Our channel id, echoed back.
    pub recipient_channel: u32,
    /// RFC 4254 reason code.
    pub reason_code: u32,
    /// Human-readable description.
    pub description: String,
}

impl ChannelOpenFailure {
    /// Parses a CHANNEL_OPEN_FAILURE payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ChannelOpenFailure.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected CHANNEL_OPEN_FAILURE, got message type {}",
                msg_type
            )));
        }
        let (recipient_channel, offset) = wire::read_u32(payload, offset)?;
        let (reason_code, offset) = wire::read_u32(payload, offset)?;
        let (description, _) = wire::read_utf8(payload, offset)?;
        Ok(ChannelOpenFailure {
            recipient_channel,
            reason_code,
            description,
        })
    }
}

/// SSH_MSG_CHANNEL_REQUEST carrying an "exec" command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// The server's channel id.
    pub recipient_channel: u32,
    /// Command line to run.
    pub command: String,
    /// Ask for CHANNEL_SUCCESS / CHANNEL_FAILURE.
    pub want_reply: bool,
}

impl ExecRequest {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelRequest.to_u8());
        wire::put_u32(&mut buf, self.recipient_channel);
        wire::put_string(&mut buf, b"exec");
        wire::put_bool(&mut buf, self.want_reply);
        wire::put_string(&mut buf, self.command.as_bytes());
        buf.to_vec()
    }
}

/// A parsed SSH_MSG_CHANNEL_REQUEST from the server.
///
/// Servers use channel requests to deliver side-band information; the only
/// one the client acts on is "exit-status".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Our channel id.
    pub recipient_channel: u32,
    /// Request type, e.g. "exit-status".
    pub request_type: String,
    /// Reply requested.
    pub want_reply: bool,
    /// Type-specific payload bytes after the header.
    pub rest: Vec<u8>,
}

impl ChannelRequest {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelRequest.to_u8());
        wire::put_u32(&mut buf, self.recipient_channel);
        wire::put_string(&mut buf, self.request_type.as_bytes());
        wire::put_bool(&mut buf, self.want_reply);
        buf.put_slice(&self.rest);
        buf.to_vec()
    }

    /// Parses a CHANNEL_REQUEST payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ChannelRequest.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected CHANNEL_REQUEST, got message type {}",
                msg_type
            )));
        }
        let (recipient_channel, offset) = wire::read_u32(payload, offset)?;
        let (request_type, offset) = wire::read_utf8(payload, offset)?;
        let (want_reply, offset) = wire::read_bool(payload, offset)?;
        Ok(ChannelRequest {
            recipient_channel,
            request_type,
            want_reply,
            rest: payload[offset..].to_vec(),
        })
    }

    /// Extracts the exit status when this is an "exit-status" request.
    pub fn exit_status(&self) -> SondeResult<Option<u32>> {
        if self.request_type != "exit-status" {
            return Ok(None);
        }
        let (status, _) = wire::read_u32(&self.rest, 0)?;
        Ok(Some(status))
    }

    /// Builds an "exit-status" request (used by mock servers in tests).
    pub fn exit_status_message(recipient_channel: u32, status: u32) -> Self {
        let mut rest = BytesMut::new();
        wire::put_u32(&mut rest, status);
        ChannelRequest {
            recipient_channel,
            request_type: "exit-status".to_string(),
            want_reply: false,
            rest: rest.to_vec(),
        }
    }
}

/// SSH_MSG_CHANNEL_WINDOW_ADJUST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAdjust {
    /// Recipient channel id.
    pub recipient_channel: u32,
    /// Bytes added to the window.
    pub additional: u32,
}

impl WindowAdjust {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelWindowAdjust.to_u8());
        wire::put_u32(&mut buf, self.recipient_channel);
        wire::put_u32(&mut buf, self.additional);
        buf.to_vec()
    }

    /// Parses a CHANNEL_WINDOW_ADJUST payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ChannelWindowAdjust.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected CHANNEL_WINDOW_ADJUST, got message type {}",
                msg_type
            )));
        }
        let (recipient_channel, offset) = wire::read_u32(payload, offset)?;
        let (additional, _) = wire::read_u32(payload, offset)?;
        Ok(WindowAdjust {
            recipient_channel,
            additional,
        })
    }
}

/// SSH_MSG_CHANNEL_DATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// Recipient channel id.
    pub recipient_channel: u32,
    /// Data bytes.
    pub data: Vec<u8>,
}

impl ChannelData {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelData.to_u8());
        wire::put_u32(&mut buf, self.recipient_channel);
        wire::put_string(&mut buf, &self.data);
        buf.to_vec()
    }

    /// Parses a CHANNEL_DATA payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ChannelData.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected CHANNEL_DATA, got message type {}",
                msg_type
            )));
        }
        let (recipient_channel, offset) = wire::read_u32(payload, offset)?;
        let (data, _) = wire::read_string(payload, offset)?;
        Ok(ChannelData {
            recipient_channel,
            data,
        })
    }
}

/// SSH_MSG_CHANNEL_EXTENDED_DATA (stderr).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedData {
    /// Recipient channel id.
    pub recipient_channel: u32,
    /// RFC 4254 data type code; 1 is stderr.
    pub data_type: u32,
    /// Data bytes.
    pub data: Vec<u8>,
}

impl ExtendedData {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelExtendedData.to_u8());
        wire::put_u32(&mut buf, self.recipient_channel);
        wire::put_u32(&mut buf, self.data_type);
        wire::put_string(&mut buf, &self.data);
        buf.to_vec()
    }

    /// Parses a CHANNEL_EXTENDED_DATA payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::ChannelExtendedData.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected CHANNEL_EXTENDED_DATA, got message type {}",
                msg_type
            )));
        }
        let (recipient_channel, offset) = wire::read_u32(payload, offset)?;
        let (data_type, offset) = wire::read_u32(payload, offset)?;
        let (data, _) = wire::read_string(payload, offset)?;
        Ok(ExtendedData {
            recipient_channel,
            data_type,
            data,
        })
    }
}

/// Encodes a recipient-only channel message (EOF, CLOSE, SUCCESS, FAILURE).
pub fn recipient_only(msg_type: MessageType, recipient_channel: u32) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(msg_type.to_u8());
    wire::put_u32(&mut buf, recipient_channel);
    buf.to_vec()
}

/// Decodes the recipient channel id from a recipient-only message.
pub fn parse_recipient(payload: &[u8]) -> SondeResult<u32> {
    let (_msg_type, offset) = crate::codec::read_u8(payload, 0)?;
    let (recipient_channel, _) = wire::read_u32(payload, offset)?;
    Ok(recipient_channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_open_round_trip() {
        let open = ChannelOpen {
            sender_channel: 0,
            initial_window: INITIAL_WINDOW,
            max_packet: CHANNEL_MAX_PACKET,
        };
        let parsed = ChannelOpen::from_bytes(&open.to_bytes()).unwrap();
        assert_eq!(parsed, open);
    }

    #[test]
    fn test_confirmation_round_trip() {
        let confirmation = ChannelOpenConfirmation {
            recipient_channel: 0,
            sender_channel: 42,
            initial_window: 1 << 20,
            max_packet: 16384,
        };
        let parsed = ChannelOpenConfirmation::from_bytes(&confirmation.to_bytes()).unwrap();
        assert_eq!(parsed, confirmation);
    }

    #[test]
    fn test_exec_request_layout() {
        let request = ExecRequest {
            recipient_channel: 42,
            command: "echo test".to_string(),
            want_reply: true,
        };
        let bytes = request.to_bytes();
        let parsed = ChannelRequest::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.request_type, "exec");
        assert!(parsed.want_reply);
    }

    #[test]
    fn test_exit_status_request() {
        let request = ChannelRequest::exit_status_message(0, 7);
        let parsed = ChannelRequest::from_bytes(&request.to_bytes()).unwrap();
        assert_eq!(parsed.exit_status().unwrap(), Some(7));

        let other = ChannelRequest {
            recipient_channel: 0,
            request_type: "keepalive@openssh.com".to_string(),
            want_reply: false,
            rest: Vec::new(),
        };
        assert_eq!(other.exit_status().unwrap(), None);
    }

    #[test]
    fn test_channel_data_round_trip() {
        let data = ChannelData {
            recipient_channel: 0,
            data: b"test\n".to_vec(),
        };
        let parsed = ChannelData::from_bytes(&data.to_bytes()).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn test_window_never_negative() {
        let mut channel = Channel::new(0);
        channel.confirm(42).unwrap();
        channel.consume_window(INITIAL_WINDOW - 1).unwrap();
        channel.consume_window(1).unwrap();
        assert_eq!(channel.window, 0);
        assert!(matches!(
            channel.consume_window(1),
            Err(SondeError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_confirm_twice_rejected() {
        let mut channel = Channel::new(0);
        channel.confirm(1).unwrap();
        assert!(channel.confirm(2).is_err());
    }

    #[test]
    fn test_open_rejects_non_session() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ChannelOpen.to_u8());
        wire::put_string(&mut buf, b"direct-tcpip");
        wire::put_u32(&mut buf, 0);
        wire::put_u32(&mut buf, 0);
        wire::put_u32(&mut buf, 0);
        assert!(matches!(
            ChannelOpen::from_bytes(&buf),
            Err(SondeError::UnexpectedMessage(_))
        ));
    }
}
