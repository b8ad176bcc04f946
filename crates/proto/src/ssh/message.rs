//! SSH message type numbers (RFC 4253 Section 12, RFC 4252, RFC 4254).
//!
//! The first payload byte of every binary packet names the message. Only the
//! numbers the client engine handles are listed; anything else surfaces as an
//! unknown message type at the transport layer.

use sonde_platform::{SondeError, SondeResult};

/// SSH message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// SSH_MSG_DISCONNECT (1)
    Disconnect = 1,
    /// SSH_MSG_IGNORE (2)
    Ignore = 2,
    /// SSH_MSG_UNIMPLEMENTED (3)
    Unimplemented = 3,
    /// SSH_MSG_DEBUG (4)
    Debug = 4,
    /// SSH_MSG_SERVICE_REQUEST (5)
    ServiceRequest = 5,
    /// SSH_MSG_SERVICE_ACCEPT (6)
    ServiceAccept = 6,
    /// SSH_MSG_KEXINIT (20)
    KexInit = 20,
    /// SSH_MSG_NEWKEYS (21)
    NewKeys = 21,
    /// SSH_MSG_KEXDH_INIT (30; also ECDH_INIT for curve25519-sha256)
    KexDhInit = 30,
    /// SSH_MSG_KEXDH_REPLY (31; also ECDH_REPLY for curve25519-sha256)
    KexDhReply = 31,
    /// SSH_MSG_USERAUTH_REQUEST (50)
    UserauthRequest = 50,
    /// SSH_MSG_USERAUTH_FAILURE (51)
    UserauthFailure = 51,
    /// SSH_MSG_USERAUTH_SUCCESS (52)
    UserauthSuccess = 52,
    /// SSH_MSG_USERAUTH_BANNER (53)
    UserauthBanner = 53,
    /// SSH_MSG_GLOBAL_REQUEST (80)
    GlobalRequest = 80,
    /// SSH_MSG_REQUEST_SUCCESS (81)
    RequestSuccess = 81,
    /// SSH_MSG_REQUEST_FAILURE (82)
    RequestFailure = 82,
    /// SSH_MSG_CHANNEL_OPEN (90)
    ChannelOpen = 90,
    /// SSH_MSG_CHANNEL_OPEN_CONFIRMATION (91)
    ChannelOpenConfirmation = 91,
    /// SSH_MSG_CHANNEL_OPEN_FAILURE (92)
    ChannelOpenFailure = 92,
    /// SSH_MSG_CHANNEL_WINDOW_ADJUST (93)
    ChannelWindowAdjust = 93,
    /// SSH_MSG_CHANNEL_DATA (94)
    ChannelData = 94,
    /// SSH_MSG_CHANNEL_EXTENDED_DATA (95)
    ChannelExtendedData = 95,
    /// SSH_MSG_CHANNEL_EOF (96)
    ChannelEof = 96,
    /// SSH_MSG_CHANNEL_CLOSE (97)
    ChannelClose = 97,
    /// SSH_MSG_CHANNEL_REQUEST (98)
    ChannelRequest = 98,
    /// SSH_MSG_CHANNEL_SUCCESS (99)
    ChannelSuccess = 99,
    /// SSH_MSG_CHANNEL_FAILURE (100)
    ChannelFailure = 100,
}

impl MessageType {
    /// Maps a wire byte to a message type.
    ///
    /// # Errors
    ///
    /// Returns [`SondeError::UnexpectedMessage`] for numbers the engine does
    /// not handle.
    pub fn from_u8(byte: u8) -> SondeResult<Self> {
        match byte {
            1 => Ok(MessageType::Disconnect),
            2 => Ok(MessageType::Ignore),
            3 => Ok(MessageType::Unimplemented),
            4 => Ok(MessageType::Debug),
            5 => Ok(MessageType::ServiceRequest),
            6 => Ok(MessageType::ServiceAccept),
            20 => Ok(MessageType::KexInit),
            21 => Ok(MessageType::NewKeys),
            30 => Ok(MessageType::KexDhInit),
            31 => Ok(MessageType::KexDhReply),
            50 => Ok(MessageType::UserauthRequest),
            51 => Ok(MessageType::UserauthFailure),
            52 => Ok(MessageType::UserauthSuccess),
            53 => Ok(MessageType::UserauthBanner),
            80 => Ok(MessageType::GlobalRequest),
            81 => Ok(MessageType::RequestSuccess),
            82 => Ok(MessageType::RequestFailure),
            90 => Ok(MessageType::ChannelOpen),
            91 => Ok(MessageType::ChannelOpenConfirmation),
            92 => Ok(MessageType::ChannelOpenFailure),
            93 => Ok(MessageType::ChannelWindowAdjust),
            94 => Ok(MessageType::ChannelData),
            95 => Ok(MessageType::ChannelExtendedData),
            96 => Ok(MessageType::ChannelEof),
            97 => Ok(MessageType::ChannelClose),
            98 => Ok(MessageType::ChannelRequest),
            99 => Ok(MessageType::ChannelSuccess),
            100 => Ok(MessageType::ChannelFailure),
            other => Err(SondeError::UnexpectedMessage(format!(
                "unknown SSH message type {}",
                other
            ))),
        }
    }

    /// The wire byte for this message type.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}
