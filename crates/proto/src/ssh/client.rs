//! SSH client engine: handshake, authentication, command execution.
//!
//! Drives a [`Transport`] through the full client-side session:
//! version exchange, KEXINIT negotiation, curve25519 key exchange, NEWKEYS,
//! password authentication, one "session" channel, one "exec" request, and
//! output streaming until the server signals EOF or CLOSE.
//!
//! The client is generic over the byte stream, so the same engine runs over
//! a guarded TCP connection in production and an in-memory duplex in tests.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sonde_proto::guard::{self, ConnectionRequest};
//! use sonde_proto::ssh::client::SshClient;
//!
//! # async fn example() -> sonde_platform::SondeResult<()> {
//! let request = ConnectionRequest::new("203.0.113.10", 22, Duration::from_secs(10));
//! let conn = guard::connect(&request).await?;
//! let (stream, deadline) = conn.into_stream();
//!
//! let mut client = SshClient::new(stream, deadline);
//! client.handshake().await?;
//! client.authenticate("probe", "secret").await?;
//! let output = client.exec("uname -a").await?;
//! client.close().await?;
//! println!("{}", String::from_utf8_lossy(&output.stdout));
//! # Ok(())
//! # }
//! ```

use sonde_platform::{SondeError, SondeResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::auth::{AuthBanner, AuthFailure, PasswordRequest, ServiceAccept, ServiceRequest, USERAUTH_SERVICE};
use super::channel::{
    self, Channel, ChannelData, ChannelOpen, ChannelOpenConfirmation, ChannelOpenFailure,
    ChannelRequest, ChannelState, ExecRequest, ExtendedData, WindowAdjust, CHANNEL_MAX_PACKET,
    INITIAL_WINDOW,
};
use super::crypto::{CipherState, DirectionState, MacState, CIPHER_IV_LEN, CIPHER_KEY_LEN, MAC_KEY_LEN};
use super::kex::{self, KexInit};
use super::kex_dh::{self, ClientKex, KexDhInit, KexDhReply};
use super::message::MessageType;
use super::transport::{Transport, TransportState};
use super::version::Version;
use super::wire;
use crate::guard::Deadline;

/// Result of one remote command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Accumulated CHANNEL_DATA (the command's stdout).
    pub stdout: Vec<u8>,
    /// Exit status, when the server delivered one before closing.
    pub exit_status: Option<u32>,
}

/// SSH2 client over any async byte stream.
pub struct SshClient<S> {
    transport: Transport<S>,
    session_id: Option<Vec<u8>>,
    channel: Option<Channel>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> SshClient<S> {
    /// Wraps a connected stream; no I/O happens until
    /// [`SshClient::handshake`].
    pub fn new(stream: S, deadline: Deadline) -> Self {
        SshClient {
            transport: Transport::new(stream, deadline),
            session_id: None,
            channel: None,
        }
    }

    /// Current transport state.
    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    /// Runs version exchange, algorithm negotiation, key exchange, and
    /// NEWKEYS, leaving the connection encrypted.
    pub async fn handshake(&mut self) -> SondeResult<()> {
        let ours = Version::default_client();
        let theirs = self.transport.exchange_versions(&ours).await?;
        debug!(server = %theirs.software(), "version exchange done");

        // KEXINIT both ways; ours is sent first, no guessed packets.
        let client_kexinit = KexInit::new_client();
        let client_kexinit_bytes = client_kexinit.to_bytes();
        self.transport.send_packet(&client_kexinit_bytes).await?;

        let server_kexinit_bytes = self.await_message(MessageType::KexInit).await?;
        let server_kexinit = KexInit::from_bytes(&server_kexinit_bytes)?;
        let negotiated = kex::negotiate_all(&client_kexinit, &server_kexinit)?;
        debug!(kex = %negotiated.kex, cipher = %negotiated.cipher_client_to_server, "negotiated");
        self.transport.advance_state(TransportState::KexExchange)?;

        // curve25519 exchange.
        let ephemeral = ClientKex::generate()?;
        let dh_init = KexDhInit {
            public_key: ephemeral.public_key.clone(),
        };
        self.transport.send_packet(&dh_init.to_bytes()).await?;

        let reply_bytes = self.await_message(MessageType::KexDhReply).await?;
        let reply = KexDhReply::from_bytes(&reply_bytes)?;
        let client_public = ephemeral.public_key.clone();
        let shared_secret = ephemeral.agree(&reply.public_key)?;

        let exchange_hash = kex_dh::exchange_hash(
            self.transport.client_version()?,
            self.transport.server_version()?,
            &client_kexinit_bytes,
            &server_kexinit_bytes,
            &reply.host_key,
            &client_public,
            &reply.public_key,
            &shared_secret,
        );
        // First exchange hash doubles as the session id; no rekeying.
        let session_id = exchange_hash.clone();
        self.transport.advance_state(TransportState::NewKeys)?;

        // NEWKEYS both ways, then flip to encrypted framing.
        self.transport
            .send_packet(&[MessageType::NewKeys.to_u8()])
            .await?;
        self.await_message(MessageType::NewKeys).await?;

        let derive = |letter: u8, len: usize| {
            kex_dh::derive_key(&shared_secret, &exchange_hash, letter, &session_id, len)
        };
        let send = DirectionState {
            cipher: CipherState::new(&derive(b'C', CIPHER_KEY_LEN), &derive(b'A', CIPHER_IV_LEN))?,
            mac: MacState::new(&derive(b'E', MAC_KEY_LEN))?,
        };
        let recv = DirectionState {
            cipher: CipherState::new(&derive(b'D', CIPHER_KEY_LEN), &derive(b'B', CIPHER_IV_LEN))?,
            mac: MacState::new(&derive(b'F', MAC_KEY_LEN))?,
        };
        self.transport.enable_encryption(send, recv)?;
        self.session_id = Some(session_id);
        self.transport.advance_state(TransportState::ServiceRequest)?;
        Ok(())
    }

    /// Authenticates with a password over the encrypted transport.
    ///
    /// # Errors
    ///
    /// [`SondeError::AuthenticationFailed`] when the server rejects the
    /// password.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> SondeResult<()> {
        if self.transport.state() != TransportState::ServiceRequest {
            return Err(SondeError::UnexpectedMessage(format!(
                "authenticate in state {:?}",
                self.transport.state()
            )));
        }

        let request = ServiceRequest {
            service: USERAUTH_SERVICE.to_string(),
        };
        self.transport.send_packet(&request.to_bytes()).await?;
        let accept_bytes = self.await_message(MessageType::ServiceAccept).await?;
        let accept = ServiceAccept::from_bytes(&accept_bytes)?;
        if accept.service != USERAUTH_SERVICE {
            return Err(SondeError::UnexpectedMessage(format!(
                "server accepted service {:?}",
                accept.service
            )));
        }
        self.transport.advance_state(TransportState::UserAuth)?;

        let auth = PasswordRequest::new(username, password);
        self.transport.send_packet(&auth.to_bytes()).await?;

        loop {
            let payload = self.recv_skipping_noise().await?;
            match MessageType::from_u8(payload[0])? {
                MessageType::UserauthSuccess => {
                    debug!(username, "authenticated");
                    self.transport.advance_state(TransportState::ChannelOpen)?;
                    return Ok(());
                }
                MessageType::UserauthBanner => {
                    let banner = AuthBanner::from_bytes(&payload)?;
                    debug!(banner = %banner.message.trim_end(), "auth banner");
                }
                MessageType::UserauthFailure => {
                    return Err(AuthFailure::from_bytes(&payload)?.into_error());
                }
                other => {
                    return Err(SondeError::UnexpectedMessage(format!(
                        "awaiting auth result, got {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Opens the session channel, runs `command`, and streams output until
    /// the server signals EOF or CLOSE.
    pub async fn exec(&mut self, command: &str) -> SondeResult<ExecOutput> {
        if command.trim().is_empty() {
            return Err(SondeError::Validation("Command must not be empty".to_string()));
        }
        if self.transport.state() != TransportState::ChannelOpen {
            return Err(SondeError::UnexpectedMessage(format!(
                "exec in state {:?}",
                self.transport.state()
            )));
        }

        // One channel per session, always local id 0.
        let mut chan = Channel::new(0);
        let open = ChannelOpen {
            sender_channel: chan.local_id,
            initial_window: INITIAL_WINDOW,
            max_packet: CHANNEL_MAX_PACKET,
        };
        self.transport.send_packet(&open.to_bytes()).await?;

        let payload = self.recv_skipping_noise().await?;
        match MessageType::from_u8(payload[0])? {
            MessageType::ChannelOpenConfirmation => {
                let confirmation = ChannelOpenConfirmation::from_bytes(&payload)?;
                chan.confirm(confirmation.sender_channel)?;
            }
            MessageType::ChannelOpenFailure => {
                let failure = ChannelOpenFailure::from_bytes(&payload)?;
                return Err(SondeError::ConnectionFailed(format!(
                    "channel open rejected (reason {}): {}",
                    failure.reason_code, failure.description
                )));
            }
            other => {
                return Err(SondeError::UnexpectedMessage(format!(
                    "awaiting channel confirmation, got {:?}",
                    other
                )));
            }
        }
        self.transport.advance_state(TransportState::ChannelExec)?;

        let exec = ExecRequest {
            recipient_channel: chan.remote_id,
            command: command.to_string(),
            want_reply: true,
        };
        self.transport.send_packet(&exec.to_bytes()).await?;
        self.channel = Some(chan);

        let mut exec_accepted = false;
        let mut stdout = Vec::new();
        let mut exit_status = None;

        loop {
            let payload = self.recv_skipping_noise().await?;
            let msg_type = MessageType::from_u8(payload[0])?;

            if !exec_accepted {
                match msg_type {
                    MessageType::ChannelSuccess => {
                        exec_accepted = true;
                        self.transport.advance_state(TransportState::Streaming)?;
                        continue;
                    }
                    MessageType::ChannelFailure => {
                        return Err(SondeError::UnexpectedMessage(
                            "server rejected exec request".to_string(),
                        ));
                    }
                    // Some servers start streaming before the reply lands.
                    _ => {}
                }
            }

            match msg_type {
                MessageType::ChannelData => {
                    let data = ChannelData::from_bytes(&payload)?;
                    self.consume_window(data.data.len()).await?;
                    stdout.extend_from_slice(&data.data);
                }
                MessageType::ChannelExtendedData => {
                    // stderr counts against the window but is not collected.
                    let data = ExtendedData::from_bytes(&payload)?;
                    self.consume_window(data.data.len()).await?;
                }
                MessageType::ChannelWindowAdjust => {
                    let _ = WindowAdjust::from_bytes(&payload)?;
                }
                MessageType::ChannelRequest => {
                    let request = ChannelRequest::from_bytes(&payload)?;
                    if let Some(status) = request.exit_status()? {
                        exit_status = Some(status);
                    }
                }
                MessageType::ChannelEof | MessageType::ChannelClose => {
                    if let Some(chan) = self.channel.as_mut() {
                        chan.state = ChannelState::Closing;
                    }
                    break;
                }
                other => {
                    return Err(SondeError::UnexpectedMessage(format!(
                        "streaming output, got {:?}",
                        other
                    )));
                }
            }
        }

        if let Some(chan) = self.channel.as_mut() {
            chan.state = ChannelState::Closed;
        }
        Ok(ExecOutput { stdout, exit_status })
    }

    /// Sends CHANNEL_CLOSE for the open channel, then closes the transport.
    pub async fn close(&mut self) -> SondeResult<()> {
        if let Some(chan) = self.channel.take() {
            if self.transport.state() != TransportState::Closed {
                let close = channel::recipient_only(MessageType::ChannelClose, chan.remote_id);
                // Best effort; the transport is going away regardless.
                let _ = self.transport.send_packet(&close).await;
            }
        }
        self.transport.close().await
    }

    /// Accounts received data against the window, re-granting it once half
    /// is spent.
    async fn consume_window(&mut self, len: usize) -> SondeResult<()> {
        let chan = self
            .channel
            .as_mut()
            .ok_or_else(|| SondeError::Internal("data without a channel".to_string()))?;
        let len = u32::try_from(len)
            .map_err(|_| SondeError::Parse("channel data length overflow".to_string()))?;
        chan.consume_window(len)?;

        if chan.window < INITIAL_WINDOW / 2 {
            let grant = INITIAL_WINDOW - chan.window;
            let adjust = WindowAdjust {
                recipient_channel: chan.remote_id,
                additional: grant,
            };
            chan.window += grant;
            let bytes = adjust.to_bytes();
            self.transport.send_packet(&bytes).await?;
        }
        Ok(())
    }

    /// Receives packets until one is neither IGNORE, DEBUG, nor
    /// UNIMPLEMENTED; surfaces DISCONNECT as a connection failure.
    async fn recv_skipping_noise(&mut self) -> SondeResult<Vec<u8>> {
        loop {
            let payload = self.transport.recv_packet().await?;
            if payload.is_empty() {
                return Err(SondeError::Parse("empty packet payload".to_string()));
            }
            match MessageType::from_u8(payload[0]) {
                Ok(MessageType::Ignore) | Ok(MessageType::Debug) | Ok(MessageType::Unimplemented) => {
                    debug!(msg = payload[0], "skipping transport noise");
                }
                Ok(MessageType::Disconnect) => {
                    return Err(parse_disconnect(&payload));
                }
                _ => return Ok(payload),
            }
        }
    }

    /// Receives the next substantive packet and requires it to be
    /// `expected`.
    async fn await_message(&mut self, expected: MessageType) -> SondeResult<Vec<u8>> {
        let payload = self.recv_skipping_noise().await?;
        let msg_type = MessageType::from_u8(payload[0])?;
        if msg_type != expected {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected {:?}, got {:?}",
                expected, msg_type
            )));
        }
        Ok(payload)
    }
}

fn parse_disconnect(payload: &[u8]) -> SondeError {
    // byte 1, uint32 reason, string description, string language
    let detail = wire::read_u32(payload, 1)
        .and_then(|(reason, offset)| {
            let (description, _) = wire::read_utf8(payload, offset)?;
            Ok(format!("reason {}: {}", reason, description))
        })
        .unwrap_or_else(|_| "malformed DISCONNECT".to_string());
    SondeError::ConnectionFailed(format!("server disconnected ({})", detail))
}
