//! SSH transport layer: version exchange, packet framing, session state.
//!
//! [`Transport`] owns the stream and moves through a fixed state sequence:
//!
//! ```text
//! VersionExchange → KexNegotiate → KexExchange → NewKeys → ServiceRequest
//!   → UserAuth → ChannelOpen → ChannelExec → Streaming → Closed
//! ```
//!
//! Any state may move to `Closed`; every other transition must follow the
//! sequence, and a violation is an unexpected-message error. Both directions
//! switch from plaintext to encrypted framing atomically when
//! [`Transport::enable_encryption`] is called at NEWKEYS. There is no
//! rekeying.
//!
//! Packet sequence numbers count every packet from the start of the
//! connection, plaintext ones included, so the MAC states are seeded with
//! the running counters when encryption begins.

use sonde_platform::{SondeError, SondeResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::crypto::{DirectionState, CIPHER_BLOCK, MAC_LEN};
use super::packet::{Packet, MAX_PACKET_SIZE, PLAINTEXT_BLOCK};
use super::version::{Version, MAX_BANNER_LINES, MAX_VERSION_LENGTH};
use crate::guard::Deadline;

/// Transport session states, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Exchanging identification lines.
    VersionExchange,
    /// Exchanging KEXINIT.
    KexNegotiate,
    /// Running the curve25519 exchange.
    KexExchange,
    /// Waiting for / sending NEWKEYS.
    NewKeys,
    /// Requesting the ssh-userauth service.
    ServiceRequest,
    /// Authenticating.
    UserAuth,
    /// Opening the session channel.
    ChannelOpen,
    /// Sending the exec request.
    ChannelExec,
    /// Streaming command output.
    Streaming,
    /// Torn down; no further I/O.
    Closed,
}

impl TransportState {
    fn successor(self) -> Option<TransportState> {
        use TransportState::*;
        match self {
            VersionExchange => Some(KexNegotiate),
            KexNegotiate => Some(KexExchange),
            KexExchange => Some(NewKeys),
            NewKeys => Some(ServiceRequest),
            ServiceRequest => Some(UserAuth),
            UserAuth => Some(ChannelOpen),
            ChannelOpen => Some(ChannelExec),
            ChannelExec => Some(Streaming),
            Streaming => Some(Closed),
            Closed => None,
        }
    }
}

/// SSH packet transport over any async byte stream.
pub struct Transport<S> {
    stream: S,
    deadline: Deadline,
    state: TransportState,
    send_keys: Option<DirectionState>,
    recv_keys: Option<DirectionState>,
    send_sequence: u32,
    recv_sequence: u32,
    /// Client identification line, without CR LF.
    client_version: Option<String>,
    /// Server identification line, without CR LF.
    server_version: Option<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport<S> {
    /// Wraps a connected stream.
    pub fn new(stream: S, deadline: Deadline) -> Self {
        Transport {
            stream,
            deadline,
            state: TransportState::VersionExchange,
            send_keys: None,
            recv_keys: None,
            send_sequence: 0,
            recv_sequence: 0,
            client_version: None,
            server_version: None,
        }
    }

    /// Current session state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Moves to `next`, enforcing the transition table.
    ///
    /// # Errors
    ///
    /// [`SondeError::UnexpectedMessage`] for anything other than the next
    /// state in sequence or `Closed`.
    pub fn advance_state(&mut self, next: TransportState) -> SondeResult<()> {
        if next == TransportState::Closed || self.state.successor() == Some(next) {
            debug!(from = ?self.state, to = ?next, "transport state");
            self.state = next;
            Ok(())
        } else {
            Err(SondeError::UnexpectedMessage(format!(
                "invalid transition {:?} -> {:?}",
                self.state, next
            )))
        }
    }

    /// Packets sent so far (client-to-server sequence number).
    pub fn send_sequence(&self) -> u32 {
        self.send_sequence
    }

    /// Packets received so far (server-to-client sequence number).
    pub fn recv_sequence(&self) -> u32 {
        self.recv_sequence
    }

    /// Client identification line, available after the version exchange.
    pub fn client_version(&self) -> SondeResult<&str> {
        self.client_version
            .as_deref()
            .ok_or_else(|| SondeError::Internal("version exchange not done".to_string()))
    }

    /// Server identification line, available after the version exchange.
    pub fn server_version(&self) -> SondeResult<&str> {
        self.server_version
            .as_deref()
            .ok_or_else(|| SondeError::Internal("version exchange not done".to_string()))
    }

    /// Sends our identification line and reads the server's, skipping up to
    /// [`MAX_BANNER_LINES`] pre-identification banner lines.
    pub async fn exchange_versions(&mut self, ours: &Version) -> SondeResult<Version> {
        if self.state != TransportState::VersionExchange {
            return Err(SondeError::UnexpectedMessage(format!(
                "version exchange in state {:?}",
                self.state
            )));
        }

        let wire = ours.to_wire();
        self.deadline
            .race("version write", write_all(&mut self.stream, &wire))
            .await?;

        let mut lines = 0;
        let theirs = loop {
            let line = self
                .deadline
                .race("version read", read_ascii_line(&mut self.stream))
                .await?;
            if line.starts_with("SSH-") {
                break Version::parse(&line)?;
            }
            lines += 1;
            if lines > MAX_BANNER_LINES {
                return Err(SondeError::Parse(
                    "too many banner lines before version".to_string(),
                ));
            }
            debug!(banner = %line, "skipping pre-version banner");
        };

        self.client_version = Some(ours.to_line());
        self.server_version = Some(theirs.to_line());
        self.advance_state(TransportState::KexNegotiate)?;
        Ok(theirs)
    }

    /// Switches both directions to encrypted framing. Called once, at
    /// NEWKEYS; the MAC states inherit the running sequence counters.
    pub fn enable_encryption(
        &mut self,
        mut send: DirectionState,
        mut recv: DirectionState,
    ) -> SondeResult<()> {
        if self.send_keys.is_some() || self.recv_keys.is_some() {
            return Err(SondeError::Internal("encryption already enabled".to_string()));
        }
        send.mac.set_sequence(self.send_sequence);
        recv.mac.set_sequence(self.recv_sequence);
        self.send_keys = Some(send);
        self.recv_keys = Some(recv);
        debug!("encrypted framing active");
        Ok(())
    }

    /// True once NEWKEYS has activated the cipher suite.
    pub fn is_encrypted(&self) -> bool {
        self.send_keys.is_some()
    }

    /// Sends one packet, encrypting and MACing when keys are active.
    pub async fn send_packet(&mut self, payload: &[u8]) -> SondeResult<()> {
        if self.state == TransportState::Closed {
            return Err(SondeError::Internal("send on closed transport".to_string()));
        }
        let packet = Packet::new(payload.to_vec())?;

        let wire = match &mut self.send_keys {
            Some(keys) => {
                let mut bytes = packet.to_bytes(CIPHER_BLOCK);
                let tag = keys.mac.compute(&bytes)?;
                keys.cipher.apply(&mut bytes);
                bytes.extend_from_slice(&tag);
                keys.mac.advance();
                bytes
            }
            None => packet.to_bytes(PLAINTEXT_BLOCK),
        };

        self.deadline
            .race("packet write", write_all(&mut self.stream, &wire))
            .await?;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        Ok(())
    }

    /// Receives one packet and returns its payload.
    ///
    /// A MAC mismatch surfaces as [`SondeError::Integrity`] without
    /// advancing the receive sequence; the connection must then be torn
    /// down.
    pub async fn recv_packet(&mut self) -> SondeResult<Vec<u8>> {
        if self.state == TransportState::Closed {
            return Err(SondeError::Internal("recv on closed transport".to_string()));
        }

        let plaintext = match &mut self.recv_keys {
            Some(keys) => {
                // First cipher block carries the length field.
                let mut first = [0u8; CIPHER_BLOCK];
                self.deadline
                    .race("packet read", read_exact(&mut self.stream, &mut first))
                    .await?;
                keys.cipher.apply(&mut first);

                let packet_length =
                    u32::from_be_bytes([first[0], first[1], first[2], first[3]]) as usize;
                let total = 4 + packet_length;
                if total > MAX_PACKET_SIZE {
                    return Err(SondeError::Parse(format!(
                        "packet length {} exceeds maximum",
                        packet_length
                    )));
                }
                if total < CIPHER_BLOCK || total % CIPHER_BLOCK != 0 {
                    return Err(SondeError::Parse(format!(
                        "encrypted packet length {} not block aligned",
                        packet_length
                    )));
                }

                let mut rest = vec![0u8; total - CIPHER_BLOCK];
                self.deadline
                    .race("packet read", read_exact(&mut self.stream, &mut rest))
                    .await?;
                keys.cipher.apply(&mut rest);

                let mut tag = [0u8; MAC_LEN];
                self.deadline
                    .race("packet read", read_exact(&mut self.stream, &mut tag))
                    .await?;

                let mut plaintext = Vec::with_capacity(total);
                plaintext.extend_from_slice(&first);
                plaintext.extend_from_slice(&rest);
                keys.mac.verify(&plaintext, &tag)?;
                keys.mac.advance();
                plaintext
            }
            None => {
                let mut header = [0u8; 4];
                self.deadline
                    .race("packet read", read_exact(&mut self.stream, &mut header))
                    .await?;
                let packet_length = u32::from_be_bytes(header) as usize;
                if 4 + packet_length > MAX_PACKET_SIZE {
                    return Err(SondeError::Parse(format!(
                        "packet length {} exceeds maximum",
                        packet_length
                    )));
                }
                let mut rest = vec![0u8; packet_length];
                self.deadline
                    .race("packet read", read_exact(&mut self.stream, &mut rest))
                    .await?;
                let mut plaintext = Vec::with_capacity(4 + packet_length);
                plaintext.extend_from_slice(&header);
                plaintext.extend_from_slice(&rest);
                plaintext
            }
        };

        let (packet, _) = Packet::from_bytes(&plaintext)?;
        self.recv_sequence = self.recv_sequence.wrapping_add(1);
        Ok(packet.payload().to_vec())
    }

    /// Marks the transport closed and shuts the stream down.
    pub async fn close(&mut self) -> SondeResult<()> {
        self.advance_state(TransportState::Closed)?;
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}

async fn write_all<S: AsyncWrite + Unpin>(stream: &mut S, bytes: &[u8]) -> SondeResult<()> {
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_exact<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut [u8]) -> SondeResult<()> {
    stream.read_exact(buf).await?;
    Ok(())
}

/// Reads one LF-terminated line, capped at the version line limit.
async fn read_ascii_line<S: AsyncRead + Unpin>(stream: &mut S) -> SondeResult<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_VERSION_LENGTH {
            return Err(SondeError::Parse("identification line too long".to_string()));
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| SondeError::Parse("identification line is not UTF-8".to_string()))
}
