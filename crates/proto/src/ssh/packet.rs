//! SSH binary packet format (RFC 4253 Section 6).
//!
//! ```text
//! uint32    packet_length  (length of everything after this field)
//! byte      padding_length
//! byte[n1]  payload
//! byte[n2]  random padding (>= 4 bytes)
//! byte[m]   MAC (added by the transport once keys are active)
//! ```
//!
//! The total length through the padding must be a multiple of the cipher
//! block size: 8 while the connection is plaintext, 16 once aes128-ctr is
//! active. Maximum accepted packet size is 35000 bytes.

use bytes::{BufMut, BytesMut};
use rand::RngCore;
use sonde_platform::{SondeError, SondeResult};

use crate::codec;

/// Maximum total packet size the engine will build or accept.
pub const MAX_PACKET_SIZE: usize = 35000;

/// Minimum random padding (RFC 4253 Section 6).
pub const MIN_PADDING: usize = 4;

/// Block alignment before NEWKEYS.
pub const PLAINTEXT_BLOCK: usize = 8;

/// One SSH binary packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
}

impl Packet {
    /// Wraps a payload, checking it fits within the size cap.
    pub fn new(payload: Vec<u8>) -> SondeResult<Self> {
        if payload.is_empty() {
            return Err(SondeError::Internal("empty packet payload".to_string()));
        }
        if payload.len() + MIN_PADDING + 5 > MAX_PACKET_SIZE {
            return Err(SondeError::Validation(format!(
                "payload of {} bytes exceeds maximum packet size",
                payload.len()
            )));
        }
        Ok(Packet { payload })
    }

    /// The packet payload (first byte is the message type).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serializes length, padding length, payload, and random padding,
    /// aligned to `block_size`.
    pub fn to_bytes(&self, block_size: usize) -> Vec<u8> {
        let unpadded = 4 + 1 + self.payload.len();
        let mut padding = block_size - (unpadded % block_size);
        if padding < MIN_PADDING {
            padding += block_size;
        }

        let mut pad = vec![0u8; padding];
        rand::thread_rng().fill_bytes(&mut pad);

        let packet_length = (1 + self.payload.len() + padding) as u32;
        let mut buf = BytesMut::with_capacity(4 + packet_length as usize);
        buf.put_u32(packet_length);
        buf.put_u8(padding as u8);
        buf.put_slice(&self.payload);
        buf.put_slice(&pad);
        buf.to_vec()
    }

    /// Parses one full plaintext packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed. The caller is
    /// responsible for having buffered the complete packet.
    ///
    /// # Errors
    ///
    /// [`SondeError::Parse`] for truncation, oversized declarations, or a
    /// padding length that does not fit the packet.
    pub fn from_bytes(buf: &[u8]) -> SondeResult<(Packet, usize)> {
        let (packet_length, _) = codec::read_u32_be(buf, 0)?;
        let packet_length = packet_length as usize;

        if packet_length < 1 + MIN_PADDING + 1 {
            return Err(SondeError::Parse(format!(
                "packet length {} too small",
                packet_length
            )));
        }
        if 4 + packet_length > MAX_PACKET_SIZE {
            return Err(SondeError::Parse(format!(
                "packet length {} exceeds maximum",
                packet_length
            )));
        }
        if buf.len() < 4 + packet_length {
            return Err(SondeError::Parse(format!(
                "packet truncated: need {} bytes, have {}",
                4 + packet_length,
                buf.len()
            )));
        }

        let padding_length = buf[4] as usize;
        if padding_length < MIN_PADDING || padding_length + 1 >= packet_length {
            return Err(SondeError::Parse(format!(
                "invalid padding length {}",
                padding_length
            )));
        }

        let payload_len = packet_length - 1 - padding_length;
        let payload = buf[5..5 + payload_len].to_vec();
        Ok((Packet { payload }, 4 + packet_length))
    }
}
