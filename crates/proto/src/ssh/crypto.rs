//! Encrypted transport primitives: aes128-ctr and hmac-sha2-256.
//!
//! One cipher/MAC pair per direction. The CTR keystream runs continuously
//! across packets (a `CipherState` is created once per direction at NEWKEYS
//! and never reset), and the MAC covers the packet's plaintext prefixed with
//! the direction's 32-bit sequence number:
//!
//! ```text
//! mac = HMAC-SHA256(mac_key, uint32 sequence ‖ plaintext packet)
//! ```
//!
//! Sequence numbers start at zero at the start of the connection, advance by
//! one per packet sent or received, and wrap at 2^32. A MAC mismatch is
//! terminal; the connection is torn down, never resynchronized.

use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sonde_platform::{SondeError, SondeResult};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// aes128-ctr key length.
pub const CIPHER_KEY_LEN: usize = 16;
/// aes128-ctr IV length.
pub const CIPHER_IV_LEN: usize = 16;
/// Cipher block size; packet alignment once encryption is active.
pub const CIPHER_BLOCK: usize = 16;
/// hmac-sha2-256 key length.
pub const MAC_KEY_LEN: usize = 32;
/// hmac-sha2-256 tag length.
pub const MAC_LEN: usize = 32;

/// One direction's cipher. Keystream position carries across packets.
pub struct CipherState {
    cipher: Aes128Ctr,
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherState").finish_non_exhaustive()
    }
}

impl CipherState {
    /// Initializes aes128-ctr from derived key material.
    pub fn new(key: &[u8], iv: &[u8]) -> SondeResult<Self> {
        if key.len() != CIPHER_KEY_LEN || iv.len() != CIPHER_IV_LEN {
            return Err(SondeError::Internal(format!(
                "aes128-ctr wants {}-byte key and {}-byte IV, got {}/{}",
                CIPHER_KEY_LEN,
                CIPHER_IV_LEN,
                key.len(),
                iv.len()
            )));
        }
        let cipher = Aes128Ctr::new(
            GenericArray::from_slice(key),
            GenericArray::from_slice(iv),
        );
        Ok(CipherState { cipher })
    }

    /// Encrypts or decrypts in place (CTR is symmetric).
    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}

/// One direction's MAC key and packet sequence number.
pub struct MacState {
    key: Zeroizing<Vec<u8>>,
    sequence: u32,
}

impl std::fmt::Debug for MacState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacState")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl MacState {
    /// Initializes hmac-sha2-256 from derived key material.
    pub fn new(key: &[u8]) -> SondeResult<Self> {
        if key.len() != MAC_KEY_LEN {
            return Err(SondeError::Internal(format!(
                "hmac-sha2-256 wants a {}-byte key, got {}",
                MAC_KEY_LEN,
                key.len()
            )));
        }
        Ok(MacState {
            key: Zeroizing::new(key.to_vec()),
            sequence: 0,
        })
    }

    /// Current sequence number.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Seeds the sequence counter.
    ///
    /// Sequence numbers count every packet from the start of the connection,
    /// plaintext ones included, so the transport syncs the counter here when
    /// keys become active at NEWKEYS.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    /// Computes the tag over `uint32 sequence ‖ plaintext`.
    pub fn compute(&self, plaintext: &[u8]) -> SondeResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| SondeError::Internal("HMAC key rejected".to_string()))?;
        mac.update(&self.sequence.to_be_bytes());
        mac.update(plaintext);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Verifies a received tag in constant time.
    ///
    /// Does not touch the sequence number; the transport advances it only
    /// after a packet is fully accepted.
    ///
    /// # Errors
    ///
    /// [`SondeError::Integrity`] on mismatch. Terminal for the connection.
    pub fn verify(&self, plaintext: &[u8], received: &[u8]) -> SondeResult<()> {
        let expected = self.compute(plaintext)?;
        if received.len() != expected.len() {
            return Err(SondeError::Integrity("MAC length mismatch".to_string()));
        }
        if expected.ct_eq(received).into() {
            Ok(())
        } else {
            Err(SondeError::Integrity(format!(
                "MAC verification failed at sequence {}",
                self.sequence
            )))
        }
    }

    /// Advances the sequence number by one, wrapping at 2^32.
    pub fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }
}

/// Cipher and MAC for one direction, created together at NEWKEYS.
#[derive(Debug)]
pub struct DirectionState {
    /// Packet cipher.
    pub cipher: CipherState,
    /// Packet MAC and sequence.
    pub mac: MacState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctr_round_trip() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let mut enc = CipherState::new(&key, &iv).unwrap();
        let mut dec = CipherState::new(&key, &iv).unwrap();

        let mut data = b"attack at dawn".to_vec();
        enc.apply(&mut data);
        assert_ne!(&data, b"attack at dawn");
        dec.apply(&mut data);
        assert_eq!(&data, b"attack at dawn");
    }

    #[test]
    fn test_ctr_keystream_continuity() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        // One stream over 32 bytes must equal two 16-byte applications.
        let mut whole = CipherState::new(&key, &iv).unwrap();
        let mut split = CipherState::new(&key, &iv).unwrap();

        let mut a = vec![0u8; 32];
        whole.apply(&mut a);

        let mut b1 = vec![0u8; 16];
        let mut b2 = vec![0u8; 16];
        split.apply(&mut b1);
        split.apply(&mut b2);
        b1.extend_from_slice(&b2);
        assert_eq!(a, b1);
    }

    #[test]
    fn test_cipher_rejects_bad_lengths() {
        assert!(CipherState::new(&[0; 8], &[0; 16]).is_err());
        assert!(CipherState::new(&[0; 16], &[0; 8]).is_err());
    }

    #[test]
    fn test_mac_round_trip() {
        let mac = MacState::new(&[0x33; 32]).unwrap();
        let tag = mac.compute(b"packet bytes").unwrap();
        assert_eq!(tag.len(), MAC_LEN);
        mac.verify(b"packet bytes", &tag).unwrap();
    }

    #[test]
    fn test_mac_sequence_participates() {
        let mut mac = MacState::new(&[0x33; 32]).unwrap();
        let tag_seq0 = mac.compute(b"packet").unwrap();
        mac.advance();
        let tag_seq1 = mac.compute(b"packet").unwrap();
        assert_ne!(tag_seq0, tag_seq1);
    }

    #[test]
    fn test_mac_mismatch_is_integrity_and_keeps_sequence() {
        let mac = MacState::new(&[0x33; 32]).unwrap();
        let mut tag = mac.compute(b"packet").unwrap();
        tag[0] ^= 0x01;
        let before = mac.sequence();
        assert!(matches!(
            mac.verify(b"packet", &tag),
            Err(SondeError::Integrity(_))
        ));
        assert_eq!(mac.sequence(), before);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut mac = MacState::new(&[0x33; 32]).unwrap();
        mac.sequence = u32::MAX;
        mac.advance();
        assert_eq!(mac.sequence(), 0);
    }
}
