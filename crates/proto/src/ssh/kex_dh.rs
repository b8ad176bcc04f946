//! curve25519-sha256 key exchange (RFC 5656 Section 4, RFC 8731).
//!
//! The client sends an ephemeral X25519 public key (KEXDH_INIT), the server
//! replies with its host key, its own ephemeral public key, and a signature
//! over the exchange hash (KEXDH_REPLY). Both sides compute
//!
//! ```text
//! H = SHA256(string V_C ‖ string V_S ‖ string I_C ‖ string I_S ‖
//!            string K_S ‖ string Q_C ‖ string Q_S ‖ mpint K)
//! ```
//!
//! and derive the session keys from K and H.
//!
//! # Security
//!
//! The host key signature in KEXDH_REPLY is accepted without verification.
//! This engine performs read-only diagnostic probes against hosts the caller
//! names explicitly; it makes no trust decision based on the channel, so the
//! usual man-in-the-middle guarantee is out of scope here.

use bytes::{BufMut, BytesMut};
use ring::agreement::{agree_ephemeral, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::rand::SystemRandom;
use sha2::{Digest, Sha256};
use sonde_platform::{SondeError, SondeResult};
use zeroize::Zeroizing;

use super::message::MessageType;
use super::wire;

/// SSH_MSG_KEXDH_INIT: the client's ephemeral public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexDhInit {
    /// Q_C, 32 bytes for X25519.
    pub public_key: Vec<u8>,
}

impl KexDhInit {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexDhInit.to_u8());
        wire::put_string(&mut buf, &self.public_key);
        buf.to_vec()
    }

    /// Parses a KEXDH_INIT payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::KexDhInit.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected KEXDH_INIT, got message type {}",
                msg_type
            )));
        }
        let (public_key, _) = wire::read_string(payload, offset)?;
        Ok(KexDhInit { public_key })
    }
}

/// SSH_MSG_KEXDH_REPLY: host key, server ephemeral key, signature over H.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexDhReply {
    /// K_S, the server host key blob.
    pub host_key: Vec<u8>,
    /// Q_S, 32 bytes for X25519.
    pub public_key: Vec<u8>,
    /// Signature over the exchange hash. Not verified.
    pub signature: Vec<u8>,
}

impl KexDhReply {
    /// Serializes the payload, message type byte included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexDhReply.to_u8());
        wire::put_string(&mut buf, &self.host_key);
        wire::put_string(&mut buf, &self.public_key);
        wire::put_string(&mut buf, &self.signature);
        buf.to_vec()
    }

    /// Parses a KEXDH_REPLY payload.
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::KexDhReply.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected KEXDH_REPLY, got message type {}",
                msg_type
            )));
        }
        let (host_key, offset) = wire::read_string(payload, offset)?;
        let (public_key, offset) = wire::read_string(payload, offset)?;
        let (signature, _) = wire::read_string(payload, offset)?;
        Ok(KexDhReply {
            host_key,
            public_key,
            signature,
        })
    }
}

/// The client's ephemeral X25519 keypair for one exchange.
pub struct ClientKex {
    private: EphemeralPrivateKey,
    /// Q_C as sent on the wire.
    pub public_key: Vec<u8>,
}

impl std::fmt::Debug for ClientKex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Private key is intentionally opaque.
        f.debug_struct("ClientKex").finish_non_exhaustive()
    }
}

impl ClientKex {
    /// Generates a fresh ephemeral keypair.
    pub fn generate() -> SondeResult<Self> {
        let rng = SystemRandom::new();
        let private = EphemeralPrivateKey::generate(&X25519, &rng)
            .map_err(|_| SondeError::Internal("X25519 keygen failed".to_string()))?;
        let public_key = private
            .compute_public_key()
            .map_err(|_| SondeError::Internal("X25519 public key failed".to_string()))?
            .as_ref()
            .to_vec();
        Ok(ClientKex {
            private,
            public_key,
        })
    }

    /// Computes the shared secret K against the server's Q_S, consuming the
    /// ephemeral private key.
    pub fn agree(self, server_public: &[u8]) -> SondeResult<Zeroizing<Vec<u8>>> {
        if server_public.len() != 32 {
            return Err(SondeError::Parse(format!(
                "server X25519 key must be 32 bytes, got {}",
                server_public.len()
            )));
        }
        let peer = UnparsedPublicKey::new(&X25519, server_public);
        agree_ephemeral(self.private, &peer, |secret| {
            Zeroizing::new(secret.to_vec())
        })
        .map_err(|_| SondeError::Parse("X25519 agreement failed".to_string()))
    }
}

/// Computes the exchange hash H.
///
/// Version strings are passed without their CR LF terminators; KEXINIT
/// payloads include the leading message type byte, exactly as sent.
#[allow(clippy::too_many_arguments)]
pub fn exchange_hash(
    client_version: &str,
    server_version: &str,
    client_kexinit: &[u8],
    server_kexinit: &[u8],
    host_key: &[u8],
    client_public: &[u8],
    server_public: &[u8],
    shared_secret: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::new();
    wire::put_string(&mut buf, client_version.as_bytes());
    wire::put_string(&mut buf, server_version.as_bytes());
    wire::put_string(&mut buf, client_kexinit);
    wire::put_string(&mut buf, server_kexinit);
    wire::put_string(&mut buf, host_key);
    wire::put_string(&mut buf, client_public);
    wire::put_string(&mut buf, server_public);
    wire::put_mpint(&mut buf, shared_secret);
    Sha256::digest(&buf).to_vec()
}

/// Derives `len` bytes of key material (RFC 4253 Section 7.2).
///
/// ```text
/// K1 = HASH(mpint K ‖ H ‖ letter ‖ session_id)
/// Kn = HASH(mpint K ‖ H ‖ K1 ‖ … ‖ Kn-1)
/// ```
///
/// Letters: 'A' IV client-to-server, 'B' IV server-to-client, 'C' encryption
/// key client-to-server, 'D' encryption key server-to-client, 'E' MAC key
/// client-to-server, 'F' MAC key server-to-client. Deterministic pure
/// function of its inputs.
pub fn derive_key(
    shared_secret: &[u8],
    exchange_hash: &[u8],
    letter: u8,
    session_id: &[u8],
    len: usize,
) -> Vec<u8> {
    let mut k_mpint = BytesMut::new();
    wire::put_mpint(&mut k_mpint, shared_secret);

    let mut hasher = Sha256::new();
    hasher.update(&k_mpint);
    hasher.update(exchange_hash);
    hasher.update([letter]);
    hasher.update(session_id);
    let mut material = hasher.finalize().to_vec();

    while material.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(&k_mpint);
        hasher.update(exchange_hash);
        hasher.update(&material);
        material.extend_from_slice(&hasher.finalize());
    }
    material.truncate(len);
    material
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kexdh_init_round_trip() {
        let init = KexDhInit {
            public_key: vec![0xab; 32],
        };
        let parsed = KexDhInit::from_bytes(&init.to_bytes()).unwrap();
        assert_eq!(parsed, init);
    }

    #[test]
    fn test_kexdh_reply_round_trip() {
        let reply = KexDhReply {
            host_key: b"ssh-ed25519 blob".to_vec(),
            public_key: vec![0xcd; 32],
            signature: b"signature blob".to_vec(),
        };
        let parsed = KexDhReply::from_bytes(&reply.to_bytes()).unwrap();
        assert_eq!(parsed, reply);
    }

    #[test]
    fn test_agreement_matches_both_sides() {
        let alice = ClientKex::generate().unwrap();
        let bob = ClientKex::generate().unwrap();
        let alice_public = alice.public_key.clone();
        let shared_a = alice.agree(&bob.public_key.clone()).unwrap();
        let shared_b = bob.agree(&alice_public).unwrap();
        assert_eq!(shared_a.as_slice(), shared_b.as_slice());
        assert_eq!(shared_a.len(), 32);
    }

    #[test]
    fn test_agree_rejects_bad_key_length() {
        let kex = ClientKex::generate().unwrap();
        assert!(kex.agree(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_exchange_hash_deterministic() {
        let h1 = exchange_hash(
            "SSH-2.0-Sonde_0.1.0",
            "SSH-2.0-OpenSSH_8.9",
            &[20, 1, 2],
            &[20, 3, 4],
            b"hostkey",
            &[0x11; 32],
            &[0x22; 32],
            &[0x33; 32],
        );
        let h2 = exchange_hash(
            "SSH-2.0-Sonde_0.1.0",
            "SSH-2.0-OpenSSH_8.9",
            &[20, 1, 2],
            &[20, 3, 4],
            b"hostkey",
            &[0x11; 32],
            &[0x22; 32],
            &[0x33; 32],
        );
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);

        let h3 = exchange_hash(
            "SSH-2.0-Sonde_0.1.0",
            "SSH-2.0-OpenSSH_9.0",
            &[20, 1, 2],
            &[20, 3, 4],
            b"hostkey",
            &[0x11; 32],
            &[0x22; 32],
            &[0x33; 32],
        );
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_derive_key_deterministic_and_letter_sensitive() {
        let k = [0x42u8; 32];
        let h = [0x17u8; 32];
        let key_c = derive_key(&k, &h, b'C', &h, 16);
        let key_c2 = derive_key(&k, &h, b'C', &h, 16);
        let key_d = derive_key(&k, &h, b'D', &h, 16);
        assert_eq!(key_c, key_c2);
        assert_ne!(key_c, key_d);
        assert_eq!(key_c.len(), 16);
    }

    #[test]
    fn test_derive_key_extension_prefix() {
        // A longer request starts with the shorter derivation.
        let k = [0x42u8; 32];
        let h = [0x17u8; 32];
        let short = derive_key(&k, &h, b'E', &h, 32);
        let long = derive_key(&k, &h, b'E', &h, 48);
        assert_eq!(&long[..32], short.as_slice());
    }
}
