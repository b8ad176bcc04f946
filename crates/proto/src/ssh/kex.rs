//! Algorithm negotiation (RFC 4253 Section 7.1).
//!
//! Both sides send SSH_MSG_KEXINIT listing their supported algorithms per
//! category in preference order. The negotiated algorithm for a category is
//! the first name in the client's list that the server also supports; an
//! empty intersection aborts the handshake.
//!
//! The engine ships exactly one suite:
//!
//! ```text
//! kex         curve25519-sha256
//! cipher      aes128-ctr        (both directions)
//! mac         hmac-sha2-256     (both directions)
//! compression none
//! ```

use bytes::{BufMut, BytesMut};
use rand::RngCore;
use sonde_platform::{SondeError, SondeResult};

use super::message::MessageType;
use super::wire;

/// Key exchange algorithms, preference order.
pub const KEX_ALGORITHMS: &[&str] = &["curve25519-sha256"];

/// Host key algorithms the client will accept a reply under.
pub const HOST_KEY_ALGORITHMS: &[&str] =
    &["ssh-ed25519", "rsa-sha2-512", "rsa-sha2-256", "ssh-rsa"];

/// Encryption algorithms, preference order.
pub const ENCRYPTION_ALGORITHMS: &[&str] = &["aes128-ctr"];

/// MAC algorithms, preference order.
pub const MAC_ALGORITHMS: &[&str] = &["hmac-sha2-256"];

/// Compression algorithms, preference order.
pub const COMPRESSION_ALGORITHMS: &[&str] = &["none"];

/// Parsed SSH_MSG_KEXINIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    /// 16 random bytes.
    pub cookie: [u8; 16],
    /// Key exchange algorithm names.
    pub kex_algorithms: Vec<String>,
    /// Server host key algorithm names.
    pub server_host_key_algorithms: Vec<String>,
    /// Ciphers, client to server.
    pub encryption_client_to_server: Vec<String>,
    /// Ciphers, server to client.
    pub encryption_server_to_client: Vec<String>,
    /// MACs, client to server.
    pub mac_client_to_server: Vec<String>,
    /// MACs, server to client.
    pub mac_server_to_client: Vec<String>,
    /// Compression, client to server.
    pub compression_client_to_server: Vec<String>,
    /// Compression, server to client.
    pub compression_server_to_client: Vec<String>,
    /// Language tags, client to server.
    pub languages_client_to_server: Vec<String>,
    /// Language tags, server to client.
    pub languages_server_to_client: Vec<String>,
    /// A guessed kex packet follows (RFC 4253 Section 7.1); the engine never
    /// guesses, and a peer guess against single-entry lists is always right.
    pub first_kex_packet_follows: bool,
}

impl KexInit {
    /// Builds the client KEXINIT with a fresh random cookie.
    pub fn new_client() -> Self {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        KexInit {
            cookie,
            kex_algorithms: owned(KEX_ALGORITHMS),
            server_host_key_algorithms: owned(HOST_KEY_ALGORITHMS),
            encryption_client_to_server: owned(ENCRYPTION_ALGORITHMS),
            encryption_server_to_client: owned(ENCRYPTION_ALGORITHMS),
            mac_client_to_server: owned(MAC_ALGORITHMS),
            mac_server_to_client: owned(MAC_ALGORITHMS),
            compression_client_to_server: owned(COMPRESSION_ALGORITHMS),
            compression_server_to_client: owned(COMPRESSION_ALGORITHMS),
            languages_client_to_server: Vec::new(),
            languages_server_to_client: Vec::new(),
            first_kex_packet_follows: false,
        }
    }

    /// Serializes the full KEXINIT payload, message type byte included.
    ///
    /// This exact byte sequence participates in the exchange hash as I_C or
    /// I_S, so it must match what went over the wire byte for byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexInit.to_u8());
        buf.put_slice(&self.cookie);
        for list in [
            &self.kex_algorithms,
            &self.server_host_key_algorithms,
            &self.encryption_client_to_server,
            &self.encryption_server_to_client,
            &self.mac_client_to_server,
            &self.mac_server_to_client,
            &self.compression_client_to_server,
            &self.compression_server_to_client,
            &self.languages_client_to_server,
            &self.languages_server_to_client,
        ] {
            let refs: Vec<&str> = list.iter().map(String::as_str).collect();
            wire::put_name_list(&mut buf, &refs);
        }
        wire::put_bool(&mut buf, self.first_kex_packet_follows);
        wire::put_u32(&mut buf, 0); // reserved
        buf.to_vec()
    }

    /// Parses a KEXINIT payload (message type byte included).
    pub fn from_bytes(payload: &[u8]) -> SondeResult<Self> {
        let (msg_type, mut offset) = crate::codec::read_u8(payload, 0)?;
        if msg_type != MessageType::KexInit.to_u8() {
            return Err(SondeError::UnexpectedMessage(format!(
                "expected KEXINIT, got message type {}",
                msg_type
            )));
        }

        let cookie_end = offset + 16;
        let cookie_bytes = payload.get(offset..cookie_end).ok_or_else(|| {
            SondeError::Parse("KEXINIT truncated inside cookie".to_string())
        })?;
        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(cookie_bytes);
        offset = cookie_end;

        let mut lists: Vec<Vec<String>> = Vec::with_capacity(10);
        for _ in 0..10 {
            let (names, next) = wire::read_name_list(payload, offset)?;
            lists.push(names);
            offset = next;
        }

        let (first_kex_packet_follows, next) = wire::read_bool(payload, offset)?;
        let (_reserved, _) = wire::read_u32(payload, next)?;

        let mut lists = lists.into_iter();
        // Ten name-lists were just pushed; next() cannot fail.
        let mut take = || {
            lists
                .next()
                .ok_or_else(|| SondeError::Internal("KEXINIT list count".to_string()))
        };

        Ok(KexInit {
            cookie,
            kex_algorithms: take()?,
            server_host_key_algorithms: take()?,
            encryption_client_to_server: take()?,
            encryption_server_to_client: take()?,
            mac_client_to_server: take()?,
            mac_server_to_client: take()?,
            compression_client_to_server: take()?,
            compression_server_to_client: take()?,
            languages_client_to_server: take()?,
            languages_server_to_client: take()?,
            first_kex_packet_follows,
        })
    }
}

/// The algorithms agreed for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedAlgorithms {
    /// Key exchange algorithm.
    pub kex: String,
    /// Host key algorithm.
    pub host_key: String,
    /// Cipher, client to server.
    pub cipher_client_to_server: String,
    /// Cipher, server to client.
    pub cipher_server_to_client: String,
    /// MAC, client to server.
    pub mac_client_to_server: String,
    /// MAC, server to client.
    pub mac_server_to_client: String,
}

/// Picks the first client-preferred name the server also supports.
///
/// # Errors
///
/// [`SondeError::NoCommonAlgorithm`] naming `category` when the intersection
/// is empty.
pub fn negotiate(category: &str, client: &[String], server: &[String]) -> SondeResult<String> {
    client
        .iter()
        .find(|name| server.contains(name))
        .cloned()
        .ok_or_else(|| SondeError::NoCommonAlgorithm {
            category: category.to_string(),
        })
}

/// Negotiates every category from a client/server KEXINIT pair.
pub fn negotiate_all(client: &KexInit, server: &KexInit) -> SondeResult<NegotiatedAlgorithms> {
    Ok(NegotiatedAlgorithms {
        kex: negotiate("kex", &client.kex_algorithms, &server.kex_algorithms)?,
        host_key: negotiate(
            "host key",
            &client.server_host_key_algorithms,
            &server.server_host_key_algorithms,
        )?,
        cipher_client_to_server: negotiate(
            "cipher client-to-server",
            &client.encryption_client_to_server,
            &server.encryption_client_to_server,
        )?,
        cipher_server_to_client: negotiate(
            "cipher server-to-client",
            &client.encryption_server_to_client,
            &server.encryption_server_to_client,
        )?,
        mac_client_to_server: negotiate(
            "mac client-to-server",
            &client.mac_client_to_server,
            &server.mac_client_to_server,
        )?,
        mac_server_to_client: negotiate(
            "mac server-to-client",
            &client.mac_server_to_client,
            &server.mac_server_to_client,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kexinit_round_trip() {
        let kexinit = KexInit::new_client();
        let bytes = kexinit.to_bytes();
        let parsed = KexInit::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, kexinit);
    }

    #[test]
    fn test_kexinit_rejects_wrong_type() {
        let mut bytes = KexInit::new_client().to_bytes();
        bytes[0] = MessageType::NewKeys.to_u8();
        assert!(matches!(
            KexInit::from_bytes(&bytes),
            Err(SondeError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_kexinit_rejects_truncation() {
        let bytes = KexInit::new_client().to_bytes();
        assert!(KexInit::from_bytes(&bytes[..20]).is_err());
    }

    #[test]
    fn test_negotiate_client_preference_wins() {
        let client = vec!["a".to_string(), "b".to_string()];
        let server = vec!["b".to_string(), "a".to_string()];
        assert_eq!(negotiate("cipher", &client, &server).unwrap(), "a");
    }

    #[test]
    fn test_negotiate_empty_intersection() {
        let client = vec!["aes128-ctr".to_string()];
        let server = vec!["chacha20-poly1305@openssh.com".to_string()];
        match negotiate("cipher", &client, &server) {
            Err(SondeError::NoCommonAlgorithm { category }) => {
                assert_eq!(category, "cipher");
            }
            other => panic!("expected NoCommonAlgorithm, got {:?}", other),
        }
    }

    #[test]
    fn test_negotiate_all_single_suite() {
        let client = KexInit::new_client();
        let server = KexInit::new_client();
        let negotiated = negotiate_all(&client, &server).unwrap();
        assert_eq!(negotiated.kex, "curve25519-sha256");
        assert_eq!(negotiated.cipher_client_to_server, "aes128-ctr");
        assert_eq!(negotiated.mac_server_to_client, "hmac-sha2-256");
    }
}
