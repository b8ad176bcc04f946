//! SSH2 client engine (RFC 4251-4254), built from the octet level up.
//!
//! Implements the client side of the SSH transport, authentication, and
//! connection protocols with a single algorithm suite:
//!
//! | Category    | Algorithm          |
//! |-------------|--------------------|
//! | Kex         | curve25519-sha256  |
//! | Cipher      | aes128-ctr         |
//! | MAC         | hmac-sha2-256      |
//! | Compression | none               |
//!
//! Supported flow: version exchange, KEXINIT negotiation, curve25519 key
//! exchange, NEWKEYS, password authentication, one session channel, one
//! exec request, output streaming. No rekeying, no host-key verification
//! (see [`kex_dh`]), no SFTP or forwarding.
//!
//! Module layout mirrors the protocol layers:
//!
//! - [`version`] — identification line exchange
//! - [`message`] — message type numbers
//! - [`packet`] — binary packet framing
//! - [`kex`] / [`kex_dh`] — negotiation and key exchange
//! - [`crypto`] — aes128-ctr + hmac-sha2-256 direction states
//! - [`transport`] — packet transport and session state machine
//! - [`auth`] — password authentication messages
//! - [`channel`] — session channel messages and flow control
//! - [`client`] — the engine driving all of the above
//! - [`probe`] — the boundary operation returning a `ProtocolResult`

pub mod auth;
pub mod channel;
pub mod client;
pub mod crypto;
pub mod kex;
pub mod kex_dh;
pub mod message;
pub mod packet;
pub mod probe;
pub mod transport;
pub mod version;
pub mod wire;

pub use client::{ExecOutput, SshClient};
pub use message::MessageType;
pub use probe::{exec, ExecParams};
pub use transport::{Transport, TransportState};
pub use version::Version;
