//! Wire-level protocol clients for the Sonde probing engine.
//!
//! Everything here is built from the octet level up on one I/O primitive:
//! open a TCP (optionally TLS-wrapped) connection to host:port under a
//! deadline. The crate provides:
//!
//! - **guard** — the single gateway to the network: input validation,
//!   blocked-range checks before any connect, deadline racing, teardown on
//!   every path
//! - **codec** — pure byte codec toolkit: integers, length-prefixed frames,
//!   TLV records, text lines, bounded-depth S-expressions
//! - **exchange** — the connect / handshake / round-trip / teardown skeleton
//!   every client follows
//! - **ssh** — a from-scratch SSH2 client engine (RFC 4251-4254) with one
//!   algorithm suite, password auth, and single-channel exec
//! - **peers** — exemplar clients: Modbus/TCP, Redis RESP, svnserve
//!   greeting, and the classic one-shot protocols
//!
//! # Example
//!
//! ```no_run
//! use sonde_proto::peers::redis::{ping, RedisParams};
//!
//! # async fn example() {
//! let params = RedisParams {
//!     host: "203.0.113.10".to_string(),
//!     port: 6379,
//!     message: None,
//!     timeout_ms: 5000,
//! };
//! let result = ping(&params).await;
//! if let Some(reply) = result.payload() {
//!     println!("server answered {}", reply);
//! }
//! # }
//! ```
//!
//! # Security
//!
//! - No panics on hostile input: every decoder is total, returning typed
//!   errors for garbage and an explicit need-more signal for truncation
//! - Cryptographic operations use vetted libraries (`ring`, RustCrypto)
//! - Constant-time MAC comparison, key material zeroized on drop
//! - Destinations in blocked network ranges are rejected before any socket
//!   operation

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod exchange;
pub mod guard;
pub mod peers;
pub mod ssh;

pub use exchange::{run_exchange, Exchange};
pub use guard::{ConnectionRequest, Deadline, GuardedConnection};
