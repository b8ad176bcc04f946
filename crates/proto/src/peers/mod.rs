//! Peer protocol clients built on the guard and the codec toolkit.
//!
//! Each module is a small, self-contained client for one wire protocol,
//! exposing its operations as `ProtocolResult`-returning functions:
//!
//! - [`modbus`] — binary length-prefixed framing (Read Holding Registers)
//! - [`redis`] — line-delimited RESP with a bounded recursive decoder
//! - [`svn`] — S-expression greeting exchange
//! - [`simple`] — the classic one-shot protocols (Echo, Discard, Daytime,
//!   Chargen, Time, Finger)

pub mod modbus;
pub mod redis;
pub mod simple;
pub mod svn;
