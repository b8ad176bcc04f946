//! Byte codec toolkit.
//!
//! Pure, I/O-free encoding and decoding primitives used by every protocol
//! client in this crate: fixed-width integers, length-prefixed frames, TLV
//! records, delimiter-terminated lines, and bounded-depth S-expressions.
//!
//! Everything here operates on byte slices and returns either a complete
//! value with a consumed count or an explicit "need more bytes" signal, so
//! the transport layers can feed partial reads straight in.

pub mod sexpr;
pub mod wire;

pub use sexpr::{parse as parse_sexpr, DepthGuard, SExpr, DEFAULT_MAX_DEPTH};
pub use wire::{
    read_length_prefixed, read_line, read_tlv, read_u16_be, read_u16_le, read_u32_be,
    read_u32_le, read_u8, write_length_prefixed, write_tlv, write_u16_be, write_u16_le,
    write_u32_be, write_u32_le, Decode, Frame, MAX_FRAME_LEN,
};
