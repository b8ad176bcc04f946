//! SSH primitive data types (RFC 4251 Section 5).
//!
//! Encoders append to a `BytesMut`; decoders take `(buf, offset)` and return
//! the value plus the next offset, failing with a parse error on truncation.
//!
//! ```text
//! string    uint32 length, then length bytes
//! mpint     string holding a signed big-endian integer, minimal length,
//!           leading zero byte added when the high bit is set
//! name-list string holding comma-separated names
//! ```

use bytes::{BufMut, BytesMut};
use sonde_platform::{SondeError, SondeResult};

use crate::codec;

/// Appends a `uint32`.
pub fn put_u32(buf: &mut BytesMut, value: u32) {
    buf.put_u32(value);
}

/// Appends a `boolean`.
pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Appends an SSH `string`.
pub fn put_string(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

/// Appends an SSH `name-list` (comma-separated names as one string).
pub fn put_name_list(buf: &mut BytesMut, names: &[&str]) {
    put_string(buf, names.join(",").as_bytes());
}

/// Appends an SSH `mpint` encoding of an unsigned big-endian integer.
///
/// Leading zero bytes are stripped; a zero byte is prepended when the top bit
/// of the first remaining byte is set, keeping the value positive.
pub fn put_mpint(buf: &mut BytesMut, value: &[u8]) {
    let stripped: &[u8] = {
        let mut slice = value;
        while let Some((&0, rest)) = slice.split_first() {
            slice = rest;
        }
        slice
    };
    if stripped.is_empty() {
        buf.put_u32(0);
        return;
    }
    let needs_pad = stripped[0] & 0x80 != 0;
    buf.put_u32(stripped.len() as u32 + u32::from(needs_pad));
    if needs_pad {
        buf.put_u8(0);
    }
    buf.put_slice(stripped);
}

/// Reads a `uint32` at `offset`.
pub fn read_u32(buf: &[u8], offset: usize) -> SondeResult<(u32, usize)> {
    codec::read_u32_be(buf, offset)
}

/// Reads a `boolean` at `offset`.
pub fn read_bool(buf: &[u8], offset: usize) -> SondeResult<(bool, usize)> {
    let (byte, next) = codec::read_u8(buf, offset)?;
    Ok((byte != 0, next))
}

/// Reads an SSH `string` at `offset`.
pub fn read_string(buf: &[u8], offset: usize) -> SondeResult<(Vec<u8>, usize)> {
    let (length, start) = codec::read_u32_be(buf, offset)?;
    let length = length as usize;
    let end = start.checked_add(length).ok_or_else(|| {
        SondeError::Parse("string length overflows buffer offset".to_string())
    })?;
    let bytes = buf.get(start..end).ok_or_else(|| {
        SondeError::Parse(format!(
            "string of {} bytes truncated ({} available)",
            length,
            buf.len().saturating_sub(start)
        ))
    })?;
    Ok((bytes.to_vec(), end))
}

/// Reads an SSH `string` and requires valid UTF-8.
pub fn read_utf8(buf: &[u8], offset: usize) -> SondeResult<(String, usize)> {
    let (bytes, next) = read_string(buf, offset)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| SondeError::Parse("string is not valid UTF-8".to_string()))?;
    Ok((text, next))
}

/// Reads an SSH `name-list` at `offset`.
pub fn read_name_list(buf: &[u8], offset: usize) -> SondeResult<(Vec<String>, usize)> {
    let (text, next) = read_utf8(buf, offset)?;
    if text.is_empty() {
        return Ok((Vec::new(), next));
    }
    Ok((text.split(',').map(String::from).collect(), next))
}
