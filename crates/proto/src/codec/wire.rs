//! Stateless wire codec primitives.
//!
//! Pure encode/decode helpers shared by every protocol module: fixed-width
//! integers in both byte orders, length-prefixed frames, TLV records, and
//! delimiter-terminated text lines.
//!
//! All decode functions are total over malformed input. They never panic on
//! truncated or garbage bytes; truncation that more bytes could satisfy is
//! reported as [`Decode::NeedMore`], anything else as a typed
//! [`SondeError::Parse`], so a caller can always distinguish "wait for more
//! bytes" from "the server violated the protocol".

use sonde_platform::{SondeError, SondeResult};

/// Hard cap on a declared frame length (16 MiB).
///
/// A peer that announces a larger frame is treated as malformed rather than
/// allowed to drive an allocation of its choosing.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A decoded protocol message unit. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// N-byte length header followed by N bytes of payload.
    LengthPrefixed {
        /// Frame payload, without the length header.
        payload: Vec<u8>,
    },
    /// Delimiter-terminated text, returned without the terminator.
    Line {
        /// Decoded line content.
        text: String,
    },
    /// Type-length-value record.
    Tlv {
        /// Attribute type.
        tag: u8,
        /// Attribute value bytes.
        value: Vec<u8>,
    },
}

/// Result of a framing decode over a possibly-incomplete buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decode<T> {
    /// A full unit was decoded, consuming `consumed` bytes from the offset.
    Complete {
        /// The decoded value.
        value: T,
        /// Bytes consumed from the given offset.
        consumed: usize,
    },
    /// The buffer ends mid-unit; the caller should read more bytes.
    NeedMore,
}

/// Reads a `u8` at `offset`, returning the value and the next offset.
pub fn read_u8(buf: &[u8], offset: usize) -> SondeResult<(u8, usize)> {
    match buf.get(offset) {
        Some(&byte) => Ok((byte, offset + 1)),
        None => Err(SondeError::Parse(format!(
            "u8 read past end of buffer (offset {}, len {})",
            offset,
            buf.len()
        ))),
    }
}

/// Reads a big-endian `u16` at `offset`.
pub fn read_u16_be(buf: &[u8], offset: usize) -> SondeResult<(u16, usize)> {
    let bytes = take(buf, offset, 2)?;
    Ok((u16::from_be_bytes([bytes[0], bytes[1]]), offset + 2))
}

/// Reads a big-endian `u32` at `offset`.
pub fn read_u32_be(buf: &[u8], offset: usize) -> SondeResult<(u32, usize)> {
    let bytes = take(buf, offset, 4)?;
    Ok((
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        offset + 4,
    ))
}

/// Reads a little-endian `u16` at `offset`.
pub fn read_u16_le(buf: &[u8], offset: usize) -> SondeResult<(u16, usize)> {
    let bytes = take(buf, offset, 2)?;
    Ok((u16::from_le_bytes([bytes[0], bytes[1]]), offset + 2))
}

/// Reads a little-endian `u32` at `offset`.
pub fn read_u32_le(buf: &[u8], offset: usize) -> SondeResult<(u32, usize)> {
    let bytes = take(buf, offset, 4)?;
    Ok((
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        offset + 4,
    ))
}

/// Appends a big-endian `u16` to `out`.
pub fn write_u16_be(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Appends a big-endian `u32` to `out`.
pub fn write_u32_be(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Appends a little-endian `u16` to `out`.
pub fn write_u16_le(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Appends a little-endian `u32` to `out`.
pub fn write_u32_le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn take(buf: &[u8], offset: usize, count: usize) -> SondeResult<&[u8]> {
    let end = offset.checked_add(count).ok_or_else(|| {
        SondeError::Parse(format!("integer read offset overflow at {}", offset))
    })?;
    buf.get(offset..end).ok_or_else(|| {
        SondeError::Parse(format!(
            "{}-byte read past end of buffer (offset {}, len {})",
            count,
            offset,
            buf.len()
        ))
    })
}

/// Decodes a length-prefixed frame at `offset`.
///
/// `width` selects the big-endian length header size: 1, 2, or 4 bytes.
/// Decoding a complete frame consumes exactly `width + payload_len` bytes.
pub fn read_length_prefixed(
    buf: &[u8],
    offset: usize,
    width: usize,
) -> SondeResult<Decode<Frame>> {
    let length = match width {
        1 => match buf.get(offset) {
            Some(&b) => b as usize,
            None => return Ok(Decode::NeedMore),
        },
        2 => {
            if buf.len() < offset + 2 {
                return Ok(Decode::NeedMore);
            }
            read_u16_be(buf, offset)?.0 as usize
        }
        4 => {
            if buf.len() < offset + 4 {
                return Ok(Decode::NeedMore);
            }
            read_u32_be(buf, offset)?.0 as usize
        }
        other => {
            return Err(SondeError::Internal(format!(
                "unsupported length header width {}",
                other
            )))
        }
    };

    if length > MAX_FRAME_LEN {
        return Err(SondeError::Parse(format!(
            "declared frame length {} exceeds cap {}",
            length, MAX_FRAME_LEN
        )));
    }

    let start = offset + width;
    if buf.len() < start + length {
        return Ok(Decode::NeedMore);
    }

    Ok(Decode::Complete {
        value: Frame::LengthPrefixed {
            payload: buf[start..start + length].to_vec(),
        },
        consumed: width + length,
    })
}

/// Encodes a payload as a length-prefixed frame with the given header width.
pub fn write_length_prefixed(payload: &[u8], width: usize) -> SondeResult<Vec<u8>> {
    let max = match width {
        1 => u8::MAX as usize,
        2 => u16::MAX as usize,
        4 => u32::MAX as usize,
        other => {
            return Err(SondeError::Internal(format!(
                "unsupported length header width {}",
                other
            )))
        }
    };
    if payload.len() > max {
        return Err(SondeError::Validation(format!(
            "payload of {} bytes does not fit a {}-byte length header",
            payload.len(),
            width
        )));
    }

    let mut out = Vec::with_capacity(width + payload.len());
    match width {
        1 => out.push(payload.len() as u8),
        2 => out.extend_from_slice(&(payload.len() as u16).to_be_bytes()),
        _ => out.extend_from_slice(&(payload.len() as u32).to_be_bytes()),
    }
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a delimiter-terminated line starting at `offset`.
///
/// The returned [`Frame::Line`] excludes the terminator; `consumed` includes
/// it. Non-UTF-8 line content is a parse error, not a panic.
pub fn read_line(buf: &[u8], offset: usize, terminator: &[u8]) -> SondeResult<Decode<Frame>> {
    if terminator.is_empty() {
        return Err(SondeError::Internal("empty line terminator".to_string()));
    }
    let haystack = match buf.get(offset..) {
        Some(rest) => rest,
        None => return Ok(Decode::NeedMore),
    };

    let position = haystack
        .windows(terminator.len())
        .position(|window| window == terminator);

    match position {
        Some(pos) => {
            let text = std::str::from_utf8(&haystack[..pos])
                .map_err(|_| SondeError::Parse("line is not valid UTF-8".to_string()))?
                .to_string();
            Ok(Decode::Complete {
                value: Frame::Line { text },
                consumed: pos + terminator.len(),
            })
        }
        None => Ok(Decode::NeedMore),
    }
}

/// Decodes a TLV record at `offset`: 1-byte tag, 2-byte big-endian length,
/// then the value bytes.
pub fn read_tlv(buf: &[u8], offset: usize) -> SondeResult<Decode<Frame>> {
    if buf.len() < offset + 3 {
        return Ok(Decode::NeedMore);
    }
    let (tag, next) = read_u8(buf, offset)?;
    let (length, start) = read_u16_be(buf, next)?;
    let length = length as usize;

    if buf.len() < start + length {
        return Ok(Decode::NeedMore);
    }

    Ok(Decode::Complete {
        value: Frame::Tlv {
            tag,
            value: buf[start..start + length].to_vec(),
        },
        consumed: 3 + length,
    })
}

/// Encodes a TLV record: 1-byte tag, 2-byte big-endian length, value.
pub fn write_tlv(tag: u8, value: &[u8]) -> SondeResult<Vec<u8>> {
    if value.len() > u16::MAX as usize {
        return Err(SondeError::Validation(format!(
            "TLV value of {} bytes exceeds u16 length field",
            value.len()
        )));
    }
    let mut out = Vec::with_capacity(3 + value.len());
    out.push(tag);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_integers() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(read_u8(&buf, 0).unwrap(), (0x01, 1));
        assert_eq!(read_u16_be(&buf, 1).unwrap(), (0x0203, 3));
        assert_eq!(read_u32_be(&buf, 0).unwrap(), (0x01020304, 4));
        assert_eq!(read_u16_le(&buf, 1).unwrap(), (0x0302, 3));
        assert_eq!(read_u32_le(&buf, 0).unwrap(), (0x04030201, 4));
    }

    #[test]
    fn test_write_integers() {
        let mut out = Vec::new();
        write_u16_be(&mut out, 0x0102);
        write_u32_be(&mut out, 0x03040506);
        write_u16_le(&mut out, 0x0708);
        write_u32_le(&mut out, 0x090a0b0c);
        assert_eq!(read_u16_be(&out, 0).unwrap(), (0x0102, 2));
        assert_eq!(read_u32_be(&out, 2).unwrap(), (0x03040506, 6));
        assert_eq!(read_u16_le(&out, 6).unwrap(), (0x0708, 8));
        assert_eq!(read_u32_le(&out, 8).unwrap(), (0x090a0b0c, 12));
    }

    #[test]
    fn test_read_integer_truncated() {
        let buf = [0x01];
        assert!(matches!(read_u32_be(&buf, 0), Err(SondeError::Parse(_))));
        assert!(matches!(read_u8(&buf, 5), Err(SondeError::Parse(_))));
    }

    #[test]
    fn test_length_prefixed_round_trip() {
        for width in [1usize, 2, 4] {
            let payload = b"hello frame";
            let encoded = write_length_prefixed(payload, width).unwrap();
            let decoded = read_length_prefixed(&encoded, 0, width).unwrap();
            match decoded {
                Decode::Complete { value, consumed } => {
                    assert_eq!(consumed, width + payload.len());
                    assert_eq!(
                        value,
                        Frame::LengthPrefixed {
                            payload: payload.to_vec()
                        }
                    );
                }
                Decode::NeedMore => panic!("expected complete frame for width {}", width),
            }
        }
    }

    #[test]
    fn test_length_prefixed_incomplete() {
        // Declares 10 bytes of payload, provides 3.
        let buf = [0x00, 0x0a, 0xaa, 0xbb, 0xcc];
        assert_eq!(read_length_prefixed(&buf, 0, 2).unwrap(), Decode::NeedMore);
        // Header itself truncated.
        assert_eq!(read_length_prefixed(&[0x00], 0, 4).unwrap(), Decode::NeedMore);
    }

    #[test]
    fn test_length_prefixed_oversized_declaration() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        assert!(matches!(
            read_length_prefixed(&buf, 0, 4),
            Err(SondeError::Parse(_))
        ));
    }

    #[test]
    fn test_length_prefixed_bad_width() {
        assert!(matches!(
            read_length_prefixed(&[0; 8], 0, 3),
            Err(SondeError::Internal(_))
        ));
    }

    #[test]
    fn test_read_line_crlf() {
        let buf = b"PONG\r\nrest";
        match read_line(buf, 0, b"\r\n").unwrap() {
            Decode::Complete { value, consumed } => {
                assert_eq!(
                    value,
                    Frame::Line {
                        text: "PONG".to_string()
                    }
                );
                assert_eq!(consumed, 6);
            }
            Decode::NeedMore => panic!("expected complete line"),
        }
    }

    #[test]
    fn test_read_line_unterminated() {
        assert_eq!(read_line(b"no newline", 0, b"\n").unwrap(), Decode::NeedMore);
    }

    #[test]
    fn test_read_line_invalid_utf8() {
        let buf = [0xff, 0xfe, b'\n'];
        assert!(matches!(read_line(&buf, 0, b"\n"), Err(SondeError::Parse(_))));
    }

    #[test]
    fn test_tlv_round_trip() {
        let encoded = write_tlv(0x2b, b"attribute").unwrap();
        match read_tlv(&encoded, 0).unwrap() {
            Decode::Complete { value, consumed } => {
                assert_eq!(
                    value,
                    Frame::Tlv {
                        tag: 0x2b,
                        value: b"attribute".to_vec()
                    }
                );
                assert_eq!(consumed, encoded.len());
            }
            Decode::NeedMore => panic!("expected complete TLV"),
        }
    }

    #[test]
    fn test_tlv_incomplete_value() {
        // tag + length announcing 4 bytes, only 1 present
        let buf = [0x01, 0x00, 0x04, 0xaa];
        assert_eq!(read_tlv(&buf, 0).unwrap(), Decode::NeedMore);
    }
}
