//! SSH protocol version exchange (RFC 4253 Section 4.2).
//!
//! The connection opens with both sides sending an identification line:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! Servers may send arbitrary banner lines before the identification line;
//! the reader skips them. Only protocol versions "2.0" and "1.99" are
//! accepted.
//!
//! # Security
//!
//! - Maximum line length: 255 bytes (DoS prevention)
//! - No null bytes allowed in the version line
//!
//! # Example
//!
//! ```rust
//! use sonde_proto::ssh::version::Version;
//!
//! let version = Version::parse("SSH-2.0-OpenSSH_8.9\r\n").unwrap();
//! assert_eq!(version.software(), "OpenSSH_8.9");
//! ```

use sonde_platform::{SondeError, SondeResult};

/// Maximum length of an SSH version line (RFC 4253 Section 4.2).
pub const MAX_VERSION_LENGTH: usize = 255;

/// Maximum banner lines tolerated before the identification line.
pub const MAX_BANNER_LINES: usize = 64;

/// SSH identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Protocol version ("2.0" or "1.99").
    proto_version: String,
    /// Software version (e.g. "OpenSSH_8.9").
    software_version: String,
    /// Optional comments after the first space.
    comments: Option<String>,
}

impl Version {
    /// Creates a protocol-2.0 version string.
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments.map(String::from),
        }
    }

    /// The identification this client sends.
    pub fn default_client() -> Self {
        Self::new(&format!("Sonde_{}", env!("CARGO_PKG_VERSION")), None)
    }

    /// Parses an SSH identification line (with or without CR LF).
    ///
    /// # Errors
    ///
    /// Returns [`SondeError::Parse`] when the line is longer than 255 bytes,
    /// contains null bytes, does not start with `SSH-`, or names a protocol
    /// version other than "2.0" / "1.99".
    pub fn parse(line: &str) -> SondeResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.len() > MAX_VERSION_LENGTH {
            return Err(SondeError::Parse(format!(
                "version line too long: {} bytes",
                line.len()
            )));
        }
        if line.contains('\0') {
            return Err(SondeError::Parse(
                "version line contains null byte".to_string(),
            ));
        }

        let rest = line.strip_prefix("SSH-").ok_or_else(|| {
            SondeError::Parse(format!("version line does not start with SSH-: {:?}", line))
        })?;

        let (proto, software_and_comments) = rest.split_once('-').ok_or_else(|| {
            SondeError::Parse("version line missing software version".to_string())
        })?;

        if proto != "2.0" && proto != "1.99" {
            return Err(SondeError::Parse(format!(
                "unsupported protocol version {}",
                proto
            )));
        }

        let (software, comments) = match software_and_comments.split_once(' ') {
            Some((software, comments)) => (software, Some(comments.to_string())),
            None => (software_and_comments, None),
        };

        if software.is_empty() {
            return Err(SondeError::Parse("empty software version".to_string()));
        }

        Ok(Self {
            proto_version: proto.to_string(),
            software_version: software.to_string(),
            comments,
        })
    }

    /// Protocol version string.
    pub fn protocol(&self) -> &str {
        &self.proto_version
    }

    /// Software version string.
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// The identification line without the trailing CR LF.
    ///
    /// This exact form (no terminator) participates in the exchange hash.
    pub fn to_line(&self) -> String {
        match &self.comments {
            Some(comments) => format!(
                "SSH-{}-{} {}",
                self.proto_version, self.software_version, comments
            ),
            None => format!("SSH-{}-{}", self.proto_version, self.software_version),
        }
    }

    /// The bytes sent on the wire, CR LF included.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut line = self.to_line().into_bytes();
        line.extend_from_slice(b"\r\n");
        line
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openssh() {
        let version = Version::parse("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.1\r\n").unwrap();
        assert_eq!(version.protocol(), "2.0");
        assert_eq!(version.software(), "OpenSSH_8.9p1");
    }

    #[test]
    fn test_parse_legacy_199() {
        let version = Version::parse("SSH-1.99-OldServer_1.0").unwrap();
        assert_eq!(version.protocol(), "1.99");
    }

    #[test]
    fn test_parse_rejects_ssh1() {
        assert!(matches!(
            Version::parse("SSH-1.5-Ancient"),
            Err(SondeError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_ssh() {
        assert!(Version::parse("HTTP/1.1 400 Bad Request").is_err());
    }

    #[test]
    fn test_parse_rejects_overlong() {
        let line = format!("SSH-2.0-{}", "x".repeat(300));
        assert!(Version::parse(&line).is_err());
    }

    #[test]
    fn test_parse_rejects_null_byte() {
        assert!(Version::parse("SSH-2.0-Bad\0Server").is_err());
    }

    #[test]
    fn test_wire_form_has_crlf() {
        let version = Version::new("Sonde_0.1.0", None);
        assert_eq!(version.to_wire(), b"SSH-2.0-Sonde_0.1.0\r\n");
        assert_eq!(version.to_line(), "SSH-2.0-Sonde_0.1.0");
    }

    #[test]
    fn test_round_trip_with_comments() {
        let version = Version::new("Sonde_0.1.0", Some("probe"));
        let parsed = Version::parse(&version.to_line()).unwrap();
        assert_eq!(parsed, version);
    }
}
