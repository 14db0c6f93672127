//! Daemon greeting lines (`@RSYNCD: <version>`).

use crate::ProtocolError;

/// Prefix shared by every daemon status line.
pub const GREETING_PREFIX: &str = "@RSYNCD: ";

/// Formats the greeting sent by both sides on connect.
///
/// ```
/// use protocol::{ProtocolVersion, format_greeting};
///
/// assert_eq!(format_greeting(ProtocolVersion::DEFAULT), "@RSYNCD: 28\n");
/// ```
#[must_use]
pub fn format_greeting(version: crate::ProtocolVersion) -> String {
    format!("{GREETING_PREFIX}{version}\n")
}

/// Parses the peer's greeting and returns the advertised version.
///
/// The version is read from the two characters following the prefix and
/// must be positive. Range checking is left to the caller.
pub fn parse_greeting(line: &str) -> Result<i32, ProtocolError> {
    let malformed = || ProtocolError::Handshake("protocol startup error".to_owned());
    let digits = line
        .strip_prefix(GREETING_PREFIX)
        .and_then(|rest| rest.get(..2))
        .ok_or_else(malformed)?;
    match digits.trim().parse::<i32>() {
        Ok(version) if version > 0 => Ok(version),
        _ => Err(malformed()),
    }
}
