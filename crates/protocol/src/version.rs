//! Protocol version numbers and the feature gates keyed on them.

use std::fmt;

use crate::ProtocolError;

/// A protocol version inside the supported range.
///
/// ```
/// use protocol::ProtocolVersion;
///
/// let local = ProtocolVersion::DEFAULT;
/// let remote = ProtocolVersion::try_from(31).unwrap();
/// assert_eq!(local.negotiate(remote), local);
/// assert!(local.sends_sum_length());
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "i32", into = "i32"))]
pub struct ProtocolVersion(u8);

impl ProtocolVersion {
    /// Oldest version accepted from a peer.
    pub const MIN: Self = Self(20);
    /// Newest version accepted from a peer.
    pub const MAX: Self = Self(40);
    /// Version spoken by this implementation.
    pub const DEFAULT: Self = Self(28);

    /// Wraps a raw number, rejecting values outside [`MIN`](Self::MIN)..=[`MAX`](Self::MAX).
    pub fn new(value: u8) -> Result<Self, ProtocolError> {
        if value < Self::MIN.0 || value > Self::MAX.0 {
            return Err(ProtocolError::UnsupportedVersion(i32::from(value)));
        }
        Ok(Self(value))
    }

    /// Raw number.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// The version both peers can speak.
    #[must_use]
    pub fn negotiate(self, remote: Self) -> Self {
        self.min(remote)
    }

    /// Whole-file and file-list digests are 2 bytes before protocol 21.
    #[must_use]
    pub const fn file_digest_len(self) -> usize {
        if self.0 < 21 { 2 } else { 16 }
    }

    /// The server multiplexes its output from protocol 23.
    #[must_use]
    pub const fn multiplexes_output(self) -> bool {
        self.0 >= 23
    }

    /// Sessions end with a goodbye integer from protocol 24.
    #[must_use]
    pub const fn sends_goodbye(self) -> bool {
        self.0 >= 24
    }

    /// Signature headers carry the strong length from protocol 27.
    #[must_use]
    pub const fn sends_sum_length(self) -> bool {
        self.0 >= 27
    }

    /// File-list entries with no other flag use `TOP_DIR` from protocol 28.
    #[must_use]
    pub const fn uses_top_dir_filler(self) -> bool {
        self.0 >= 28
    }

    /// The generator ends with a third done marker from protocol 29.
    #[must_use]
    pub const fn sends_final_done(self) -> bool {
        self.0 >= 29
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i32> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| ProtocolError::UnsupportedVersion(value))
            .and_then(Self::new)
    }
}

impl From<ProtocolVersion> for i32 {
    fn from(version: ProtocolVersion) -> Self {
        Self::from(version.0)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
