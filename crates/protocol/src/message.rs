//! Multiplex envelope: message codes and the 4-byte frame header.
//!
//! A header is one little-endian `u32`: the high byte is
//! `MPLEX_BASE + code`, the low 24 bits are the payload length.

use crate::ProtocolError;

/// Offset added to every message code in the tag byte.
pub const MPLEX_BASE: u8 = 7;
/// Size of an encoded header.
pub const HEADER_LEN: usize = 4;
/// Largest payload representable in 24 bits.
pub const MAX_PAYLOAD_LENGTH: u32 = 0x00ff_ffff;
/// Side-channel text frames must be strictly shorter than this.
pub const MAX_TEXT_PAYLOAD: u32 = 1024;

/// Kinds of multiplexed message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MessageCode {
    #[doc(alias = "MSG_DATA")]
    /// Raw stream data.
    Data = 0,
    #[doc(alias = "MSG_ERROR")]
    /// Remote error text.
    Error = 1,
    #[doc(alias = "MSG_INFO")]
    /// Remote informational text.
    Info = 2,
    #[doc(alias = "MSG_LOG")]
    /// Remote log text.
    Log = 3,
    #[doc(alias = "MSG_REDO")]
    /// Request to reprocess a file-list index.
    Redo = 4,
    #[doc(alias = "MSG_DONE")]
    /// Current phase is done.
    Done = 5,
}

impl MessageCode {
    /// Every code in numeric order.
    pub const ALL: [Self; 6] = [
        Self::Data,
        Self::Error,
        Self::Info,
        Self::Log,
        Self::Redo,
        Self::Done,
    ];

    /// Numeric value without the multiplex base.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a numeric code.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::Error),
            2 => Some(Self::Info),
            3 => Some(Self::Log),
            4 => Some(Self::Redo),
            5 => Some(Self::Done),
            _ => None,
        }
    }

    /// Whether frames of this kind carry side-channel text.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::Error | Self::Info | Self::Log)
    }
}

/// Decoded frame header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    code: MessageCode,
    payload_len: u32,
}

impl MessageHeader {
    /// Creates a header. Lengths above 24 bits are rejected.
    pub const fn new(code: MessageCode, payload_len: u32) -> Option<Self> {
        if payload_len > MAX_PAYLOAD_LENGTH {
            return None;
        }
        Some(Self { code, payload_len })
    }

    /// Decodes a raw header.
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let raw = u32::from_le_bytes(bytes);
        let tag = (raw >> 24) as u8;
        if tag < MPLEX_BASE {
            return Err(ProtocolError::InvalidMessageTag { tag });
        }
        let code = tag - MPLEX_BASE;
        MessageCode::from_u8(code)
            .map(|code| Self {
                code,
                payload_len: raw & MAX_PAYLOAD_LENGTH,
            })
            .ok_or(ProtocolError::UnknownMessage { code })
    }

    /// Encodes the header for the wire.
    #[must_use]
    pub const fn encode(self) -> [u8; HEADER_LEN] {
        let tag = (MPLEX_BASE as u32) + (self.code as u32);
        ((tag << 24) | self.payload_len).to_le_bytes()
    }

    /// Message code.
    #[must_use]
    pub const fn code(self) -> MessageCode {
        self.code
    }

    /// Payload length in bytes.
    #[must_use]
    pub const fn payload_len(self) -> u32 {
        self.payload_len
    }
}
