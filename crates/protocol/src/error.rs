//! Errors raised by the channel and wire codecs.

use std::io;

use thiserror::Error;

/// Failures surfaced by [`StreamChannel`](crate::StreamChannel) and the
/// codecs layered on it.
///
/// All variants except [`Io`](Self::Io) and [`Cancelled`](Self::Cancelled)
/// mean the peers are out of sync; the session cannot continue.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying transport failed.
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The session's cancellation token was triggered.
    #[error("operation cancelled")]
    Cancelled,
    /// A side-channel text frame was too large to buffer.
    #[error("multiplexing overflow {code}:{len}")]
    MultiplexOverflow {
        /// Message code of the offending frame.
        code: u8,
        /// Declared payload length.
        len: u32,
    },
    /// A frame carried a message code this channel does not accept.
    #[error("read unknown message {code} from stream")]
    UnknownMessage {
        /// Message code after removing the multiplex base.
        code: u8,
    },
    /// A frame tag was below the multiplex base.
    #[error("invalid multiplex tag byte {tag}")]
    InvalidMessageTag {
        /// Raw tag byte.
        tag: u8,
    },
    /// The peer closed the connection mid-message.
    #[error("unexpected end of stream")]
    UnexpectedEof,
    /// Daemon greeting or module selection failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The peer speaks a protocol version outside the supported range.
    #[error("protocol version {0} is not supported")]
    UnsupportedVersion(i32),
    /// A signature header declared an impossible strong checksum length.
    #[error("invalid checksum length {0}")]
    InvalidChecksumLength(i32),
    /// A file index was outside the file list.
    #[error("invalid file index {index} (count={count})")]
    InvalidFileIndex {
        /// Received index.
        index: i32,
        /// Number of entries in the file list.
        count: usize,
    },
    /// A text line exceeded [`MAX_LINE_LEN`](crate::MAX_LINE_LEN).
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
    /// The peer reported an error.
    #[error("remote error: {0}")]
    Remote(String),
}

impl ProtocolError {
    /// Returns `true` for [`Cancelled`](Self::Cancelled).
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
