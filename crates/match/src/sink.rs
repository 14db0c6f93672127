use std::io::{Read, Write};

use protocol::{ProtocolError, StreamChannel, send_block, send_end, send_literal};

/// Receiver of matcher output, in scan order.
///
/// A file produces any mix of [`literal`](Self::literal) and
/// [`block`](Self::block) calls, then one [`end`](Self::end), then one
/// [`file_digest`](Self::file_digest).
pub trait TokenSink {
    /// Literal bytes, at most one token chunk at a time.
    fn literal(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Reuse of basis block `index`.
    fn block(&mut self, index: u32) -> Result<(), ProtocolError>;

    /// No more tokens for this file.
    fn end(&mut self) -> Result<(), ProtocolError>;

    /// Whole-file digest of the new file.
    fn file_digest(&mut self, digest: &[u8]) -> Result<(), ProtocolError>;
}

impl<R: Read, W: Write> TokenSink for StreamChannel<R, W> {
    fn literal(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        send_literal(self, data)
    }

    fn block(&mut self, index: u32) -> Result<(), ProtocolError> {
        send_block(self, index)
    }

    fn end(&mut self) -> Result<(), ProtocolError> {
        send_end(self)
    }

    fn file_digest(&mut self, digest: &[u8]) -> Result<(), ProtocolError> {
        self.write_bytes(digest)
    }
}
