//! Delta token codec.
//!
//! A positive `i32` announces that many literal bytes follow (at most
//! [`CHUNK_SIZE`] per announcement). A negative value `-(index + 1)` reuses
//! block `index` of the basis file. Zero ends the token stream of a file.

use std::io::{Read, Write};

use logging::trace_delta;

use crate::{ProtocolError, StreamChannel};

/// Largest literal run announced by a single length prefix.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Writes `data` as one or more length-prefixed literal chunks.
pub fn send_literal<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    data: &[u8],
) -> Result<(), ProtocolError> {
    for chunk in data.chunks(CHUNK_SIZE) {
        channel.write_int(chunk.len() as i32)?;
        channel.write_bytes(chunk)?;
    }
    Ok(())
}

/// Writes a reference to basis block `index`.
pub fn send_block<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    index: u32,
) -> Result<(), ProtocolError> {
    channel.write_int(-(index as i32) - 1)
}

/// Writes the end-of-file token.
pub fn send_end<R: Read, W: Write>(channel: &mut StreamChannel<R, W>) -> Result<(), ProtocolError> {
    channel.write_int(0)
}

/// One decoded token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReceivedToken {
    /// Literal bytes, at most [`CHUNK_SIZE`] of them.
    Literal(Vec<u8>),
    /// Reuse of basis block `index`.
    Block(u32),
    /// No more tokens for this file.
    End,
}

/// Decoder that remembers how much of the current literal run is unread.
///
/// ```
/// use protocol::{ReceivedToken, StreamChannel, TokenReader, send_end, send_literal};
/// use std::io::Cursor;
///
/// let mut out = StreamChannel::new(Cursor::new(Vec::new()), Vec::new());
/// send_literal(&mut out, b"abc").unwrap();
/// send_end(&mut out).unwrap();
///
/// let mut input = StreamChannel::new(Cursor::new(out.into_parts().1), Vec::new());
/// let mut tokens = TokenReader::new();
/// assert_eq!(tokens.next(&mut input).unwrap(), ReceivedToken::Literal(b"abc".to_vec()));
/// assert_eq!(tokens.next(&mut input).unwrap(), ReceivedToken::End);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TokenReader {
    residue: usize,
}

impl TokenReader {
    /// Creates a decoder with no pending literal bytes.
    #[must_use]
    pub const fn new() -> Self {
        Self { residue: 0 }
    }

    /// Literal bytes announced but not yet returned.
    #[must_use]
    pub const fn residue(&self) -> usize {
        self.residue
    }

    /// Decodes the next token.
    pub fn next<R: Read, W: Write>(
        &mut self,
        channel: &mut StreamChannel<R, W>,
    ) -> Result<ReceivedToken, ProtocolError> {
        if self.residue == 0 {
            let value = channel.read_int()?;
            if value == 0 {
                return Ok(ReceivedToken::End);
            }
            if value < 0 {
                return Ok(ReceivedToken::Block((-(value + 1)) as u32));
            }
            self.residue = value as usize;
        }

        let n = self.residue.min(CHUNK_SIZE);
        self.residue -= n;
        trace_delta!(trace: "literal chunk of {n} bytes, {} pending", self.residue);
        channel.read_bytes(n).map(ReceivedToken::Literal)
    }
}
