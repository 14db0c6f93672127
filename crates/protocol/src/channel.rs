//! Duplex buffered channel with optional multiplexing.
//!
//! Output buffering collects writes in a [`IO_BUFFER_SIZE`] buffer and
//! flushes it when full or on [`StreamChannel::flush`]. With multiplexed
//! output every flush is wrapped in a DATA frame. Multiplexed input decodes
//! frame headers on demand: DATA payloads refill the read buffer, text frames
//! are handed to the message handler (or logged) and never reach the caller.
//!
//! Every blocking read first flushes pending output so two peers waiting on
//! each other's buffered data cannot deadlock.

use std::fmt;
use std::io::{self, Read, Write};

use logging::{trace_io, trace_proto};

use crate::message::{HEADER_LEN, MAX_TEXT_PAYLOAD, MessageCode, MessageHeader};
use crate::{CancellationToken, ProtocolError};

/// Size of the output buffer; the input buffer starts at twice this.
pub const IO_BUFFER_SIZE: usize = 4096;
/// Longest text line accepted by [`StreamChannel::read_line`].
pub const MAX_LINE_LEN: usize = 4096;

const LONGINT_MARKER: u32 = 0xffff_ffff;

/// Callback receiving side-channel text frames.
pub type MessageHandler = Box<dyn FnMut(MessageCode, &[u8]) + Send>;

/// Duplex protocol channel over a reader and a writer half.
pub struct StreamChannel<R, W> {
    reader: R,
    writer: W,
    in_buf: Option<Vec<u8>>,
    in_pos: usize,
    in_remaining: usize,
    out_buf: Option<Vec<u8>>,
    multiplex_in: bool,
    multiplex_out: bool,
    total_read: u64,
    total_written: u64,
    cancel: CancellationToken,
    handler: Option<MessageHandler>,
}

impl<R, W> fmt::Debug for StreamChannel<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("buffered_in", &self.in_buf.is_some())
            .field("buffered_out", &self.out_buf.is_some())
            .field("multiplex_in", &self.multiplex_in)
            .field("multiplex_out", &self.multiplex_out)
            .field("total_read", &self.total_read)
            .field("total_written", &self.total_written)
            .finish_non_exhaustive()
    }
}

impl<R: Read, W: Write> StreamChannel<R, W> {
    /// Creates an unbuffered, unmultiplexed channel.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            in_buf: None,
            in_pos: 0,
            in_remaining: 0,
            out_buf: None,
            multiplex_in: false,
            multiplex_out: false,
            total_read: 0,
            total_written: 0,
            cancel: CancellationToken::new(),
            handler: None,
        }
    }

    /// Attaches a cancellation token observed by every blocking call.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token observed by this channel.
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Routes incoming text frames to `handler` instead of the log.
    pub fn set_message_handler<F>(&mut self, handler: F)
    where
        F: FnMut(MessageCode, &[u8]) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    /// Restores logging of incoming text frames.
    pub fn clear_message_handler(&mut self) {
        self.handler = None;
    }

    /// Enables input buffering.
    pub fn start_buffering_in(&mut self) {
        if self.in_buf.is_none() {
            self.in_buf = Some(vec![0; 2 * IO_BUFFER_SIZE]);
            self.in_pos = 0;
            self.in_remaining = 0;
        }
    }

    /// Enables output buffering.
    pub fn start_buffering_out(&mut self) {
        if self.out_buf.is_none() {
            self.out_buf = Some(Vec::with_capacity(IO_BUFFER_SIZE));
        }
    }

    /// Flushes and, unless output is multiplexed, drops the buffers. Input
    /// that is already buffered stays readable.
    pub fn end_buffering(&mut self) -> Result<(), ProtocolError> {
        self.flush()?;
        if !self.multiplex_out {
            self.out_buf = None;
            if self.in_remaining == 0 {
                self.in_buf = None;
            }
        }
        Ok(())
    }

    /// Starts decoding multiplex frames on input.
    pub fn start_multiplex_in(&mut self) -> Result<(), ProtocolError> {
        self.flush()?;
        self.start_buffering_in();
        self.multiplex_in = true;
        trace_proto!("multiplexing input");
        Ok(())
    }

    /// Stops decoding multiplex frames on input.
    pub fn stop_multiplex_in(&mut self) {
        self.multiplex_in = false;
    }

    /// Starts framing output as multiplexed DATA.
    pub fn start_multiplex_out(&mut self) -> Result<(), ProtocolError> {
        self.flush()?;
        self.start_buffering_out();
        self.multiplex_out = true;
        trace_proto!("multiplexing output");
        Ok(())
    }

    /// Flushes framed output and stops multiplexing it.
    pub fn stop_multiplex_out(&mut self) -> Result<(), ProtocolError> {
        self.flush()?;
        self.multiplex_out = false;
        Ok(())
    }

    /// Whether input is multiplexed.
    pub const fn is_multiplexing_in(&self) -> bool {
        self.multiplex_in
    }

    /// Whether output is multiplexed.
    pub const fn is_multiplexing_out(&self) -> bool {
        self.multiplex_out
    }

    /// Payload bytes read so far.
    pub const fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Payload bytes written so far.
    pub const fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Borrow of the writer half.
    pub const fn get_writer(&self) -> &W {
        &self.writer
    }

    /// Consumes the channel. Buffered output that was not flushed is lost.
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    fn check_cancel(&self) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::Cancelled);
        }
        Ok(())
    }

    fn io_error(&self, error: io::Error) -> ProtocolError {
        if self.cancel.is_cancelled() {
            ProtocolError::Cancelled
        } else {
            ProtocolError::Io(error)
        }
    }

    // ---------------------------------------------------------------- output

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.check_cancel()?;
        let Some(mut buf) = self.out_buf.take() else {
            self.writer.write_all(data).map_err(|e| self.io_error(e))?;
            self.total_written += data.len() as u64;
            return Ok(());
        };

        let mut rest = data;
        while !rest.is_empty() {
            let n = rest.len().min(IO_BUFFER_SIZE - buf.len());
            buf.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            if buf.len() == IO_BUFFER_SIZE {
                let emitted = self.emit(&buf);
                buf.clear();
                if let Err(error) = emitted {
                    self.out_buf = Some(buf);
                    return Err(error);
                }
            }
        }
        self.out_buf = Some(buf);
        self.total_written += data.len() as u64;
        Ok(())
    }

    fn emit(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        trace_io!("emit {} bytes (multiplexed={})", data.len(), self.multiplex_out);
        let result = if self.multiplex_out {
            let header = MessageHeader::new(MessageCode::Data, data.len() as u32)
                .ok_or(ProtocolError::MultiplexOverflow {
                    code: MessageCode::Data.as_u8(),
                    len: data.len() as u32,
                })?
                .encode();
            self.writer
                .write_all(&header)
                .and_then(|()| self.writer.write_all(data))
        } else {
            self.writer.write_all(data)
        };
        result
            .and_then(|()| self.writer.flush())
            .map_err(|e| self.io_error(e))
    }

    /// Writes any buffered output.
    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        self.check_cancel()?;
        if let Some(mut buf) = self.out_buf.take() {
            let emitted = if buf.is_empty() {
                Ok(())
            } else {
                self.emit(&buf)
            };
            buf.clear();
            self.out_buf = Some(buf);
            return emitted;
        }
        self.writer.flush().map_err(|e| self.io_error(e))
    }

    /// Sends a side-channel message.
    ///
    /// Pending DATA is flushed first so ordering is preserved. Text longer
    /// than the receiver accepts is truncated. Without multiplexed output the
    /// message is only logged locally.
    pub fn send_message(&mut self, code: MessageCode, payload: &[u8]) -> Result<(), ProtocolError> {
        if !self.multiplex_out {
            log_text(code, payload);
            return Ok(());
        }
        self.flush()?;
        let limit = if code.is_text() {
            MAX_TEXT_PAYLOAD as usize - 1
        } else {
            payload.len()
        };
        let payload = &payload[..payload.len().min(limit)];
        let header = MessageHeader::new(code, payload.len() as u32)
            .ok_or(ProtocolError::MultiplexOverflow {
                code: code.as_u8(),
                len: u32::MAX,
            })?
            .encode();
        self.writer
            .write_all(&header)
            .and_then(|()| self.writer.write_all(payload))
            .and_then(|()| self.writer.flush())
            .map_err(|e| self.io_error(e))
    }

    /// Writes a little-endian `i32`.
    pub fn write_int(&mut self, value: i32) -> Result<(), ProtocolError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian `u32`.
    pub fn write_uint(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes one byte.
    pub fn write_byte(&mut self, value: u8) -> Result<(), ProtocolError> {
        self.write_bytes(&[value])
    }

    /// Writes a 64-bit value: a plain `i32` when it fits in 31 bits,
    /// otherwise an all-ones marker followed by 8 little-endian bytes.
    pub fn write_longint(&mut self, value: i64) -> Result<(), ProtocolError> {
        if value <= 0x7fff_ffff {
            return self.write_int(value as i32);
        }
        self.write_uint(LONGINT_MARKER)?;
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes text without a terminator.
    pub fn write_str(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.write_bytes(text.as_bytes())
    }

    // ----------------------------------------------------------------- input

    fn read_loop(&mut self, out: &mut [u8]) -> Result<(), ProtocolError> {
        let mut filled = 0;
        while filled < out.len() {
            self.flush()?;
            match self.reader.read(&mut out[filled..]) {
                Ok(0) => return Err(self.eof()),
                Ok(n) => filled += n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(self.io_error(error)),
            }
        }
        Ok(())
    }

    fn eof(&self) -> ProtocolError {
        if self.cancel.is_cancelled() {
            ProtocolError::Cancelled
        } else {
            ProtocolError::UnexpectedEof
        }
    }

    fn read_raw(&mut self, out: &mut [u8]) -> Result<usize, ProtocolError> {
        loop {
            match self.reader.read(out) {
                Ok(0) => return Err(self.eof()),
                Ok(n) => return Ok(n),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(self.io_error(error)),
            }
        }
    }

    fn read_unbuffered(&mut self, out: &mut [u8]) -> Result<usize, ProtocolError> {
        let Some(mut buf) = self.in_buf.take() else {
            self.flush()?;
            return self.read_raw(out);
        };
        let result = self.read_buffered(&mut buf, out);
        self.in_buf = Some(buf);
        let n = result?;
        if self.in_remaining == 0 {
            self.flush()?;
        }
        Ok(n)
    }

    fn read_buffered(&mut self, buf: &mut Vec<u8>, out: &mut [u8]) -> Result<usize, ProtocolError> {
        if !self.multiplex_in && self.in_remaining == 0 {
            self.flush()?;
            self.in_remaining = self.read_raw(buf)?;
            self.in_pos = 0;
        }

        loop {
            if self.in_remaining != 0 {
                let n = out.len().min(self.in_remaining);
                out[..n].copy_from_slice(&buf[self.in_pos..self.in_pos + n]);
                self.in_pos += n;
                self.in_remaining -= n;
                return Ok(n);
            }

            let mut raw = [0u8; HEADER_LEN];
            self.read_loop(&mut raw)?;
            let header = MessageHeader::decode(raw)?;
            let len = header.payload_len() as usize;

            match header.code() {
                MessageCode::Data => {
                    if len > buf.len() {
                        buf.resize(len, 0);
                    }
                    self.read_loop(&mut buf[..len])?;
                    self.in_pos = 0;
                    self.in_remaining = len;
                }
                code if code.is_text() => {
                    if header.payload_len() >= MAX_TEXT_PAYLOAD {
                        return Err(ProtocolError::MultiplexOverflow {
                            code: code.as_u8(),
                            len: header.payload_len(),
                        });
                    }
                    let mut text = vec![0u8; len];
                    self.read_loop(&mut text)?;
                    self.dispatch(code, &text);
                }
                code => return Err(ProtocolError::UnknownMessage { code: code.as_u8() }),
            }
        }
    }

    fn dispatch(&mut self, code: MessageCode, text: &[u8]) {
        match self.handler.as_mut() {
            Some(handler) => handler(code, text),
            None => log_text(code, text),
        }
    }

    /// Fills `out` completely.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<(), ProtocolError> {
        self.check_cancel()?;
        let mut total = 0;
        while total < out.len() {
            total += self.read_unbuffered(&mut out[total..])?;
        }
        self.total_read += out.len() as u64;
        Ok(())
    }

    /// Reads exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut data = vec![0u8; len];
        self.read_exact(&mut data)?;
        Ok(data)
    }

    /// Reads a little-endian `i32`.
    pub fn read_int(&mut self) -> Result<i32, ProtocolError> {
        let mut raw = [0u8; 4];
        self.read_exact(&mut raw)?;
        Ok(i32::from_le_bytes(raw))
    }

    /// Reads a little-endian `u32`.
    pub fn read_uint(&mut self) -> Result<u32, ProtocolError> {
        let mut raw = [0u8; 4];
        self.read_exact(&mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Reads one byte.
    pub fn read_byte(&mut self) -> Result<u8, ProtocolError> {
        let mut raw = [0u8; 1];
        self.read_exact(&mut raw)?;
        Ok(raw[0])
    }

    /// Reads a value written by [`write_longint`](Self::write_longint).
    pub fn read_longint(&mut self) -> Result<i64, ProtocolError> {
        let value = self.read_int()?;
        if value as u32 != LONGINT_MARKER {
            return Ok(i64::from(value));
        }
        let mut raw = [0u8; 8];
        self.read_exact(&mut raw)?;
        Ok(i64::from_le_bytes(raw))
    }

    /// Reads a `\n`-terminated line. Carriage returns are dropped and the
    /// trailing `\n` is kept.
    pub fn read_line(&mut self) -> Result<String, ProtocolError> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte != b'\r' {
                line.push(byte);
            }
            if byte == b'\n' {
                break;
            }
            if line.len() > MAX_LINE_LEN {
                return Err(ProtocolError::LineTooLong(MAX_LINE_LEN));
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

fn log_text(code: MessageCode, payload: &[u8]) {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim_end();
    match code {
        MessageCode::Error => tracing::warn!(target: "deltasync::proto", "remote: {text}"),
        _ => tracing::info!(target: "deltasync::proto", "remote: {text}"),
    }
}
