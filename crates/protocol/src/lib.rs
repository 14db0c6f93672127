#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Overview
//!
//! `protocol` carries everything that crosses the wire between two peers:
//!
//! - [`StreamChannel`], a duplex byte channel with independent input and
//!   output buffering, optional multiplexing of DATA and side-channel text
//!   frames, and the little-endian integer codecs used by the protocol.
//! - [`MessageCode`] and [`MessageHeader`], the 4-byte multiplex envelope.
//! - The token codec ([`send_literal`], [`send_block`], [`send_end`],
//!   [`TokenReader`]) that carries delta instructions.
//! - [`ProtocolVersion`] and the daemon greeting helpers.
//! - [`CancellationToken`], checked at every blocking channel call.
//!
//! # Examples
//!
//! ```
//! use protocol::StreamChannel;
//! use std::io::Cursor;
//!
//! let mut out = StreamChannel::new(Cursor::new(Vec::new()), Vec::new());
//! out.write_int(-7).unwrap();
//! out.write_longint(1 << 40).unwrap();
//! out.flush().unwrap();
//! let bytes = out.into_parts().1;
//!
//! let mut input = StreamChannel::new(Cursor::new(bytes), Vec::new());
//! assert_eq!(input.read_int().unwrap(), -7);
//! assert_eq!(input.read_longint().unwrap(), 1 << 40);
//! ```

mod cancel;
mod channel;
mod error;
mod greeting;
mod message;
mod token;
mod version;

pub use cancel::CancellationToken;
pub use channel::{IO_BUFFER_SIZE, MAX_LINE_LEN, MessageHandler, StreamChannel};
pub use error::ProtocolError;
pub use greeting::{GREETING_PREFIX, format_greeting, parse_greeting};
pub use message::{HEADER_LEN, MAX_PAYLOAD_LENGTH, MAX_TEXT_PAYLOAD, MPLEX_BASE, MessageCode, MessageHeader};
pub use token::{CHUNK_SIZE, ReceivedToken, TokenReader, send_block, send_end, send_literal};
pub use version::ProtocolVersion;
