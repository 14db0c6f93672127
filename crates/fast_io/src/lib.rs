//! Windowed I/O primitives for delta transfer.
//!
//! [`MapWindow`] gives random access to a large seekable source through a
//! bounded, lazily refilled buffer. Signature generation, block matching and
//! delta reconstruction all read files through it so no file is ever loaded
//! whole.
//!
//! # Example
//!
//! ```
//! use fast_io::MapWindow;
//! use std::io::Cursor;
//!
//! let data: Vec<u8> = (0..=255).collect();
//! let mut map = MapWindow::new(Cursor::new(data), 256, 64, 16);
//! assert_eq!(map.map(250, 16).unwrap(), &[250, 251, 252, 253, 254, 255]);
//! ```

#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

pub mod map_window;

pub use map_window::{MAX_MAP_SIZE, MapError, MapWindow};
