#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Overview
//!
//! `transfer` runs a delta-transfer session on top of a
//! [`protocol::StreamChannel`]. It owns everything between the handshake and
//! the goodbye:
//!
//! - [`Options`] and [`ServerInvocation`], the per-session configuration and
//!   its argument-vector form.
//! - [`setup_protocol`] and [`Session`], the negotiated version and seed.
//! - The file list ([`build_file_list`], [`send_file_list`],
//!   [`recv_file_list`]) and the opaque exclude list.
//! - The three roles: [`generate_files`] requests files and describes the
//!   basis, [`send_files`] answers with deltas, [`receive_files`] rebuilds
//!   the files.
//! - The end-to-end flows ([`serve_sender`], [`serve_receiver`],
//!   [`client_send`], [`client_receive`]) and the TCP [`client`].
//!
//! # Roles
//!
//! The receiving side runs the generator to completion and then the
//! receiver, on one thread. The sending side runs the sender. Each role
//! loops over file indices; a `-1` moves to the next phase and the one
//! received in the last phase ends the loop.
//!
//! # Errors
//!
//! [`TransferError`] separates fatal errors, which end the session, from
//! skipped files, which are logged. A received file whose digest does not
//! match is neither: the old file is kept and the path is reported in
//! [`Received::mismatched`].
//!
//! # Examples
//!
//! ```
//! use transfer::{Options, ServerInvocation};
//!
//! let options = Options::new().with_recurse(true).with_always_checksum(true);
//! let args = options.server_args(true, &["docs".to_owned()]);
//! let parsed = ServerInvocation::parse(&args, &Options::new());
//! assert!(parsed.sender);
//! assert!(parsed.options.recurse());
//! assert_eq!(parsed.paths, ["docs"]);
//! ```

pub mod client;
mod error;
mod exclude;
mod flist;
mod generator;
mod options;
mod receiver;
mod sender;
mod session;
mod stats;

pub use client::{ClientError, ModuleListing, RemoteUrl, list_modules, pull, push};
pub use error::{FatalError, SkippedFile, TransferError, categorize_io_error};
pub use exclude::{recv_exclude_list, send_exclude_list};
pub use flist::{
    FileEntry, FileList, FileListReader, FileListWriter, S_IFDIR, S_IFMT, S_IFREG, build_file_list,
    recv_file_list, sanitize_path, send_file_list,
};
pub use generator::generate_files;
pub use options::{Options, ServerInvocation};
pub use receiver::receive_files;
pub use sender::send_files;
pub use session::{
    Received, Session, Side, client_receive, client_send, read_goodbye, read_report, serve_receiver,
    serve_sender, setup_protocol, write_goodbye, write_report,
};
pub use stats::Stats;
