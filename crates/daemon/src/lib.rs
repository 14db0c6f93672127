#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Overview
//!
//! `daemon` serves directory trees ("modules") to delta-transfer clients
//! over TCP. A client greets with `@RSYNCD: <version>`, names a module (or
//! asks for `#list`), sends its argument lines and then runs a normal
//! session against the daemon's sender or receiver role.
//!
//! # Design
//!
//! - [`DaemonConfig`] holds the listen address, offered protocol version,
//!   optional I/O timeout and the [`Module`] table.
//! - [`Daemon::bind`] opens the listener; [`Daemon::serve`] runs the accept
//!   loop with one thread per connection.
//! - [`ConnectionRegistry`] tracks live connections behind a mutex and keeps
//!   a socket clone for each so [`ShutdownHandle::shutdown`] can unblock
//!   workers.
//! - Refusals before the session starts are `@ERROR:` lines; later failures
//!   reach the client as multiplexed error frames.
//!
//! # Examples
//!
//! ```no_run
//! use daemon::{Daemon, DaemonConfig, Module};
//!
//! # fn main() -> Result<(), daemon::DaemonError> {
//! let config = DaemonConfig::builder()
//!     .port(8730)
//!     .module("docs=/srv/docs:Documentation".parse::<Module>()?)
//!     .build()?;
//! let daemon = Daemon::bind(config)?;
//! let shutdown = daemon.shutdown_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     shutdown.shutdown();
//! });
//! daemon.serve()
//! # }
//! ```

mod config;
mod error;
mod handshake;
mod registry;
mod runtime;
mod worker;

pub use config::{DEFAULT_PORT, DaemonConfig, DaemonConfigBuilder, Module};
pub use error::DaemonError;
pub use handshake::{MAX_ARGS, ModuleRequest, negotiate};
pub use registry::{ConnectionId, ConnectionInfo, ConnectionRegistry, ConnectionSummary, Registration};
pub use runtime::{Daemon, ShutdownHandle};
