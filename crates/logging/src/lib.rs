#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `logging` owns the diagnostic plumbing shared by every deltasync crate.
//! All diagnostics are emitted through [`tracing`]; this crate decides which
//! of them are visible for a given classic rsync verbosity level and exposes
//! per-subsystem macros so call sites pick a consistent target.
//!
//! # Design
//!
//! - [`Verbosity`] models the `-v` count (0 to 4) and translates it into an
//!   [`EnvFilter`](tracing_subscriber::EnvFilter) directive.
//! - [`Subsystem`] names the tracing targets (`deltasync::proto`,
//!   `deltasync::delta`, ...) used by the `trace_*!` macros.
//! - [`init_tracing`] installs a stderr `fmt` subscriber once per process.
//!   `RUST_LOG` takes precedence over the verbosity-derived filter.
//!
//! # Examples
//!
//! ```
//! use logging::{Subsystem, Verbosity};
//!
//! let verbosity = Verbosity::from_count(2);
//! assert!(verbosity.enables(Subsystem::Generator, tracing::Level::DEBUG));
//! assert!(!Verbosity::QUIET.enables(Subsystem::Stats, tracing::Level::INFO));
//! ```

mod subscriber;
mod tracing_macros;
mod verbosity;

pub use subscriber::{filter_for, init_tracing};
pub use verbosity::{Subsystem, Verbosity};
