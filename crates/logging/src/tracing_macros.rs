//! crates/logging/src/tracing_macros.rs
//! Convenience macros for subsystem-scoped tracing.
//!
//! Each macro forwards to the matching `tracing` macro with the subsystem's
//! target (see [`Subsystem::target`](crate::Subsystem::target)). A leading
//! `trace:` switches the event to `TRACE` level for per-chunk chatter.

/// Emit a protocol negotiation trace.
///
/// # Example
/// ```ignore
/// trace_proto!("negotiated protocol version {}", version);
/// ```
#[macro_export]
macro_rules! trace_proto {
    (trace: $($arg:tt)*) => {
        ::tracing::trace!(target: "deltasync::proto", $($arg)*)
    };
    ($($arg:tt)*) => {
        ::tracing::debug!(target: "deltasync::proto", $($arg)*)
    };
}

/// Emit a channel I/O trace.
///
/// # Example
/// ```ignore
/// trace_io!("read {} bytes", count);
/// ```
#[macro_export]
macro_rules! trace_io {
    ($($arg:tt)*) => {
        ::tracing::trace!(target: "deltasync::io", $($arg)*)
    };
}

/// Emit a signature or matching trace.
///
/// # Example
/// ```ignore
/// trace_delta!("count={} rem={}", count, remainder);
/// ```
#[macro_export]
macro_rules! trace_delta {
    (trace: $($arg:tt)*) => {
        ::tracing::trace!(target: "deltasync::delta", $($arg)*)
    };
    ($($arg:tt)*) => {
        ::tracing::debug!(target: "deltasync::delta", $($arg)*)
    };
}

/// Emit a sender role trace.
///
/// # Example
/// ```ignore
/// trace_send!("sending file {}", name);
/// ```
#[macro_export]
macro_rules! trace_send {
    (trace: $($arg:tt)*) => {
        ::tracing::trace!(target: "deltasync::sender", $($arg)*)
    };
    ($($arg:tt)*) => {
        ::tracing::debug!(target: "deltasync::sender", $($arg)*)
    };
}

/// Emit a receiver role trace.
///
/// # Example
/// ```ignore
/// trace_recv!("chunk[{}] at {}", index, offset);
/// ```
#[macro_export]
macro_rules! trace_recv {
    (trace: $($arg:tt)*) => {
        ::tracing::trace!(target: "deltasync::receiver", $($arg)*)
    };
    ($($arg:tt)*) => {
        ::tracing::debug!(target: "deltasync::receiver", $($arg)*)
    };
}

/// Emit a generator role trace.
///
/// # Example
/// ```ignore
/// trace_genr!("generating sums for {}", index);
/// ```
#[macro_export]
macro_rules! trace_genr {
    (trace: $($arg:tt)*) => {
        ::tracing::trace!(target: "deltasync::generator", $($arg)*)
    };
    ($($arg:tt)*) => {
        ::tracing::debug!(target: "deltasync::generator", $($arg)*)
    };
}

/// Emit a file list trace.
///
/// # Example
/// ```ignore
/// trace_flist!("received {} names", count);
/// ```
#[macro_export]
macro_rules! trace_flist {
    ($($arg:tt)*) => {
        ::tracing::debug!(target: "deltasync::flist", $($arg)*)
    };
}

/// Emit a statistics trace.
///
/// # Example
/// ```ignore
/// trace_stats!("literal data: {}", bytes);
/// ```
#[macro_export]
macro_rules! trace_stats {
    ($($arg:tt)*) => {
        ::tracing::info!(target: "deltasync::stats", $($arg)*)
    };
}

/// Emit a daemon connection trace.
///
/// # Example
/// ```ignore
/// trace_connect!("connect from {}", peer);
/// ```
#[macro_export]
macro_rules! trace_connect {
    ($($arg:tt)*) => {
        ::tracing::info!(target: "deltasync::connect", $($arg)*)
    };
}
