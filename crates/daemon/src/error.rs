//! Daemon errors.

use std::io;
use std::net::SocketAddr;

use protocol::ProtocolError;
use thiserror::Error;
use transfer::TransferError;

/// Failures of the daemon itself or of one connection.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A `NAME=PATH[:comment]` string could not be parsed.
    #[error("invalid module {spec:?}: {reason}")]
    InvalidModule {
        /// The rejected string.
        spec: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Two modules share a name.
    #[error("duplicate module {0:?}")]
    DuplicateModule(String),

    /// An I/O timeout of zero was configured.
    #[error("io timeout must be greater than zero")]
    InvalidTimeout,

    /// The listener could not be set up.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested.
        address: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Socket setup for an accepted connection failed.
    #[error("failed to configure connection from {peer}: {source}")]
    Socket {
        /// Remote address.
        peer: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The greeting or module selection failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transfer failed after the handshake.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A worker thread panicked.
    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),
}

impl DaemonError {
    /// Returns `true` when the error is the result of a shutdown request.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Protocol(ProtocolError::Cancelled) => true,
            Self::Transfer(error) => error.is_cancelled(),
            _ => false,
        }
    }

    /// Returns `true` when the peer simply went away.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        let protocol = match self {
            Self::Protocol(error) => error,
            Self::Transfer(TransferError::Fatal(transfer::FatalError::Protocol(error))) => error,
            _ => return false,
        };
        match protocol {
            ProtocolError::UnexpectedEof => true,
            ProtocolError::Io(error) => matches!(
                error.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cancellation_and_disconnects() {
        assert!(DaemonError::Protocol(ProtocolError::Cancelled).is_cancelled());
        assert!(DaemonError::Transfer(ProtocolError::Cancelled.into()).is_cancelled());
        assert!(!DaemonError::InvalidTimeout.is_cancelled());

        assert!(DaemonError::Protocol(ProtocolError::UnexpectedEof).is_disconnect());
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(DaemonError::Transfer(ProtocolError::Io(reset).into()).is_disconnect());
        assert!(!DaemonError::Protocol(ProtocolError::Cancelled).is_disconnect());
    }

    #[test]
    fn display_includes_context() {
        let error = DaemonError::InvalidModule {
            spec: "x".to_owned(),
            reason: "expected NAME=PATH".to_owned(),
        };
        assert_eq!(error.to_string(), "invalid module \"x\": expected NAME=PATH");
    }
}
