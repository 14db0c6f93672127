//! Error categorization for transfer sessions
//!
//! Errors fall into two groups: fatal errors end the session, skipped errors
//! only affect the current file and are logged before moving on. A digest
//! mismatch on a received file is neither; the receiver reports it as a
//! per-file result.

use std::io;
use std::path::{Path, PathBuf};

use matching::MatchError;
use protocol::ProtocolError;
use signature::SignatureError;
use thiserror::Error;

/// Error raised by a transfer role.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The session cannot continue.
    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),

    /// Only the current file is affected.
    #[error("skipped: {0}")]
    Skipped(#[from] SkippedFile),
}

/// Errors that end the session.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Transport failure or peer desynchronization.
    #[error(transparent)]
    Protocol(ProtocolError),

    /// A signature header or body could not be read.
    #[error(transparent)]
    Signature(SignatureError),

    /// The matcher could not map the source or emit tokens.
    #[error(transparent)]
    Match(MatchError),

    /// A delta referenced a block the basis signature did not have.
    #[error("invalid block {index} (count={count})")]
    InvalidBlock {
        /// Received block index.
        index: u32,
        /// Blocks in the basis signature.
        count: u32,
    },

    /// A file-list name was absolute, escaped its root or was not UTF-8.
    #[error("refusing unsafe path {0:?}")]
    UnsafePath(String),

    /// A file-list entry could not be decoded.
    #[error("malformed file list entry: {0}")]
    MalformedFileList(&'static str),

    /// Nothing matched the requested paths.
    #[error("file list is empty")]
    EmptyFileList,

    /// Local I/O failure that affects every later file.
    #[error("{operation} {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Operation that failed.
        operation: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Per-file failures; the file is skipped and the session continues.
#[derive(Debug, Error)]
pub enum SkippedFile {
    /// The file disappeared after the file list was built.
    #[error("file has vanished: {}", path.display())]
    Vanished {
        /// Missing path.
        path: PathBuf,
    },

    /// Access was refused.
    #[error("permission denied for {operation} on {}", path.display())]
    PermissionDenied {
        /// Path being accessed.
        path: PathBuf,
        /// Operation that failed.
        operation: &'static str,
    },

    /// Any other I/O failure confined to one file.
    #[error("{operation} failed on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Operation that failed.
        operation: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    /// Returns `true` when the session must stop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Returns `true` when the session was cancelled through its token.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Fatal(FatalError::Protocol(ProtocolError::Cancelled))
        )
    }
}

impl From<ProtocolError> for TransferError {
    fn from(error: ProtocolError) -> Self {
        Self::Fatal(FatalError::Protocol(error))
    }
}

impl From<SignatureError> for TransferError {
    fn from(error: SignatureError) -> Self {
        match error {
            SignatureError::Protocol(error) => error.into(),
            other => Self::Fatal(FatalError::Signature(other)),
        }
    }
}

impl From<MatchError> for TransferError {
    fn from(error: MatchError) -> Self {
        match error {
            MatchError::Sink(error) => error.into(),
            other => Self::Fatal(FatalError::Match(other)),
        }
    }
}

/// Sorts a local I/O error into skipped or fatal.
///
/// Missing files and permission problems only affect the file at hand. A
/// full disk or read-only filesystem affects everything that follows.
#[must_use]
pub fn categorize_io_error(error: io::Error, path: &Path, operation: &'static str) -> TransferError {
    use io::ErrorKind::{NotFound, PermissionDenied, ReadOnlyFilesystem, StorageFull};

    let path = path.to_path_buf();
    match error.kind() {
        NotFound => SkippedFile::Vanished { path }.into(),
        PermissionDenied => SkippedFile::PermissionDenied { path, operation }.into(),
        StorageFull | ReadOnlyFilesystem => FatalError::Io {
            path,
            operation,
            source: error,
        }
        .into(),
        _ => SkippedFile::Io {
            path,
            operation,
            source: error,
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_skipped() {
        let error = categorize_io_error(
            io::Error::from(io::ErrorKind::NotFound),
            Path::new("gone.txt"),
            "open",
        );
        assert!(!error.is_fatal());
        assert_eq!(error.to_string(), "skipped: file has vanished: gone.txt");
    }

    #[test]
    fn full_disk_is_fatal() {
        let error = categorize_io_error(
            io::Error::from(io::ErrorKind::StorageFull),
            Path::new("big.bin"),
            "write",
        );
        assert!(error.is_fatal());
    }

    #[test]
    fn protocol_errors_inside_other_layers_stay_protocol_errors() {
        let error: TransferError = SignatureError::Protocol(ProtocolError::Cancelled).into();
        assert!(error.is_cancelled());

        let error: TransferError = MatchError::Sink(ProtocolError::UnexpectedEof).into();
        assert!(matches!(
            error,
            TransferError::Fatal(FatalError::Protocol(ProtocolError::UnexpectedEof))
        ));
    }
}
