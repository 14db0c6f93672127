//! Generator role: decides which files need data and describes the basis.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use checksums::{Md4Padding, file_checksum};
use logging::trace_genr;
use protocol::StreamChannel;
use signature::{SignatureError, SignatureLayout, generate_signature, sum_sizes_sqroot, write_signature, write_sum_head};
use tracing::{info, warn};

use crate::error::TransferError;
use crate::flist::{FileEntry, FileList};
use crate::options::Options;
use crate::session::Session;

/// Walks `list` against the tree under `dest` and requests every file that
/// differs.
///
/// Directories are created on the way. For each requested file the index
/// is written followed by its signature; the whole list is closed with one
/// `-1` per phase.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn generate_files<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    list: &FileList,
    dest: &Path,
) -> Result<(), TransferError> {
    let options = session.options();
    let padding = Md4Padding::for_protocol(session.protocol().as_u8());

    for (index, entry) in list.iter().enumerate() {
        let path = entry.path_under(dest);

        if options.list_only() {
            trace_genr!("listing {}", entry.path());
            continue;
        }

        if entry.is_dir() {
            if !options.dry_run() {
                if let Err(error) = fs::create_dir_all(&path) {
                    warn!("mkdir {} failed: {error}", path.display());
                }
            }
            continue;
        }

        let existing = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => {
                warn!("{} is a directory, skipping {}", path.display(), entry.path());
                continue;
            }
            Ok(metadata) => Some(metadata),
            Err(error) if error.kind() == io::ErrorKind::NotFound => None,
            Err(error) => {
                warn!("stat {} failed: {error}", path.display());
                None
            }
        };

        if existing.is_none() && options.only_existing() {
            trace_genr!("not creating new file {}", entry.path());
            continue;
        }

        if let Some(metadata) = &existing {
            if is_uptodate(entry, metadata, &path, options, session.file_digest_len(), padding) {
                trace_genr!("{} is uptodate", entry.path());
                continue;
            }
        }

        trace_genr!("generating sums for {} ({index})", entry.path());
        channel.write_int(index as i32)?;
        if options.dry_run() {
            info!("{}", entry.path());
            continue;
        }

        if options.whole_file() || existing.is_none() {
            write_sum_head(channel, &SignatureLayout::EMPTY, session.protocol())?;
            continue;
        }
        send_sums(channel, session, &path)?;
    }

    for _ in 0..=session.max_phase() {
        channel.write_int(-1)?;
    }
    trace_genr!("generate_files finished");
    Ok(())
}

/// Quick check: is the destination already the file in the list?
fn is_uptodate(
    entry: &FileEntry,
    metadata: &fs::Metadata,
    path: &Path,
    options: &Options,
    digest_len: usize,
    padding: Md4Padding,
) -> bool {
    if metadata.len() != entry.len() {
        return false;
    }
    if options.always_checksum() {
        let (Some(expected), Some(actual)) = (entry.checksum(), file_checksum(path, padding)) else {
            return false;
        };
        return expected[..digest_len] == actual[..digest_len];
    }
    if options.size_only() {
        return true;
    }
    if options.ignore_times() {
        return false;
    }
    filetime::FileTime::from_last_modification_time(metadata).unix_seconds() == entry.mtime()
}

/// Writes the signature of the basis at `path`, or an empty head when it
/// cannot be read.
fn send_sums<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    path: &Path,
) -> Result<(), TransferError> {
    let protocol = session.protocol();
    let opened = File::open(path).and_then(|file| file.metadata().map(|metadata| (file, metadata.len())));
    let (file, len) = match opened {
        Ok(opened) => opened,
        Err(error) => {
            warn!("failed to open {}: {error}", path.display());
            write_sum_head(channel, &SignatureLayout::EMPTY, protocol)?;
            return Ok(());
        }
    };

    let layout = sum_sizes_sqroot(len, session.layout_params(0))?;
    match generate_signature(file, layout, &session.digest()) {
        Ok(set) => {
            trace_genr!("sending sums for {}: {} blocks", path.display(), set.len());
            write_signature(channel, &set, protocol)?;
        }
        Err(SignatureError::Map(error)) => {
            warn!("failed to read {}: {error}", path.display());
            write_sum_head(channel, &SignatureLayout::EMPTY, protocol)?;
        }
        Err(error) => return Err(error.into()),
    }
    Ok(())
}
