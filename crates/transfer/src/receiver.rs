//! Receiver role: rebuilds each file from the basis and the delta stream.
//!
//! Output goes to a temporary file next to the destination and replaces it
//! only after the whole-file digest matched. A mismatch keeps the old file
//! and is reported per file; it does not end the session.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use checksums::SUM_LENGTH;
use fast_io::MapWindow;
use filetime::FileTime;
use logging::trace_recv;
use protocol::{ProtocolError, ReceivedToken, StreamChannel, TokenReader};
use signature::{SignatureLayout, read_sum_head};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{FatalError, TransferError, categorize_io_error};
use crate::flist::{FileEntry, FileList};
use crate::session::Session;
use crate::stats::Stats;

/// Smallest basis window.
const MIN_BASIS_MAP: usize = 16 * 1024;

/// Reads deltas until the last phase ends and rebuilds every file under
/// `dest`.
///
/// Returns the destinations whose digest did not match.
#[allow(clippy::cast_sign_loss)]
pub fn receive_files<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    list: &FileList,
    dest: &Path,
    stats: &mut Stats,
) -> Result<Vec<PathBuf>, TransferError> {
    let mut mismatched = Vec::new();
    let mut phase = 0;

    trace_recv!("recv_files({}) starting", list.len());
    loop {
        let index = channel.read_int()?;
        if index == -1 {
            if phase < session.max_phase() {
                phase += 1;
                trace_recv!("recv_files phase={phase}");
                continue;
            }
            break;
        }

        let entry = usize::try_from(index)
            .ok()
            .and_then(|i| list.get(i))
            .ok_or(ProtocolError::InvalidFileIndex {
                index,
                count: list.len(),
            })?;
        stats.num_transferred_files += 1;
        stats.total_transferred_size += entry.len();

        if session.options().dry_run() {
            continue;
        }

        let path = entry.path_under(dest);
        trace_recv!("recv_files({})", entry.path());
        let layout = read_sum_head(channel, session.protocol(), session.checksum_length(phase))?;
        if !receive_file(channel, session, entry, &path, &layout, stats)? {
            mismatched.push(path);
        }
    }

    trace_recv!("recv_files finished");
    Ok(mismatched)
}

/// Receives one file. `Ok(false)` means the digest did not match.
fn receive_file<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    entry: &FileEntry,
    path: &Path,
    layout: &SignatureLayout,
    stats: &mut Stats,
) -> Result<bool, TransferError> {
    let mut basis = open_basis(path, layout);

    let output = create_temp(path, entry);
    let mut output = match output {
        Ok(temp) => Some(BufWriter::new(temp)),
        Err(error) if error.is_fatal() => return Err(error),
        Err(error) => {
            warn!("{error}; discarding data for {}", entry.path());
            None
        }
    };

    let outcome = receive_data(channel, session, layout, basis.as_mut(), output.as_mut(), stats)?;

    let Some(output) = output else {
        return Ok(true);
    };
    if let Some(error) = outcome.write_error {
        let error = categorize_io_error(error, path, "write");
        if error.is_fatal() {
            return Err(error);
        }
        warn!("{error}");
        return Ok(true);
    }
    if !outcome.digest_ok && !session.options().inplace() {
        warn!("{}: checksum mismatch, update discarded", entry.path());
        return Ok(false);
    }

    let finished = output
        .into_inner()
        .map_err(|error| categorize_io_error(error.into_error(), path, "flush"))
        .and_then(|temp| finish_file(temp, entry, path, session.options().make_backups()));
    match finished {
        Ok(()) => Ok(outcome.digest_ok),
        Err(error) if error.is_fatal() => Err(error),
        Err(error) => {
            warn!("{error}");
            Ok(true)
        }
    }
}

fn open_basis(path: &Path, layout: &SignatureLayout) -> Option<MapWindow<File>> {
    if layout.block_count() == 0 {
        return None;
    }
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            warn!("failed to open basis {}: {error}", path.display());
            return None;
        }
    };
    let len = file.metadata().map(|metadata| metadata.len()).unwrap_or(0);
    let block_length = layout.block_length() as usize;
    let map_size = (block_length * 2).max(MIN_BASIS_MAP);
    Some(MapWindow::new(file, len, map_size, block_length))
}

fn create_temp(path: &Path, entry: &FileEntry) -> Result<NamedTempFile, TransferError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|error| categorize_io_error(error, parent, "mkdir"))?;
    let name = path
        .file_name()
        .map_or_else(|| entry.path().to_owned(), |name| name.to_string_lossy().into_owned());
    tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .tempfile_in(parent)
        .map_err(|error| categorize_io_error(error, parent, "mkstemp"))
}

struct DataOutcome {
    digest_ok: bool,
    write_error: Option<io::Error>,
}

/// Consumes one token stream and its digest.
///
/// Output errors are remembered and the stream is still drained so the
/// session stays in step with the sender.
fn receive_data<R: Read, W: Write, O: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    layout: &SignatureLayout,
    mut basis: Option<&mut MapWindow<File>>,
    mut output: Option<&mut O>,
    stats: &mut Stats,
) -> Result<DataOutcome, TransferError> {
    let mut sum = session.digest().file_sum();
    let mut tokens = TokenReader::new();
    let mut write_error = None;
    let mut basis_ok = true;

    let mut emit = |data: &[u8], write_error: &mut Option<io::Error>| {
        if write_error.is_some() {
            return;
        }
        if let Some(out) = output.as_mut() {
            if let Err(error) = out.write_all(data) {
                *write_error = Some(error);
            }
        }
    };

    loop {
        match tokens.next(channel)? {
            ReceivedToken::End => break,
            ReceivedToken::Literal(data) => {
                trace_recv!(trace: "data recv {} bytes", data.len());
                stats.literal_data += data.len() as u64;
                sum.update(&data);
                emit(&data, &mut write_error);
            }
            ReceivedToken::Block(index) => {
                if index >= layout.block_count() {
                    return Err(FatalError::InvalidBlock {
                        index,
                        count: layout.block_count(),
                    }
                    .into());
                }
                let offset = layout.block_offset(index);
                let len = layout.block_len_at(index) as usize;
                trace_recv!(trace: "chunk[{index}] of size {len} at {offset}");
                stats.matched_data += len as u64;
                let Some(map) = basis.as_deref_mut() else {
                    basis_ok = false;
                    continue;
                };
                match map.map(offset, len) {
                    Ok(data) => {
                        sum.update(data);
                        emit(data, &mut write_error);
                    }
                    Err(error) => {
                        warn!("failed to read basis block {index}: {error}");
                        basis_ok = false;
                    }
                }
            }
        }
    }

    let digest_len = session.file_digest_len();
    let mut remote = [0u8; SUM_LENGTH];
    channel.read_exact(&mut remote[..digest_len])?;
    let local = sum.finish();
    let digest_ok = basis_ok && local[..digest_len] == remote[..digest_len];
    Ok(DataOutcome {
        digest_ok,
        write_error,
    })
}

/// Sets permissions, moves the temporary file over `path` and restores the
/// modification time.
fn finish_file(temp: NamedTempFile, entry: &FileEntry, path: &Path, make_backup: bool) -> Result<(), TransferError> {
    set_permissions(temp.as_file(), entry.permissions());

    if make_backup && path.is_file() {
        let mut backup = path.as_os_str().to_owned();
        backup.push("~");
        if let Err(error) = fs::rename(path, &backup) {
            warn!("backup of {} failed: {error}", path.display());
        }
    }

    temp.persist(path)
        .map_err(|error| categorize_io_error(error.error, path, "rename"))?;

    let mtime = FileTime::from_unix_time(entry.mtime(), 0);
    if let Err(error) = filetime::set_file_mtime(path, mtime) {
        warn!("failed to set times on {}: {error}", path.display());
    }
    Ok(())
}

#[cfg(unix)]
fn set_permissions(file: &File, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(error) = file.set_permissions(fs::Permissions::from_mode(mode & 0o777)) {
        warn!("failed to set permissions: {error}");
    }
}

#[cfg(not(unix))]
fn set_permissions(file: &File, mode: u32) {
    if mode & 0o200 == 0 {
        if let Ok(metadata) = file.metadata() {
            let mut permissions = metadata.permissions();
            permissions.set_readonly(true);
            if let Err(error) = file.set_permissions(permissions) {
                warn!("failed to set permissions: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flist::S_IFREG;
    use crate::options::Options;
    use protocol::{ProtocolVersion, send_block, send_end, send_literal};
    use signature::write_sum_head;
    use std::io::Cursor;

    type Channel = StreamChannel<Cursor<Vec<u8>>, Vec<u8>>;

    fn session() -> Session {
        Session::new(Options::new(), ProtocolVersion::DEFAULT, 3)
    }

    fn writer() -> Channel {
        StreamChannel::new(Cursor::new(Vec::new()), Vec::new())
    }

    fn digest_of(session: &Session, data: &[u8]) -> [u8; SUM_LENGTH] {
        let mut sum = session.digest().file_sum();
        sum.update(data);
        sum.finish()
    }

    fn head_for(len: u64, session: &Session) -> SignatureLayout {
        signature::sum_sizes_sqroot(len, session.layout_params(0)).unwrap()
    }

    fn finish_phases(out: &mut Channel) {
        out.write_int(-1).unwrap();
        out.write_int(-1).unwrap();
    }

    #[test]
    fn rebuilds_file_from_literals_and_blocks() {
        let dest = tempfile::tempdir().unwrap();
        let basis: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        fs::write(dest.path().join("f"), &basis).unwrap();

        let session = session();
        let layout = head_for(basis.len() as u64, &session);
        assert_eq!(layout.block_length(), 700);

        let mut expected = b"new head ".to_vec();
        expected.extend_from_slice(&basis[700..1400]);
        expected.extend_from_slice(&basis[..700]);

        let mut out = writer();
        out.write_int(0).unwrap();
        write_sum_head(&mut out, &layout, session.protocol()).unwrap();
        send_literal(&mut out, b"new head ").unwrap();
        send_block(&mut out, 1).unwrap();
        send_block(&mut out, 0).unwrap();
        send_end(&mut out).unwrap();
        out.write_bytes(&digest_of(&session, &expected)).unwrap();
        finish_phases(&mut out);

        let list = FileList::from_entries(vec![FileEntry::new(
            "f",
            expected.len() as u64,
            1_000_000,
            S_IFREG | 0o600,
        )]);
        let mut input = StreamChannel::new(Cursor::new(out.into_parts().1), Vec::new());
        let mut stats = Stats::new();
        let mismatched = receive_files(&mut input, &session, &list, dest.path(), &mut stats).unwrap();

        assert!(mismatched.is_empty());
        let path = dest.path().join("f");
        assert_eq!(fs::read(&path).unwrap(), expected);
        let metadata = fs::metadata(&path).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&metadata).unix_seconds(), 1_000_000);
        assert_eq!(stats.literal_data, 9);
        assert_eq!(stats.matched_data, 1400);
        assert_eq!(stats.num_transferred_files, 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn digest_mismatch_keeps_the_old_file() {
        let dest = tempfile::tempdir().unwrap();
        let path = dest.path().join("keep.txt");
        fs::write(&path, b"original").unwrap();

        let session = session();
        let mut out = writer();
        out.write_int(0).unwrap();
        write_sum_head(&mut out, &SignatureLayout::EMPTY, session.protocol()).unwrap();
        send_literal(&mut out, b"replacement").unwrap();
        send_end(&mut out).unwrap();
        out.write_bytes(&[0u8; SUM_LENGTH]).unwrap();
        finish_phases(&mut out);

        let list = FileList::from_entries(vec![FileEntry::new("keep.txt", 11, 0, S_IFREG | 0o644)]);
        let mut input = StreamChannel::new(Cursor::new(out.into_parts().1), Vec::new());
        let mismatched = receive_files(&mut input, &session, &list, dest.path(), &mut Stats::new()).unwrap();

        assert_eq!(mismatched, [path.clone()]);
        assert_eq!(fs::read(&path).unwrap(), b"original");
        let leftovers = fs::read_dir(dest.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn block_beyond_signature_is_fatal() {
        let dest = tempfile::tempdir().unwrap();
        let session = session();
        let mut out = writer();
        out.write_int(0).unwrap();
        write_sum_head(&mut out, &head_for(100, &session), session.protocol()).unwrap();
        send_block(&mut out, 5).unwrap();

        let list = FileList::from_entries(vec![FileEntry::new("x", 100, 0, S_IFREG | 0o644)]);
        let mut input = StreamChannel::new(Cursor::new(out.into_parts().1), Vec::new());
        let error = receive_files(&mut input, &session, &list, dest.path(), &mut Stats::new()).unwrap_err();
        assert!(matches!(
            error,
            TransferError::Fatal(FatalError::InvalidBlock { index: 5, count: 1 })
        ));
    }

    #[test]
    fn missing_basis_fails_verification_for_block_tokens() {
        let dest = tempfile::tempdir().unwrap();
        let session = session();
        let mut out = writer();
        out.write_int(0).unwrap();
        write_sum_head(&mut out, &head_for(100, &session), session.protocol()).unwrap();
        send_block(&mut out, 0).unwrap();
        send_end(&mut out).unwrap();
        out.write_bytes(&[9u8; SUM_LENGTH]).unwrap();
        finish_phases(&mut out);

        let list = FileList::from_entries(vec![FileEntry::new("nested/y", 100, 0, S_IFREG | 0o644)]);
        let mut input = StreamChannel::new(Cursor::new(out.into_parts().1), Vec::new());
        let mismatched = receive_files(&mut input, &session, &list, dest.path(), &mut Stats::new()).unwrap();
        assert_eq!(mismatched.len(), 1);
        assert!(!dest.path().join("nested/y").exists());
    }

    #[test]
    fn backup_keeps_previous_version() {
        let dest = tempfile::tempdir().unwrap();
        let path = dest.path().join("b");
        fs::write(&path, b"old").unwrap();

        let session = Session::new(Options::new().with_make_backups(true), ProtocolVersion::DEFAULT, 0);
        let mut out = writer();
        out.write_int(0).unwrap();
        write_sum_head(&mut out, &SignatureLayout::EMPTY, session.protocol()).unwrap();
        send_literal(&mut out, b"new").unwrap();
        send_end(&mut out).unwrap();
        out.write_bytes(&digest_of(&session, b"new")).unwrap();
        finish_phases(&mut out);

        let list = FileList::from_entries(vec![FileEntry::new("b", 3, 0, S_IFREG | 0o644)]);
        let mut input = StreamChannel::new(Cursor::new(out.into_parts().1), Vec::new());
        receive_files(&mut input, &session, &list, dest.path(), &mut Stats::new()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(fs::read(dest.path().join("b~")).unwrap(), b"old");
    }
}
