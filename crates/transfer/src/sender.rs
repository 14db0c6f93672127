//! Sender role: answers each requested index with a delta against the
//! peer's signature.

use std::fs::File;
use std::io::{Read, Write};

use fast_io::{MAX_MAP_SIZE, MapWindow};
use logging::trace_send;
use matching::Matcher;
use protocol::{ProtocolError, StreamChannel};
use signature::{read_signature, write_sum_head};
use tracing::warn;

use crate::error::{TransferError, categorize_io_error};
use crate::flist::FileList;
use crate::session::Session;
use crate::stats::Stats;

/// Reads indices until the last phase ends and sends a delta for each.
///
/// A file that cannot be opened is skipped after its signature has been
/// consumed. An index outside `list` ends the session.
#[allow(clippy::cast_sign_loss)]
pub fn send_files<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    list: &FileList,
    stats: &mut Stats,
) -> Result<(), TransferError> {
    let protocol = session.protocol();
    let dry_run = session.options().dry_run();
    let mut matcher = Matcher::new(session.digest(), session.match_options());
    let mut phase = 0;

    trace_send!("send_files starting");
    loop {
        let index = channel.read_int()?;
        if index == -1 {
            if phase < session.max_phase() {
                phase += 1;
                trace_send!("send_files phase={phase}");
                channel.write_int(-1)?;
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

        if dry_run {
            stats.num_transferred_files += 1;
            stats.total_transferred_size += entry.len();
            channel.write_int(index)?;
            continue;
        }

        let set = read_signature(channel, protocol, session.checksum_length(phase))?;
        let Some(source) = entry.local_path() else {
            warn!("no local file for {}, skipping", entry.path());
            continue;
        };

        let opened = File::open(source).and_then(|file| file.metadata().map(|metadata| (file, metadata.len())));
        let (file, len) = match opened {
            Ok(opened) => opened,
            Err(error) => {
                let error = categorize_io_error(error, source, "open");
                if error.is_fatal() {
                    return Err(error);
                }
                warn!("send_files failed to open {}: {error}", source.display());
                continue;
            }
        };

        let block_length = set.layout().block_length() as usize;
        let map_size = (block_length * 3).max(MAX_MAP_SIZE);
        let mut map = MapWindow::new(file, len, map_size, block_length);

        trace_send!("send_files({index}, {})", source.display());
        channel.write_int(index)?;
        write_sum_head(channel, set.layout(), protocol)?;
        let matched = matcher.match_file(channel, &set, &mut map)?;

        *stats += matched;
        stats.num_transferred_files += 1;
        stats.total_transferred_size += len;
        trace_send!("sender finished {}", entry.path());
    }

    stats.trace_match_report();
    channel.write_int(-1)?;
    trace_send!("send files finished");
    Ok(())
}
