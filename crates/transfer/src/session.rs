//! Negotiated session state and the four end-to-end flows.
//!
//! A [`Session`] is fixed once [`setup_protocol`] returns: the negotiated
//! version, the checksum seed and the options. Every role reads it by
//! reference. Values that change between phases are computed from the phase
//! number rather than stored.
//!
//! Flow overview, client view:
//!
//! | client  | server   | client runs                         | server runs                 |
//! |---------|----------|-------------------------------------|-----------------------------|
//! | pull    | sender   | excludes, file list in, gen + recv  | excludes, file list out, send |
//! | push    | receiver | file list out, send                 | file list in, gen + recv    |

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use checksums::{DigestConfig, SUM_LENGTH};
use logging::{trace_proto, trace_stats};
use matching::MatchOptions;
use protocol::{ProtocolVersion, StreamChannel};
use signature::{LayoutParams, SHORT_SUM_LENGTH};
use tracing::warn;

use crate::error::{FatalError, TransferError};
use crate::exclude::{recv_exclude_list, send_exclude_list};
use crate::flist::{FileList, build_file_list, recv_file_list, send_file_list};
use crate::generator::generate_files;
use crate::options::Options;
use crate::receiver::receive_files;
use crate::sender::send_files;
use crate::stats::Stats;

/// Which end of the connection is being set up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    /// The side that connected; reads the seed and demultiplexes input.
    Client,
    /// The side that accepted; picks the seed and multiplexes output.
    Server,
}

/// Per-session parameters shared by every role.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    options: Options,
    protocol: ProtocolVersion,
    seed: i32,
}

impl Session {
    /// Builds a session from already negotiated values.
    #[must_use]
    pub const fn new(options: Options, protocol: ProtocolVersion, seed: i32) -> Self {
        Self {
            options,
            protocol,
            seed,
        }
    }

    /// Options of this session.
    #[must_use]
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Negotiated protocol version.
    #[must_use]
    pub const fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Checksum seed mixed into strong digests.
    #[must_use]
    pub const fn seed(&self) -> i32 {
        self.seed
    }

    /// Strong digest parameters.
    #[must_use]
    pub const fn digest(&self) -> DigestConfig {
        DigestConfig::new(self.seed, self.protocol.as_u8())
    }

    /// Minimum strong-sum length requested in `phase`.
    ///
    /// The first pass uses short sums; files that fail verification are
    /// retried with full ones.
    #[must_use]
    pub const fn checksum_length(&self, phase: u32) -> u8 {
        if phase == 0 {
            SHORT_SUM_LENGTH
        } else {
            SUM_LENGTH as u8
        }
    }

    /// Layout parameters for signatures generated in `phase`.
    #[must_use]
    pub const fn layout_params(&self, phase: u32) -> LayoutParams {
        LayoutParams::new(self.protocol, self.checksum_length(phase))
            .with_block_size(self.options.block_size())
    }

    /// Matcher settings.
    #[must_use]
    pub const fn match_options(&self) -> MatchOptions {
        MatchOptions {
            inplace: self.options.inplace(),
            make_backups: self.options.make_backups(),
            file_digest_len: self.protocol.file_digest_len(),
        }
    }

    /// Index of the last phase; a `-1` received in it ends the loop.
    #[must_use]
    pub const fn max_phase(&self) -> u32 {
        if self.protocol.sends_final_done() { 2 } else { 1 }
    }

    /// Bytes of whole-file digest that follow each token stream.
    #[must_use]
    pub const fn file_digest_len(&self) -> usize {
        self.protocol.file_digest_len()
    }
}

/// Finishes protocol setup and returns the session.
///
/// When `remote` is `None` the versions are first exchanged as `int32`s;
/// a daemon connection already learned it from the greeting. The server
/// writes the seed and the client reads it. From protocol 23 the server's
/// output and the client's input are multiplexed.
pub fn setup_protocol<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    options: &Options,
    remote: Option<ProtocolVersion>,
    side: Side,
) -> Result<Session, TransferError> {
    let local = options.protocol();
    let remote = match remote {
        Some(remote) => remote,
        None => {
            channel.write_int(i32::from(local))?;
            channel.flush()?;
            ProtocolVersion::try_from(channel.read_int()?)?
        }
    };
    let protocol = local.negotiate(remote);

    let seed = match side {
        Side::Server => {
            let seed = options.checksum_seed().unwrap_or_else(generate_seed);
            channel.write_int(seed)?;
            channel.flush()?;
            seed
        }
        Side::Client => channel.read_int()?,
    };
    trace_proto!("protocol {protocol} (local {local}, remote {remote}), seed {seed}");

    if protocol.multiplexes_output() {
        match side {
            Side::Server => channel.start_multiplex_out()?,
            Side::Client => channel.start_multiplex_in()?,
        }
    }
    Ok(Session::new(options.clone(), protocol, seed))
}

/// Time-derived seed; never 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn generate_seed() -> i32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs()) as i32;
    let seed = now ^ ((std::process::id() as i32) << 6);
    if seed == 0 { 1 } else { seed }
}

/// Writes the sender's totals for the receiving peer.
#[allow(clippy::cast_possible_wrap)]
pub fn write_report<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    stats: &Stats,
) -> Result<(), TransferError> {
    channel.write_longint(stats.total_read as i64)?;
    channel.write_longint(stats.total_written as i64)?;
    channel.write_longint(stats.total_size as i64)?;
    Ok(())
}

/// Reads the peer's totals; its reads are our writes and the other way round.
#[allow(clippy::cast_sign_loss)]
pub fn read_report<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    stats: &mut Stats,
) -> Result<(), TransferError> {
    stats.total_written = channel.read_longint()?.max(0) as u64;
    stats.total_read = channel.read_longint()?.max(0) as u64;
    stats.total_size = channel.read_longint()?.max(0) as u64;
    Ok(())
}

/// Writes the closing `-1` from protocol 24.
pub fn write_goodbye<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    protocol: ProtocolVersion,
) -> Result<(), TransferError> {
    if protocol.sends_goodbye() {
        channel.write_int(-1)?;
    }
    channel.flush()?;
    Ok(())
}

/// Reads the closing `-1` from protocol 24.
pub fn read_goodbye<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    protocol: ProtocolVersion,
) -> Result<(), TransferError> {
    if protocol.sends_goodbye() {
        let value = channel.read_int()?;
        if value != -1 {
            warn!("unexpected goodbye value {value}");
        }
    }
    Ok(())
}

/// Files received by a generator/receiver pair.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Received {
    /// File list sent by the peer.
    pub files: FileList,
    /// Destinations whose digest did not match; the old file was kept.
    pub mismatched: Vec<PathBuf>,
}

fn record_list(stats: &mut Stats, list: &FileList, size: u64) {
    stats.num_files = list.len() as u64;
    stats.total_size = list.total_size();
    stats.file_list_size = size;
}

fn record_traffic<R: Read, W: Write>(stats: &mut Stats, channel: &StreamChannel<R, W>) {
    stats.total_read = channel.total_read();
    stats.total_written = channel.total_written();
}

fn local_file_list(base: &Path, paths: &[String], options: &Options) -> Result<FileList, TransferError> {
    let list = build_file_list(base, paths, options);
    if list.is_empty() {
        return Err(FatalError::EmptyFileList.into());
    }
    Ok(list)
}

/// Server half of a pull: sends the files under `base` named by `paths`.
pub fn serve_sender<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    base: &Path,
    paths: &[String],
    stats: &mut Stats,
) -> Result<(), TransferError> {
    let excludes = recv_exclude_list(channel)?;
    if !excludes.is_empty() {
        warn!("ignoring {} exclude rules", excludes.len());
    }

    let options = session.options();
    let list = local_file_list(base, paths, options)?;
    let size = send_file_list(channel, &list, session.protocol(), options.always_checksum())?;
    record_list(stats, &list, size);

    channel.start_buffering_in();
    send_files(channel, session, &list, stats)?;
    channel.flush()?;

    record_traffic(stats, channel);
    write_report(channel, stats)?;
    channel.flush()?;
    read_goodbye(channel, session.protocol())?;
    trace_stats!("server sender done: {} files", stats.num_transferred_files);
    Ok(())
}

/// Server half of a push: receives files into `dest`.
pub fn serve_receiver<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    dest: &Path,
    stats: &mut Stats,
) -> Result<Received, TransferError> {
    let (list, size) = recv_file_list(channel, session.protocol(), session.options().always_checksum())?;
    record_list(stats, &list, size);

    generate_files(channel, session, &list, dest)?;
    channel.flush()?;
    let mismatched = receive_files(channel, session, &list, dest, stats)?;

    record_traffic(stats, channel);
    write_goodbye(channel, session.protocol())?;
    Ok(Received {
        files: list,
        mismatched,
    })
}

/// Client half of a pull: receives files into `dest`.
///
/// In list-only mode the file list is returned and nothing is transferred.
pub fn client_receive<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    dest: &Path,
    stats: &mut Stats,
) -> Result<Received, TransferError> {
    send_exclude_list(channel, &[])?;
    channel.flush()?;

    let (list, size) = recv_file_list(channel, session.protocol(), session.options().always_checksum())?;
    record_list(stats, &list, size);

    generate_files(channel, session, &list, dest)?;
    channel.flush()?;
    let mismatched = receive_files(channel, session, &list, dest, stats)?;

    let local_size = stats.total_size;
    read_report(channel, stats)?;
    if stats.total_size != local_size {
        warn!(
            "peer reported total size {} for a list of {local_size} bytes",
            stats.total_size
        );
    }
    write_goodbye(channel, session.protocol())?;
    Ok(Received {
        files: list,
        mismatched,
    })
}

/// Client half of a push: sends the local `paths`, resolved against `base`.
pub fn client_send<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    session: &Session,
    base: &Path,
    paths: &[String],
    stats: &mut Stats,
) -> Result<(), TransferError> {
    let options = session.options();
    let list = local_file_list(base, paths, options)?;
    let size = send_file_list(channel, &list, session.protocol(), options.always_checksum())?;
    record_list(stats, &list, size);

    send_files(channel, session, &list, stats)?;
    channel.flush()?;
    read_goodbye(channel, session.protocol())?;
    record_traffic(stats, channel);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn version(value: u8) -> ProtocolVersion {
        ProtocolVersion::new(value).unwrap()
    }

    #[test]
    fn phase_values() {
        let session = Session::new(Options::new(), version(28), 5);
        assert_eq!(session.checksum_length(0), SHORT_SUM_LENGTH);
        assert_eq!(session.checksum_length(1), 16);
        assert_eq!(session.max_phase(), 1);
        assert_eq!(Session::new(Options::new(), version(29), 5).max_phase(), 2);
        assert_eq!(Session::new(Options::new(), version(20), 5).file_digest_len(), 2);
    }

    #[test]
    fn server_writes_configured_seed_and_multiplexes() {
        let options = Options::new().with_checksum_seed(Some(1234));
        let mut channel = StreamChannel::new(Cursor::new(Vec::new()), Vec::new());
        let session = setup_protocol(&mut channel, &options, Some(version(30)), Side::Server).unwrap();
        assert_eq!(session.protocol(), version(28));
        assert_eq!(session.seed(), 1234);
        assert!(channel.is_multiplexing_out());
        assert_eq!(channel.into_parts().1, 1234i32.to_le_bytes());
    }

    #[test]
    fn client_exchanges_versions_without_a_greeting() {
        let mut input = 22i32.to_le_bytes().to_vec();
        input.extend_from_slice(&77i32.to_le_bytes());
        let mut channel = StreamChannel::new(Cursor::new(input), Vec::new());
        let session = setup_protocol(&mut channel, &Options::new(), None, Side::Client).unwrap();
        assert_eq!(session.protocol(), version(22));
        assert_eq!(session.seed(), 77);
        assert!(!channel.is_multiplexing_in());
        assert_eq!(channel.into_parts().1, 28i32.to_le_bytes());
    }

    #[test]
    fn unsupported_remote_version_is_fatal() {
        let input = 12i32.to_le_bytes().to_vec();
        let mut channel = StreamChannel::new(Cursor::new(input), Vec::new());
        let error = setup_protocol(&mut channel, &Options::new(), None, Side::Client).unwrap_err();
        assert!(error.is_fatal());
    }

    #[test]
    fn generated_seed_is_never_zero() {
        assert_ne!(generate_seed(), 0);
    }

    #[test]
    fn report_is_read_swapped() {
        let sent = Stats {
            total_read: 10,
            total_written: 20,
            total_size: 30,
            ..Stats::new()
        };
        let mut out = StreamChannel::new(Cursor::new(Vec::new()), Vec::new());
        write_report(&mut out, &sent).unwrap();

        let mut input = StreamChannel::new(Cursor::new(out.into_parts().1), Vec::new());
        let mut received = Stats::new();
        read_report(&mut input, &mut received).unwrap();
        assert_eq!(received.total_written, 10);
        assert_eq!(received.total_read, 20);
        assert_eq!(received.total_size, 30);
    }

    #[test]
    fn goodbye_only_from_protocol_24() {
        let mut out = StreamChannel::new(Cursor::new(Vec::new()), Vec::new());
        write_goodbye(&mut out, version(23)).unwrap();
        assert!(out.into_parts().1.is_empty());

        let mut out = StreamChannel::new(Cursor::new(Vec::new()), Vec::new());
        write_goodbye(&mut out, version(24)).unwrap();
        assert_eq!(out.into_parts().1, (-1i32).to_le_bytes());
    }
}
