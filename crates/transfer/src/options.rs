//! Per-session transfer options and the server argument vector.
//!
//! [`Options`] is built once, before the connection is opened, and passed by
//! reference to every role. The client turns it into the argument lines sent
//! to a daemon with [`Options::server_args`]; the daemon rebuilds it with
//! [`ServerInvocation::parse`].

use std::num::NonZeroU32;

use logging::Verbosity;
use protocol::ProtocolVersion;
use tracing::warn;

/// Immutable options shared by every role of one session.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Options {
    protocol: ProtocolVersion,
    checksum_seed: Option<i32>,
    block_size: Option<NonZeroU32>,
    always_checksum: bool,
    whole_file: bool,
    inplace: bool,
    make_backups: bool,
    recurse: bool,
    relative: bool,
    dry_run: bool,
    size_only: bool,
    ignore_times: bool,
    only_existing: bool,
    list_only: bool,
    verbose: Verbosity,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    /// Defaults: local protocol version, time-derived seed, automatic block
    /// size, quick-check by size and modification time.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            protocol: ProtocolVersion::DEFAULT,
            checksum_seed: None,
            block_size: None,
            always_checksum: false,
            whole_file: false,
            inplace: false,
            make_backups: false,
            recurse: false,
            relative: false,
            dry_run: false,
            size_only: false,
            ignore_times: false,
            only_existing: false,
            list_only: false,
            verbose: Verbosity::QUIET,
        }
    }

    /// Protocol version offered to the peer.
    pub const fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Fixed checksum seed; `None` lets the server derive one from the clock.
    pub const fn with_checksum_seed(mut self, seed: Option<i32>) -> Self {
        self.checksum_seed = seed;
        self
    }

    /// Fixed signature block size.
    pub const fn with_block_size(mut self, block_size: Option<NonZeroU32>) -> Self {
        self.block_size = block_size;
        self
    }

    /// Compare whole-file digests instead of size and time.
    pub const fn with_always_checksum(mut self, enabled: bool) -> Self {
        self.always_checksum = enabled;
        self
    }

    /// Send every file without a basis signature.
    pub const fn with_whole_file(mut self, enabled: bool) -> Self {
        self.whole_file = enabled;
        self
    }

    /// Update destination files in place.
    pub const fn with_inplace(mut self, enabled: bool) -> Self {
        self.inplace = enabled;
        self
    }

    /// Keep backups of replaced files.
    pub const fn with_make_backups(mut self, enabled: bool) -> Self {
        self.make_backups = enabled;
        self
    }

    /// Descend into directories.
    pub const fn with_recurse(mut self, enabled: bool) -> Self {
        self.recurse = enabled;
        self
    }

    /// Keep the full given path of each source in the file list.
    pub const fn with_relative(mut self, enabled: bool) -> Self {
        self.relative = enabled;
        self
    }

    /// Report what would be transferred without writing anything.
    pub const fn with_dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Treat files of equal size as unchanged.
    pub const fn with_size_only(mut self, enabled: bool) -> Self {
        self.size_only = enabled;
        self
    }

    /// Never treat a file as unchanged because of its time.
    pub const fn with_ignore_times(mut self, enabled: bool) -> Self {
        self.ignore_times = enabled;
        self
    }

    /// Only update files that already exist at the destination.
    pub const fn with_only_existing(mut self, enabled: bool) -> Self {
        self.only_existing = enabled;
        self
    }

    /// Only list the remote files.
    pub const fn with_list_only(mut self, enabled: bool) -> Self {
        self.list_only = enabled;
        self
    }

    /// Verbosity forwarded to the server.
    pub const fn with_verbose(mut self, verbose: Verbosity) -> Self {
        self.verbose = verbose;
        self
    }

    /// Protocol version offered to the peer.
    pub const fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Configured checksum seed.
    pub const fn checksum_seed(&self) -> Option<i32> {
        self.checksum_seed
    }

    /// Configured block size.
    pub const fn block_size(&self) -> Option<NonZeroU32> {
        self.block_size
    }

    /// Whether whole-file digests drive the quick check.
    pub const fn always_checksum(&self) -> bool {
        self.always_checksum
    }

    /// Whether deltas are disabled.
    pub const fn whole_file(&self) -> bool {
        self.whole_file
    }

    /// Whether destination files are updated in place.
    pub const fn inplace(&self) -> bool {
        self.inplace
    }

    /// Whether replaced files are backed up.
    pub const fn make_backups(&self) -> bool {
        self.make_backups
    }

    /// Whether directories are descended into.
    pub const fn recurse(&self) -> bool {
        self.recurse
    }

    /// Whether source paths are kept whole.
    pub const fn relative(&self) -> bool {
        self.relative
    }

    /// Whether this is a dry run.
    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Whether equal sizes mean unchanged.
    pub const fn size_only(&self) -> bool {
        self.size_only
    }

    /// Whether times are ignored by the quick check.
    pub const fn ignore_times(&self) -> bool {
        self.ignore_times
    }

    /// Whether only existing files are updated.
    pub const fn only_existing(&self) -> bool {
        self.only_existing
    }

    /// Whether only a listing was requested.
    pub const fn list_only(&self) -> bool {
        self.list_only
    }

    /// Verbosity level.
    pub const fn verbose(&self) -> Verbosity {
        self.verbose
    }

    /// Argument lines that ask a daemon to run the opposite role.
    ///
    /// `server_sends` selects `--sender`, used when the client pulls. The
    /// placeholder `.` is followed by the requested `module[/path]` entries.
    #[must_use]
    pub fn server_args(&self, server_sends: bool, paths: &[String]) -> Vec<String> {
        let mut args = vec!["--server".to_owned()];
        if server_sends {
            args.push("--sender".to_owned());
        }
        for _ in 0..self.verbose.count() {
            args.push("-v".to_owned());
        }
        let flags = [
            (self.relative, "-R"),
            (self.always_checksum, "-c"),
            (self.recurse, "-r"),
            (self.whole_file, "-W"),
            (self.ignore_times, "-I"),
            (self.dry_run, "-n"),
            (self.make_backups, "-b"),
            (self.size_only, "--size-only"),
            (self.inplace, "--inplace"),
            (self.only_existing, "--existing"),
        ];
        args.extend(
            flags
                .into_iter()
                .filter(|(enabled, _)| *enabled)
                .map(|(_, flag)| flag.to_owned()),
        );
        if let Some(size) = self.block_size {
            args.push(format!("--block-size={size}"));
        }
        args.push(".".to_owned());
        args.extend(paths.iter().cloned());
        args
    }
}

/// Role and paths requested by a client, parsed from its argument lines.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerInvocation {
    /// Options for the server side of the session.
    pub options: Options,
    /// `--server` was present.
    pub server: bool,
    /// The server sends files (`--sender`); otherwise it receives.
    pub sender: bool,
    /// Positional arguments after the `.` placeholder.
    pub paths: Vec<String>,
}

impl ServerInvocation {
    /// Parses the argument vector sent by a client.
    ///
    /// `base` supplies the protocol version and seed, which are not part of
    /// the vector. Combined short flags (`-vvrc`) are accepted and unknown
    /// flags are ignored with a warning. Verbosity is reset to the count
    /// given here.
    #[must_use]
    pub fn parse<S: AsRef<str>>(args: &[S], base: &Options) -> Self {
        let mut options = base.clone().with_verbose(Verbosity::QUIET);
        let mut server = false;
        let mut sender = false;
        let mut verbose = 0u8;
        let mut positional = Vec::new();

        for arg in args.iter().map(AsRef::as_ref) {
            match arg {
                "--server" => server = true,
                "--sender" => sender = true,
                "--size-only" => options = options.with_size_only(true),
                "--inplace" => options = options.with_inplace(true),
                "--existing" => options = options.with_only_existing(true),
                "--backup" => options = options.with_make_backups(true),
                _ if arg.starts_with("--") => match arg.strip_prefix("--block-size=") {
                    Some(value) => match value.parse::<u32>() {
                        Ok(size) => options = options.with_block_size(NonZeroU32::new(size)),
                        Err(_) => warn!("ignoring invalid block size {value:?}"),
                    },
                    None => warn!("ignoring unknown option {arg}"),
                },
                _ if arg.len() > 1 && arg.starts_with('-') => {
                    for flag in arg[1..].chars() {
                        options = match flag {
                            'v' => {
                                verbose = verbose.saturating_add(1);
                                options
                            }
                            'R' => options.with_relative(true),
                            'c' => options.with_always_checksum(true),
                            'r' => options.with_recurse(true),
                            'W' => options.with_whole_file(true),
                            'I' => options.with_ignore_times(true),
                            'n' => options.with_dry_run(true),
                            'b' => options.with_make_backups(true),
                            other => {
                                warn!("ignoring unknown option -{other}");
                                options
                            }
                        };
                    }
                }
                _ => positional.push(arg.to_owned()),
            }
        }

        // The first positional is the `.` placeholder.
        if positional.first().is_some_and(|first| first == ".") {
            positional.remove(0);
        }

        Self {
            options: options.with_verbose(Verbosity::from_count(verbose)),
            server,
            sender,
            paths: positional,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_flags() {
        let options = Options::new()
            .with_recurse(true)
            .with_always_checksum(true)
            .with_block_size(NonZeroU32::new(1024));
        assert!(options.recurse());
        assert!(options.always_checksum());
        assert!(!options.dry_run());
        assert_eq!(options.block_size().map(NonZeroU32::get), Some(1024));
    }

    #[test]
    fn server_args_for_pull() {
        let options = Options::new()
            .with_recurse(true)
            .with_verbose(Verbosity::from_count(2))
            .with_block_size(NonZeroU32::new(2048));
        let args = options.server_args(true, &["docs/sub".to_owned()]);
        assert_eq!(
            args,
            [
                "--server",
                "--sender",
                "-v",
                "-v",
                "-r",
                "--block-size=2048",
                ".",
                "docs/sub"
            ]
        );
    }

    #[test]
    fn parse_round_trips_server_args() {
        let options = Options::new()
            .with_relative(true)
            .with_always_checksum(true)
            .with_whole_file(true)
            .with_ignore_times(true)
            .with_dry_run(true)
            .with_size_only(true)
            .with_inplace(true)
            .with_make_backups(true)
            .with_only_existing(true)
            .with_verbose(Verbosity::from_count(1));
        let args = options.server_args(false, &["mod".to_owned()]);
        let parsed = ServerInvocation::parse(&args, &Options::new());
        assert!(parsed.server);
        assert!(!parsed.sender);
        assert_eq!(parsed.options, options);
        assert_eq!(parsed.paths, ["mod"]);
    }

    #[test]
    fn combined_short_flags_and_unknown_options() {
        let args = ["--server", "--sender", "-vvrcx", "--delete", ".", "mod/a", "mod/b"];
        let parsed = ServerInvocation::parse(&args, &Options::new());
        assert!(parsed.sender);
        assert!(parsed.options.recurse());
        assert!(parsed.options.always_checksum());
        assert_eq!(parsed.options.verbose().count(), 2);
        assert_eq!(parsed.paths, ["mod/a", "mod/b"]);
    }

    #[test]
    fn parse_keeps_base_protocol_and_seed() {
        let base = Options::new()
            .with_protocol(ProtocolVersion::new(27).unwrap())
            .with_checksum_seed(Some(99))
            .with_verbose(Verbosity::MAX);
        let parsed = ServerInvocation::parse(&["--server", "."], &base);
        assert_eq!(parsed.options.protocol().as_u8(), 27);
        assert_eq!(parsed.options.checksum_seed(), Some(99));
        assert_eq!(parsed.options.verbose(), Verbosity::QUIET);
        assert!(parsed.paths.is_empty());
    }
}
