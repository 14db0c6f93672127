//! Command-line front end: `daemon`, `push`, `pull` and `modules`.

use std::ffi::OsString;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use daemon::{DEFAULT_PORT, Daemon, DaemonConfig, DaemonError, Module};
use logging::Verbosity;
use protocol::{ProtocolError, ProtocolVersion};
use thiserror::Error;
use transfer::{ClientError, FatalError, Options, RemoteUrl, Stats, TransferError, list_modules, pull, push};

#[derive(Debug, Parser)]
#[command(name = "deltasync", version, about = "Delta-transfer client and daemon")]
struct Cli {
    /// Increase verbosity; repeat for more detail.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve modules to clients over TCP.
    Daemon(DaemonArgs),
    /// Upload local files to a daemon module.
    Push {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Local sources followed by rsync://host[:port]/module[/path].
        #[arg(required = true, num_args = 2.., value_name = "SOURCE... DEST")]
        paths: Vec<String>,
    },
    /// Download a daemon module or a path inside it.
    Pull {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Print the remote file list instead of transferring.
        #[arg(long)]
        list_only: bool,
        /// rsync://host[:port]/module[/path]
        source: String,
        /// Local directory; defaults to the current one.
        destination: Option<PathBuf>,
    },
    /// List the modules a daemon exports.
    Modules {
        /// rsync://host[:port]/
        url: String,
    },
}

#[derive(Debug, Args)]
struct DaemonArgs {
    /// Address to listen on.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    address: IpAddr,
    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Exported module as NAME=PATH[:comment]; repeatable.
    #[arg(long = "module", value_name = "NAME=PATH[:comment]")]
    modules: Vec<String>,
    /// Refuse uploads to the named module.
    #[arg(long = "read-only", value_name = "NAME")]
    read_only: Vec<String>,
    /// Refuse downloads from the named module.
    #[arg(long = "write-only", value_name = "NAME")]
    write_only: Vec<String>,
    /// Leave the named module out of listings.
    #[arg(long = "unlisted", value_name = "NAME")]
    unlisted: Vec<String>,
    /// Socket read/write timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
    /// Protocol version to offer.
    #[arg(long)]
    protocol: Option<u8>,
    /// Line sent to clients before a module session; repeatable.
    #[arg(long = "motd", value_name = "LINE")]
    motd: Vec<String>,
}

#[derive(Debug, Args)]
struct TransferArgs {
    /// Recurse into directories.
    #[arg(short, long)]
    recursive: bool,
    /// Keep the full source path in the file list.
    #[arg(short = 'R', long)]
    relative: bool,
    /// Compare whole-file checksums instead of size and time.
    #[arg(short, long)]
    checksum: bool,
    /// Send whole files without deltas.
    #[arg(short = 'W', long)]
    whole_file: bool,
    /// Do not skip files that match in size and time.
    #[arg(short = 'I', long)]
    ignore_times: bool,
    /// Show what would be transferred.
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Skip files that match in size.
    #[arg(long)]
    size_only: bool,
    /// Update destination files in place.
    #[arg(long)]
    inplace: bool,
    /// Only update files that already exist.
    #[arg(long)]
    existing: bool,
    /// Keep replaced files with a `~` suffix.
    #[arg(short, long)]
    backup: bool,
    /// Fixed block size for signatures.
    #[arg(short = 'B', long)]
    block_size: Option<NonZeroU32>,
    /// Fixed checksum seed.
    #[arg(long)]
    checksum_seed: Option<i32>,
    /// Protocol version to speak.
    #[arg(long)]
    protocol: Option<u8>,
    /// Print transfer statistics.
    #[arg(long)]
    stats: bool,
}

impl TransferArgs {
    fn options(&self, verbose: Verbosity) -> Result<Options, Failure> {
        Ok(Options::new()
            .with_protocol(protocol_version(self.protocol)?)
            .with_recurse(self.recursive)
            .with_relative(self.relative)
            .with_always_checksum(self.checksum)
            .with_whole_file(self.whole_file)
            .with_ignore_times(self.ignore_times)
            .with_dry_run(self.dry_run)
            .with_size_only(self.size_only)
            .with_inplace(self.inplace)
            .with_only_existing(self.existing)
            .with_make_backups(self.backup)
            .with_block_size(self.block_size)
            .with_checksum_seed(self.checksum_seed)
            .with_verbose(verbose))
    }
}

#[derive(Debug, Error)]
enum Failure {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error("{0} files failed verification")]
    Partial(usize),
    #[error("some files could not be read by the sender")]
    RemoteIoError,
    #[error("write error: {0}")]
    Output(#[from] io::Error),
}

impl Failure {
    /// Classic rsync exit status for the failure.
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) | Self::Output(_) => 1,
            Self::Client(ClientError::InvalidUrl(_)) => 1,
            Self::Client(ClientError::Connect { .. }) => 10,
            Self::Client(ClientError::Transfer(error)) => transfer_exit_code(error),
            Self::Daemon(DaemonError::InvalidModule { .. } | DaemonError::DuplicateModule(_)) => 1,
            Self::Daemon(DaemonError::InvalidTimeout) => 1,
            Self::Daemon(DaemonError::Bind { .. } | DaemonError::Accept(_)) => 10,
            Self::Daemon(_) => 12,
            Self::Partial(_) | Self::RemoteIoError => 23,
        }
    }
}

fn transfer_exit_code(error: &TransferError) -> u8 {
    match error {
        _ if error.is_cancelled() => 20,
        TransferError::Skipped(_) => 23,
        TransferError::Fatal(FatalError::Io { .. }) => 11,
        TransferError::Fatal(FatalError::Protocol(ProtocolError::Io(_))) => 10,
        TransferError::Fatal(_) => 12,
    }
}

fn protocol_version(value: Option<u8>) -> Result<ProtocolVersion, Failure> {
    match value {
        None => Ok(ProtocolVersion::DEFAULT),
        Some(value) => ProtocolVersion::new(value).map_err(|error| Failure::Usage(error.to_string())),
    }
}

/// Parses `args`, runs the command and maps the outcome to an exit status.
pub fn run_with<I, Out, Err>(args: I, stdout: &mut Out, stderr: &mut Err) -> ExitCode
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let rendered = error.render().to_string();
            return if error.use_stderr() {
                let _ = write!(stderr, "{rendered}");
                ExitCode::from(1)
            } else {
                let _ = write!(stdout, "{rendered}");
                ExitCode::SUCCESS
            };
        }
    };

    let verbosity = Verbosity::from_count(cli.verbose);
    // A subscriber may already be installed when embedded in tests.
    let _ = logging::init_tracing(verbosity);

    match run(cli.command, verbosity, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            let _ = writeln!(stderr, "deltasync: {failure}");
            ExitCode::from(failure.exit_code())
        }
    }
}

fn run<Out: Write>(command: Command, verbosity: Verbosity, stdout: &mut Out) -> Result<(), Failure> {
    match command {
        Command::Daemon(args) => run_daemon(args),
        Command::Push { transfer, mut paths } => {
            let options = transfer.options(verbosity)?;
            let destination = paths.pop().ok_or_else(|| Failure::Usage("missing destination".to_owned()))?;
            let url: RemoteUrl = destination.parse()?;
            let stats = push(&paths, &url, &options)?;
            print_stats(stdout, &stats, transfer.stats || verbosity.count() > 0)
        }
        Command::Pull {
            transfer,
            list_only,
            source,
            destination,
        } => {
            let options = transfer.options(verbosity)?.with_list_only(list_only);
            let url: RemoteUrl = source.parse()?;
            let destination = destination.unwrap_or_else(|| PathBuf::from("."));
            let (stats, received) = pull(&url, &destination, &options)?;
            if list_only {
                for entry in &received.files {
                    writeln!(stdout, "{}", entry.listing())?;
                }
                return Ok(());
            }
            print_stats(stdout, &stats, transfer.stats || verbosity.count() > 0)?;
            if !received.mismatched.is_empty() {
                Err(Failure::Partial(received.mismatched.len()))
            } else if received.files.io_error() {
                Err(Failure::RemoteIoError)
            } else {
                Ok(())
            }
        }
        Command::Modules { url } => {
            let url: RemoteUrl = url.parse()?;
            for module in list_modules(&url, ProtocolVersion::DEFAULT)? {
                writeln!(stdout, "{:<15}\t{}", module.name, module.comment)?;
            }
            Ok(())
        }
    }
}

fn print_stats<Out: Write>(stdout: &mut Out, stats: &Stats, enabled: bool) -> Result<(), Failure> {
    if enabled {
        writeln!(stdout, "{stats}")?;
    }
    Ok(())
}

fn daemon_config(args: DaemonArgs) -> Result<DaemonConfig, Failure> {
    let mut builder = DaemonConfig::builder()
        .address(args.address)
        .port(args.port)
        .protocol(protocol_version(args.protocol)?)
        .io_timeout(args.timeout.map(Duration::from_secs));
    for line in args.motd {
        builder = builder.motd_line(line);
    }

    let mut modules = args
        .modules
        .iter()
        .map(|spec| spec.parse::<Module>())
        .collect::<Result<Vec<_>, _>>()?;
    for (names, apply) in [
        (&args.read_only, (|module: Module| module.with_read_only(true)) as fn(Module) -> Module),
        (&args.write_only, |module| module.with_write_only(true)),
        (&args.unlisted, |module| module.with_list(false)),
    ] {
        for name in names {
            let index = modules
                .iter()
                .position(|module| module.name() == name)
                .ok_or_else(|| Failure::Usage(format!("no module named {name:?}")))?;
            let module = modules.remove(index);
            modules.insert(index, apply(module));
        }
    }
    for module in modules {
        builder = builder.module(module);
    }
    Ok(builder.build()?)
}

fn run_daemon(args: DaemonArgs) -> Result<(), Failure> {
    let config = daemon_config(args)?;
    if config.modules().is_empty() {
        return Err(Failure::Usage("no modules configured; use --module NAME=PATH".to_owned()));
    }
    Daemon::bind(config)?.serve()?;
    Ok(())
}
