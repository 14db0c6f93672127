//! Client side of a daemon connection.
//!
//! [`pull`] and [`push`] connect to `rsync://host[:port]/module[/path]`,
//! run the inband greeting and module selection, then drive the local
//! roles. [`list_modules`] asks the daemon for its module list.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use logging::trace_connect;
use protocol::{
    CancellationToken, GREETING_PREFIX, MessageCode, ProtocolError, ProtocolVersion, StreamChannel,
    format_greeting, parse_greeting,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{FatalError, TransferError};
use crate::options::Options;
use crate::session::{Received, Side, client_receive, client_send, setup_protocol};
use crate::stats::Stats;

/// Port a daemon listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 873;

/// Channel over both halves of a TCP connection.
pub type TcpChannel = StreamChannel<TcpStream, TcpStream>;

/// Failures of a client session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The remote location could not be parsed.
    #[error("invalid remote url {0:?}")]
    InvalidUrl(String),

    /// The daemon could not be reached.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// `host:port` that was dialled.
        address: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The transfer itself failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl From<ProtocolError> for ClientError {
    fn from(error: ProtocolError) -> Self {
        Self::Transfer(error.into())
    }
}

/// Parsed `rsync://host[:port]/module[/path]` location.
///
/// ```
/// use transfer::RemoteUrl;
///
/// let url: RemoteUrl = "rsync://[::1]:8730/data/photos/2024".parse().unwrap();
/// assert_eq!(url.host(), "::1");
/// assert_eq!(url.port(), 8730);
/// assert_eq!(url.module(), "data");
/// assert_eq!(url.remote_path(), "data/photos/2024");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteUrl {
    host: String,
    port: u16,
    module: String,
    path: Option<String>,
}

impl RemoteUrl {
    /// Host name or address, without IPv6 brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Module name; empty when only the host was given.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Path inside the module, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// `module[/path]` as sent in the server arguments.
    #[must_use]
    pub fn remote_path(&self) -> String {
        match &self.path {
            Some(path) => format!("{}/{path}", self.module),
            None => self.module.clone(),
        }
    }

    fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for RemoteUrl {
    type Err = ClientError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidUrl(url.to_owned());
        let rest = url.strip_prefix("rsync://").ok_or_else(invalid)?;
        let (authority, location) = rest.split_once('/').unwrap_or((rest, ""));

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port),
                None if after.is_empty() => None,
                None => return Err(invalid()),
            };
            (host, port)
        } else {
            match authority.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };

        let (module, path) = match location.split_once('/') {
            Some((module, path)) => (module, Some(path)),
            None => (location, None),
        };
        Ok(Self {
            host: host.to_owned(),
            port,
            module: module.to_owned(),
            path: path.filter(|path| !path.is_empty()).map(str::to_owned),
        })
    }
}

impl fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rsync://{}/{}", self.address(), self.remote_path())
    }
}

/// One line of a daemon's module list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleListing {
    /// Module name.
    pub name: String,
    /// Free-form description; may be empty.
    pub comment: String,
}

/// Opens a TCP connection to the daemon behind `url`.
pub fn connect(url: &RemoteUrl, cancel: CancellationToken) -> Result<TcpChannel, ClientError> {
    let address = url.address();
    trace_connect!("opening tcp connection to {address}");
    let connect_error = |source| ClientError::Connect {
        address: address.clone(),
        source,
    };
    let stream = TcpStream::connect(&address).map_err(connect_error)?;
    let reader = stream.try_clone().map_err(connect_error)?;
    Ok(StreamChannel::new(reader, stream).with_cancellation(cancel))
}

/// Exchanges greetings and returns the negotiated version.
pub fn exchange_greeting<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    local: ProtocolVersion,
) -> Result<ProtocolVersion, ProtocolError> {
    channel.write_str(&format_greeting(local))?;
    channel.flush()?;
    let line = channel.read_line()?;
    let remote = ProtocolVersion::try_from(parse_greeting(&line)?)?;
    Ok(local.negotiate(remote))
}

/// Greets the daemon, selects `module` and sends the server arguments.
///
/// Returns the negotiated version, or `None` when the daemon ended the
/// exchange with `@RSYNCD: EXIT`. Lines before `@RSYNCD: OK` that are not
/// status lines are the daemon's message of the day and are logged.
pub fn start_inband_exchange<R: Read, W: Write, S: AsRef<str>>(
    channel: &mut StreamChannel<R, W>,
    module: &str,
    args: &[S],
    local: ProtocolVersion,
) -> Result<Option<ProtocolVersion>, ProtocolError> {
    let protocol = exchange_greeting(channel, local)?;
    channel.write_str(module)?;
    channel.write_str("\n")?;
    channel.flush()?;

    loop {
        let line = channel.read_line()?;
        let line = line.trim_end_matches('\n');
        if let Some(status) = line.strip_prefix(GREETING_PREFIX) {
            match status {
                "OK" => break,
                "EXIT" => return Ok(None),
                _ if status.starts_with("AUTHREQD") => {
                    return Err(ProtocolError::Handshake(
                        "module requires authentication, which is not supported".to_owned(),
                    ));
                }
                _ => warn!("unexpected daemon status {line:?}"),
            }
        } else if let Some(message) = line.strip_prefix("@ERROR") {
            let message = message.trim_start_matches(':').trim();
            return Err(ProtocolError::Remote(message.to_owned()));
        } else {
            info!("{line}");
        }
    }

    for arg in args {
        channel.write_str(arg.as_ref())?;
        channel.write_str("\n")?;
    }
    channel.write_str("\n")?;
    channel.flush()?;
    Ok(Some(protocol))
}

/// Error text received over the side channel, kept so a later transport
/// failure can be reported with the peer's reason.
#[derive(Clone, Debug, Default)]
struct RemoteErrors(Arc<Mutex<Vec<String>>>);

impl RemoteErrors {
    fn install<R: Read, W: Write>(&self, channel: &mut StreamChannel<R, W>) {
        let errors = Arc::clone(&self.0);
        channel.set_message_handler(move |code, payload| {
            let text = String::from_utf8_lossy(payload);
            let text = text.trim_end();
            if code == MessageCode::Error {
                warn!("remote: {text}");
                if let Ok(mut errors) = errors.lock() {
                    errors.push(text.to_owned());
                }
            } else {
                info!("remote: {text}");
            }
        });
    }

    /// Replaces a transport failure with the peer's own explanation.
    fn explain(&self, error: TransferError) -> TransferError {
        if !error.is_fatal() || error.is_cancelled() {
            return error;
        }
        let Ok(errors) = self.0.lock() else {
            return error;
        };
        if errors.is_empty() {
            return error;
        }
        FatalError::Protocol(ProtocolError::Remote(errors.join("; "))).into()
    }
}

fn open_session(
    url: &RemoteUrl,
    options: &Options,
    server_sends: bool,
) -> Result<(TcpChannel, crate::Session, RemoteErrors), ClientError> {
    let mut channel = connect(url, CancellationToken::new())?;
    let args = options.server_args(server_sends, &[url.remote_path()]);
    let Some(remote) = start_inband_exchange(&mut channel, url.module(), &args, options.protocol())? else {
        return Err(ProtocolError::Handshake("daemon closed the session".to_owned()).into());
    };
    let errors = RemoteErrors::default();
    errors.install(&mut channel);
    let session = setup_protocol(&mut channel, options, Some(remote), Side::Client)?;
    Ok((channel, session, errors))
}

/// Downloads `url` into the local directory `dest`, creating it if needed.
pub fn pull(url: &RemoteUrl, dest: &Path, options: &Options) -> Result<(Stats, Received), ClientError> {
    if !options.list_only() && !options.dry_run() {
        fs::create_dir_all(dest).map_err(|source| FatalError::Io {
            path: dest.to_path_buf(),
            operation: "mkdir",
            source,
        })
        .map_err(TransferError::from)?;
    }

    let (mut channel, session, errors) = open_session(url, options, true)?;
    let mut stats = Stats::new();
    let received = client_receive(&mut channel, &session, dest, &mut stats).map_err(|error| errors.explain(error))?;
    trace_connect!("pull from {url} finished");
    Ok((stats, received))
}

/// Uploads the local `sources` to `url`.
pub fn push(sources: &[String], url: &RemoteUrl, options: &Options) -> Result<Stats, ClientError> {
    let (mut channel, session, errors) = open_session(url, options, false)?;
    let mut stats = Stats::new();
    client_send(&mut channel, &session, Path::new("."), sources, &mut stats)
        .map_err(|error| errors.explain(error))?;
    trace_connect!("push to {url} finished");
    Ok(stats)
}

/// Asks the daemon at `host:port` for its listable modules.
pub fn list_modules(url: &RemoteUrl, local: ProtocolVersion) -> Result<Vec<ModuleListing>, ClientError> {
    let mut channel = connect(url, CancellationToken::new())?;
    exchange_greeting(&mut channel, local)?;
    channel.write_str("#list\n")?;
    channel.flush()?;

    let mut modules = Vec::new();
    loop {
        let line = channel.read_line()?;
        let line = line.trim_end_matches('\n');
        if line == "@RSYNCD: EXIT" {
            break;
        }
        if let Some(message) = line.strip_prefix("@ERROR") {
            return Err(ProtocolError::Remote(message.trim_start_matches(':').trim().to_owned()).into());
        }
        let (name, comment) = line.split_once('\t').unwrap_or((line, ""));
        modules.push(ModuleListing {
            name: name.trim_end().to_owned(),
            comment: comment.to_owned(),
        });
    }
    Ok(modules)
}
