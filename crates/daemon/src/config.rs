//! Daemon configuration.
//!
//! [`DaemonConfig`] is immutable once built and shared by every worker. The
//! module table comes from `NAME=PATH[:comment]` strings; a configuration
//! file format is not supported.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use protocol::ProtocolVersion;

use crate::error::DaemonError;

/// Port the daemon binds unless configured otherwise.
pub const DEFAULT_PORT: u16 = 873;

/// One exported directory tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Module {
    name: String,
    path: PathBuf,
    comment: String,
    read_only: bool,
    write_only: bool,
    list: bool,
}

impl Module {
    /// Creates a listable, read-write module.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            comment: String::new(),
            read_only: false,
            write_only: false,
            list: true,
        }
    }

    /// Description shown by `#list`.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Refuse uploads.
    #[must_use]
    pub const fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Refuse downloads.
    #[must_use]
    pub const fn with_write_only(mut self, write_only: bool) -> Self {
        self.write_only = write_only;
        self
    }

    /// Whether the module appears in `#list` output.
    #[must_use]
    pub const fn with_list(mut self, list: bool) -> Self {
        self.list = list;
        self
    }

    /// Module name as requested by clients.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root directory of the module.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Free-form description.
    #[must_use]
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Uploads are refused.
    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    /// Downloads are refused.
    #[must_use]
    pub const fn write_only(&self) -> bool {
        self.write_only
    }

    /// Shown by `#list`.
    #[must_use]
    pub const fn listable(&self) -> bool {
        self.list
    }

    /// The `#list` line for this module, without the newline.
    #[must_use]
    pub fn listing_line(&self) -> String {
        format!("{:<15}\t{}", self.name, self.comment)
    }
}

impl FromStr for Module {
    type Err = DaemonError;

    /// Parses `NAME=PATH[:comment]`.
    ///
    /// ```
    /// use daemon::Module;
    ///
    /// let module: Module = "docs=/srv/docs:Project documents".parse().unwrap();
    /// assert_eq!(module.name(), "docs");
    /// assert_eq!(module.path().to_str(), Some("/srv/docs"));
    /// assert_eq!(module.comment(), "Project documents");
    /// ```
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DaemonError::InvalidModule {
            spec: spec.to_owned(),
            reason: reason.to_owned(),
        };
        let (name, rest) = spec.split_once('=').ok_or_else(|| invalid("expected NAME=PATH"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("empty module name"));
        }
        if name.starts_with('#') || name.contains(['/', '\n', '\t']) {
            return Err(invalid("module name contains a reserved character"));
        }
        let (path, comment) = match rest.split_once(':') {
            Some((path, comment)) => (path, comment.trim()),
            None => (rest, ""),
        };
        if path.is_empty() {
            return Err(invalid("empty module path"));
        }
        Ok(Self::new(name, path).with_comment(comment))
    }
}

/// Everything the daemon needs to run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DaemonConfig {
    address: IpAddr,
    port: u16,
    protocol: ProtocolVersion,
    modules: Vec<Module>,
    io_timeout: Option<Duration>,
    motd: Vec<String>,
}

impl DaemonConfig {
    /// Starts a [`DaemonConfigBuilder`].
    #[must_use]
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    /// Address the listener binds.
    #[must_use]
    pub const fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Protocol version offered in the greeting.
    #[must_use]
    pub const fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Exported modules in configuration order.
    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Looks a module up by name.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name == name)
    }

    /// Socket read/write timeout, when set.
    #[must_use]
    pub const fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }

    /// Lines sent to clients before `@RSYNCD: OK`.
    #[must_use]
    pub fn motd(&self) -> &[String] {
        &self.motd
    }
}

/// Builder for [`DaemonConfig`].
#[derive(Clone, Debug)]
pub struct DaemonConfigBuilder {
    address: IpAddr,
    port: u16,
    protocol: ProtocolVersion,
    modules: Vec<Module>,
    io_timeout: Option<Duration>,
    motd: Vec<String>,
}

impl Default for DaemonConfigBuilder {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            protocol: ProtocolVersion::DEFAULT,
            modules: Vec::new(),
            io_timeout: None,
            motd: Vec::new(),
        }
    }
}

impl DaemonConfigBuilder {
    /// Listen address; `0.0.0.0` by default.
    #[must_use]
    pub const fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Listen port; `0` picks an ephemeral port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Protocol version offered to clients.
    #[must_use]
    pub const fn protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Adds a module.
    #[must_use]
    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Socket read/write timeout for every connection.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Adds a message-of-the-day line.
    #[must_use]
    pub fn motd_line(mut self, line: impl Into<String>) -> Self {
        self.motd.push(line.into());
        self
    }

    /// Validates the module table and builds the configuration.
    pub fn build(self) -> Result<DaemonConfig, DaemonError> {
        for (index, module) in self.modules.iter().enumerate() {
            if self.modules[..index].iter().any(|other| other.name == module.name) {
                return Err(DaemonError::DuplicateModule(module.name.clone()));
            }
        }
        if self.io_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(DaemonError::InvalidTimeout);
        }
        Ok(DaemonConfig {
            address: self.address,
            port: self.port,
            protocol: self.protocol,
            modules: self.modules,
            io_timeout: self.io_timeout,
            motd: self.motd,
        })
    }
}
