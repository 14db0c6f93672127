//! Server side of the `@RSYNCD:` text exchange.
//!
//! The exchange runs before any binary framing: greeting, module name (or
//! `#list`), then the client's argument lines up to an empty line. Every
//! refusal is sent as an `@ERROR:` line and ends the connection.

use std::fs;
use std::io::{Read, Write};

use logging::trace_connect;
use protocol::{ProtocolError, ProtocolVersion, StreamChannel, format_greeting, parse_greeting};
use tracing::warn;
use transfer::{Options, ServerInvocation, sanitize_path};

use crate::config::{DaemonConfig, Module};

/// Most argument lines a client may send.
pub const MAX_ARGS: usize = 1024;

/// A module session the client asked for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleRequest {
    /// The selected module.
    pub module: Module,
    /// Version both sides speak.
    pub protocol: ProtocolVersion,
    /// Parsed arguments; paths are relative to the module root.
    pub invocation: ServerInvocation,
}

/// Runs the text exchange.
///
/// Returns `None` when the connection is finished: a listing was sent or
/// the request was refused.
pub fn negotiate<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    config: &DaemonConfig,
) -> Result<Option<ModuleRequest>, ProtocolError> {
    let local = config.protocol();
    channel.write_str(&format_greeting(local))?;
    channel.flush()?;

    let greeting = channel.read_line()?;
    let Some(protocol) = client_protocol(&greeting, local) else {
        return refuse(channel, "protocol startup error");
    };
    trace_connect!("client speaks protocol {protocol}");

    let line = channel.read_line()?;
    let request = line.trim_end_matches('\n');
    if request == "#list" {
        send_listing(channel, config)?;
        return Ok(None);
    }
    if request.starts_with('#') {
        return refuse(channel, &format!("Unknown command '{request}'"));
    }
    let Some(module) = config.module(request) else {
        return refuse(channel, &format!("Unknown module {request}"));
    };

    if !module.path().is_dir() {
        if let Err(error) = fs::create_dir_all(module.path()) {
            warn!("module {} path {}: {error}", module.name(), module.path().display());
            return refuse(channel, "Path not found");
        }
    }

    for line in config.motd() {
        channel.write_str(line)?;
        channel.write_str("\n")?;
    }
    channel.write_str("@RSYNCD: OK\n")?;
    channel.flush()?;

    let args = read_args(channel)?;
    let base = Options::new().with_protocol(protocol);
    let mut invocation = ServerInvocation::parse(&args, &base);
    if !invocation.server {
        warn!("client of module {} did not send --server", module.name());
    }
    if invocation.paths.is_empty() {
        invocation.paths.push(".".to_owned());
    }
    let mut paths = Vec::with_capacity(invocation.paths.len());
    for path in &invocation.paths {
        match module_relative(module.name(), path) {
            Some(path) => paths.push(path),
            None => return refuse(channel, &format!("unsafe path {path:?}")),
        }
    }
    invocation.paths = paths;

    Ok(Some(ModuleRequest {
        module: module.clone(),
        protocol,
        invocation,
    }))
}

/// Negotiated version, or `None` for a malformed or unsupported greeting.
fn client_protocol(greeting: &str, local: ProtocolVersion) -> Option<ProtocolVersion> {
    let remote = parse_greeting(greeting).ok()?;
    if remote >= i32::from(local) {
        return Some(local);
    }
    ProtocolVersion::try_from(remote).ok()
}

fn refuse<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    message: &str,
) -> Result<Option<ModuleRequest>, ProtocolError> {
    warn!("refusing client: {message}");
    channel.write_str("@ERROR: ")?;
    channel.write_str(message)?;
    channel.write_str("\n")?;
    channel.flush()?;
    Ok(None)
}

fn send_listing<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    config: &DaemonConfig,
) -> Result<(), ProtocolError> {
    for module in config.modules().iter().filter(|module| module.listable()) {
        channel.write_str(&module.listing_line())?;
        channel.write_str("\n")?;
    }
    channel.write_str("@RSYNCD: EXIT\n")?;
    channel.flush()
}

fn read_args<R: Read, W: Write>(channel: &mut StreamChannel<R, W>) -> Result<Vec<String>, ProtocolError> {
    let mut args = Vec::new();
    loop {
        let line = channel.read_line()?;
        let arg = line.trim_end_matches('\n');
        if arg.is_empty() {
            return Ok(args);
        }
        if args.len() == MAX_ARGS {
            return Err(ProtocolError::Handshake(format!("more than {MAX_ARGS} arguments")));
        }
        args.push(arg.to_owned());
    }
}

/// Maps a client path (`module[/path]`) to a path below the module root.
///
/// The module prefix is optional. `.` names the module root; a trailing `/`
/// is kept so the file list sends a directory's contents only. Absolute
/// paths and `..` components are rejected.
fn module_relative(module: &str, path: &str) -> Option<String> {
    let rest = if path == module {
        ""
    } else {
        path.strip_prefix(module)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path)
    };
    if rest.starts_with('/') || rest.split('/').any(|part| part == "..") {
        return None;
    }
    match sanitize_path(rest) {
        None => Some(".".to_owned()),
        Some(clean) if rest.ends_with('/') => Some(clean + "/"),
        Some(clean) => Some(clean),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::Path;

    type Channel = StreamChannel<Cursor<Vec<u8>>, Vec<u8>>;

    fn config(root: &Path) -> DaemonConfig {
        DaemonConfig::builder()
            .module(Module::new("data", root.join("data")).with_comment("Data files"))
            .module(Module::new("hidden", root.join("hidden")).with_list(false))
            .motd_line("welcome")
            .build()
            .unwrap()
    }

    fn run(config: &DaemonConfig, input: &str) -> (Option<ModuleRequest>, String) {
        let mut channel: Channel = StreamChannel::new(Cursor::new(input.as_bytes().to_vec()), Vec::new());
        let request = negotiate(&mut channel, config).unwrap();
        let output = String::from_utf8(channel.into_parts().1).unwrap();
        (request, output)
    }

    #[test]
    fn lists_visible_modules() {
        let root = tempfile::tempdir().unwrap();
        let (request, output) = run(&config(root.path()), "@RSYNCD: 28\n#list\n");
        assert!(request.is_none());
        assert_eq!(
            output,
            format!("@RSYNCD: 28\ndata{}\tData files\n@RSYNCD: EXIT\n", " ".repeat(11))
        );
    }

    #[test]
    fn refuses_bad_requests() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        for (input, expected) in [
            ("HELLO\n", "@ERROR: protocol startup error\n"),
            ("@RSYNCD: 19\n", "@ERROR: protocol startup error\n"),
            ("@RSYNCD: 28\n#stats\n", "@ERROR: Unknown command '#stats'\n"),
            ("@RSYNCD: 28\nnope\n", "@ERROR: Unknown module nope\n"),
        ] {
            let (request, output) = run(&config, input);
            assert!(request.is_none(), "{input:?}");
            assert_eq!(output, format!("@RSYNCD: 28\n{expected}"), "{input:?}");
        }
    }

    #[test]
    fn accepts_module_and_parses_args() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let input = "@RSYNCD: 26\ndata\n--server\n--sender\n-vr\n.\ndata/sub/\n\n";
        let (request, output) = run(&config, input);

        assert_eq!(output, "@RSYNCD: 28\nwelcome\n@RSYNCD: OK\n");
        let request = request.unwrap();
        assert!(root.path().join("data").is_dir());
        assert_eq!(request.module.name(), "data");
        assert_eq!(request.protocol.as_u8(), 26);
        assert!(request.invocation.sender);
        assert!(request.invocation.options.recurse());
        assert_eq!(request.invocation.options.protocol().as_u8(), 26);
        assert_eq!(request.invocation.paths, ["sub/"]);
    }

    #[test]
    fn unsafe_paths_are_refused() {
        let root = tempfile::tempdir().unwrap();
        let input = "@RSYNCD: 28\ndata\n--server\n.\ndata/../../etc\n\n";
        let (request, output) = run(&config(root.path()), input);
        assert!(request.is_none());
        assert!(output.ends_with("@ERROR: unsafe path \"data/../../etc\"\n"), "{output}");
    }

    #[test]
    fn newer_client_gets_local_version() {
        assert_eq!(client_protocol("@RSYNCD: 31\n", ProtocolVersion::DEFAULT), Some(ProtocolVersion::DEFAULT));
        assert_eq!(client_protocol("@RSYNCD: 24\n", ProtocolVersion::DEFAULT).map(ProtocolVersion::as_u8), Some(24));
        assert_eq!(client_protocol("@RSYNCD: 5\n", ProtocolVersion::DEFAULT), None);
    }

    #[test]
    fn module_relative_paths() {
        assert_eq!(module_relative("data", "data").as_deref(), Some("."));
        assert_eq!(module_relative("data", "data/").as_deref(), Some("."));
        assert_eq!(module_relative("data", "data/a/./b").as_deref(), Some("a/b"));
        assert_eq!(module_relative("data", "data/a/").as_deref(), Some("a/"));
        assert_eq!(module_relative("data", "other").as_deref(), Some("other"));
        assert_eq!(module_relative("data", "data/../x"), None);
        assert_eq!(module_relative("data", "data//etc"), None);
    }
}
