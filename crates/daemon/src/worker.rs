//! One accepted connection, from greeting to close.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use logging::{trace_connect, trace_stats};
use protocol::{CancellationToken, MessageCode, StreamChannel};
use tracing::{debug, warn};
use transfer::{Side, Stats, serve_receiver, serve_sender, setup_protocol};

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::handshake::{ModuleRequest, negotiate};
use crate::registry::ConnectionRegistry;

/// How long a refused client gets to read the reason before the socket is
/// closed.
const LINGER_TIMEOUT: Duration = Duration::from_secs(5);

type TcpChannel = StreamChannel<TcpStream, TcpStream>;

/// Serves `stream` until the session ends. The socket is closed on return.
pub(crate) fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: &DaemonConfig,
    registry: &ConnectionRegistry,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let socket_error = |source| DaemonError::Socket { peer, source };
    if let Some(timeout) = config.io_timeout() {
        stream.set_read_timeout(Some(timeout)).map_err(socket_error)?;
        stream.set_write_timeout(Some(timeout)).map_err(socket_error)?;
    }
    let registration = registry.register(peer, stream.try_clone().map_err(socket_error)?);
    let control = stream.try_clone().map_err(socket_error)?;
    let reader = stream.try_clone().map_err(socket_error)?;
    let mut channel = StreamChannel::new(reader, stream).with_cancellation(cancel);

    let Some(request) = negotiate(&mut channel, config)? else {
        linger(&control);
        return Ok(());
    };
    registration.set_module(request.module.name());
    trace_connect!(
        "connection {} from {peer}: {} module {}",
        registration.id(),
        if request.invocation.sender { "pull from" } else { "push to" },
        request.module.name()
    );

    let result = run_module(&mut channel, &request, peer, &control);
    if let Err(error) = &result {
        if !error.is_cancelled() && !error.is_disconnect() {
            report(&mut channel, &format!("{error}"));
        }
        linger(&control);
    }
    result
}

fn run_module(
    channel: &mut TcpChannel,
    request: &ModuleRequest,
    peer: SocketAddr,
    control: &TcpStream,
) -> Result<(), DaemonError> {
    let ModuleRequest {
        module,
        protocol,
        invocation,
    } = request;
    let session = setup_protocol(channel, &invocation.options, Some(*protocol), Side::Server)?;

    let refusal = if invocation.sender && module.write_only() {
        Some("write only")
    } else if !invocation.sender && module.read_only() {
        Some("read only")
    } else {
        None
    };
    if let Some(mode) = refusal {
        let message = format!("ERROR: module {} is {mode}", module.name());
        warn!("{peer}: {message}");
        report(channel, &message);
        linger(control);
        return Ok(());
    }

    let mut stats = Stats::new();
    if invocation.sender {
        serve_sender(channel, &session, module.path(), &invocation.paths, &mut stats)?;
    } else {
        let dest = receive_dir(module.path(), &invocation.paths);
        let received = serve_receiver(channel, &session, &dest, &mut stats)?;
        for path in &received.mismatched {
            warn!("{peer}: checksum mismatch on {}", path.display());
        }
    }
    trace_stats!(
        "{peer} module {}: {} of {} files, {} literal bytes, {} matched bytes",
        module.name(),
        stats.num_transferred_files,
        stats.num_files,
        stats.literal_data,
        stats.matched_data
    );
    Ok(())
}

/// Destination of an upload: the first path below the module root.
fn receive_dir(root: &Path, paths: &[String]) -> PathBuf {
    if paths.len() > 1 {
        warn!("ignoring {} extra destination paths", paths.len() - 1);
    }
    match paths.first().map(String::as_str) {
        None | Some(".") => root.to_path_buf(),
        Some(path) => root.join(path.trim_end_matches('/')),
    }
}

/// Sends `text` to the client as an error frame. Without multiplexed output
/// it is only logged.
fn report(channel: &mut TcpChannel, text: &str) {
    let mut line = text.to_owned();
    line.push('\n');
    if let Err(error) = channel.send_message(MessageCode::Error, line.as_bytes()) {
        debug!("could not report error to client: {error}");
    }
}

/// Half-closes the socket and drains input so data already written reaches
/// the client before the connection is torn down.
fn linger(stream: &TcpStream) {
    if stream.shutdown(Shutdown::Write).is_err() {
        return;
    }
    if stream.set_read_timeout(Some(LINGER_TIMEOUT)).is_err() {
        return;
    }
    let mut stream = stream;
    let _ = io::copy(&mut stream, &mut io::sink());
}
