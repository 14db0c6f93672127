//! Listener, accept loop and shutdown.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use logging::trace_connect;
use protocol::CancellationToken;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::registry::ConnectionRegistry;
use crate::worker::serve_connection;

const LISTEN_BACKLOG: i32 = 128;
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

type WorkerResult = Result<(), DaemonError>;

/// A bound daemon, ready to [`serve`](Self::serve).
#[derive(Debug)]
pub struct Daemon {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<DaemonConfig>,
    registry: ConnectionRegistry,
    cancel: CancellationToken,
}

impl Daemon {
    /// Binds the configured address.
    pub fn bind(config: DaemonConfig) -> Result<Self, DaemonError> {
        let address = config.bind_address();
        let bind_error = |source| DaemonError::Bind { address, source };
        let listener = bind_listener(address).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        info!("listening on {local_addr} with {} modules", config.modules().len());
        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            registry: ConnectionRegistry::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Address actually bound; resolves port `0`.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The live connection table.
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Handle that stops [`serve`](Self::serve) from another thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            cancel: self.cancel.clone(),
            registry: self.registry.clone(),
            wake: wake_address(self.local_addr),
        }
    }

    /// Accepts connections until shut down, one worker thread each.
    ///
    /// Returns once every worker has finished. Worker failures are logged;
    /// only a failing listener ends the loop early.
    pub fn serve(self) -> Result<(), DaemonError> {
        let mut workers: Vec<JoinHandle<WorkerResult>> = Vec::new();
        let result = loop {
            reap_finished_workers(&mut workers);

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.cancel.is_cancelled() {
                        break Ok(());
                    }
                    let peer = normalize_peer_address(peer);
                    trace_connect!("accepted connection from {peer}");
                    if let Some(handle) = self.spawn_worker(stream, peer) {
                        workers.push(handle);
                    }
                }
                Err(_) if self.cancel.is_cancelled() => break Ok(()),
                Err(error) if is_transient_accept_error(error.kind()) => {
                    debug!("accept: {error}");
                }
                Err(error) => break Err(DaemonError::Accept(error)),
            }
        };

        self.cancel.cancel();
        self.registry.shutdown_all();
        for handle in workers.drain(..) {
            join_worker(handle);
        }
        info!("daemon on {} stopped", self.local_addr);
        result
    }

    fn spawn_worker(&self, stream: TcpStream, peer: SocketAddr) -> Option<JoinHandle<WorkerResult>> {
        let config = Arc::clone(&self.config);
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("conn-{peer}"))
            .spawn(move || serve_connection(stream, peer, &config, &registry, cancel));
        match spawned {
            Ok(handle) => Some(handle),
            Err(error) => {
                warn!("failed to start worker for {peer}: {error}");
                None
            }
        }
    }
}

/// Stops a running [`Daemon`].
///
/// Cancelling marks every channel, shuts the registered sockets down so
/// blocked reads return, and connects to the listener once so the accept
/// loop notices.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    registry: ConnectionRegistry,
    wake: SocketAddr,
}

impl ShutdownHandle {
    /// Requests shutdown. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("shutting down");
        self.cancel.cancel();
        self.registry.shutdown_all();
        if let Err(error) = TcpStream::connect_timeout(&self.wake, WAKE_TIMEOUT) {
            debug!("wake-up connection to {} failed: {error}", self.wake);
        }
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn bind_listener(address: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(address))?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Where to connect to reach a listener bound to `local`.
fn wake_address(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

/// Maps `::ffff:a.b.c.d` peers of a dual-stack listener to plain IPv4.
fn normalize_peer_address(address: SocketAddr) -> SocketAddr {
    match address {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(ip) => SocketAddr::new(IpAddr::V4(ip), v6.port()),
            None => address,
        },
        SocketAddr::V4(_) => address,
    }
}

fn is_transient_accept_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::WouldBlock
    )
}

fn reap_finished_workers(workers: &mut Vec<JoinHandle<WorkerResult>>) {
    let mut index = 0;
    while index < workers.len() {
        if workers[index].is_finished() {
            join_worker(workers.swap_remove(index));
        } else {
            index += 1;
        }
    }
}

fn join_worker(handle: JoinHandle<WorkerResult>) {
    let name = handle.thread().name().unwrap_or("worker").to_owned();
    match handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(error)) if error.is_cancelled() || error.is_disconnect() => {
            debug!("{name}: {error}");
        }
        Ok(Err(error)) => warn!("{name}: {error}"),
        Err(panic) => {
            let description = match panic.downcast::<String>() {
                Ok(message) => *message,
                Err(payload) => match payload.downcast::<&str>() {
                    Ok(message) => (*message).to_owned(),
                    Err(_) => "unknown panic payload".to_owned(),
                },
            };
            error!("{name}: {}", DaemonError::WorkerPanic(description));
        }
    }
}
