//! Shared table of live connections.
//!
//! Every worker registers itself on accept and is removed when its
//! [`Registration`] is dropped. The table keeps a clone of each socket so a
//! shutdown can unblock workers stuck in a read.

use std::fmt;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use logging::trace_connect;
use rustc_hash::FxHashMap;

/// Identifier handed out on registration.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Numeric value of the identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the daemon knows about one connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    /// Remote address.
    pub peer: SocketAddr,
    /// Module selected by the client, once known.
    pub module: Option<String>,
    /// When the connection was accepted.
    pub connected_at: Instant,
    stream: TcpStream,
}

impl ConnectionInfo {
    /// Time since the connection was accepted.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Snapshot of one registry entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionSummary {
    /// Registry identifier.
    pub id: ConnectionId,
    /// Remote address.
    pub peer: SocketAddr,
    /// Selected module, if any.
    pub module: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    connections: Mutex<FxHashMap<ConnectionId, ConnectionInfo>>,
    next_id: AtomicU64,
}

/// Cloneable handle to the connection table.
#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A worker that panicked while holding the lock leaves the map intact,
    // so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, FxHashMap<ConnectionId, ConnectionInfo>> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection; `stream` is a clone of the worker's socket.
    pub fn register(&self, peer: SocketAddr, stream: TcpStream) -> Registration {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let info = ConnectionInfo {
            peer,
            module: None,
            connected_at: Instant::now(),
            stream,
        };
        self.lock().insert(id, info);
        trace_connect!("connection {id} from {peer} registered");
        Registration {
            registry: self.clone(),
            id,
        }
    }

    /// Records the module a connection selected.
    pub fn set_module(&self, id: ConnectionId, module: &str) {
        if let Some(info) = self.lock().get_mut(&id) {
            info.module = Some(module.to_owned());
        }
    }

    fn unregister(&self, id: ConnectionId) {
        if let Some(info) = self.lock().remove(&id) {
            // The worker may still own its half; closing here is idempotent.
            let _ = info.stream.shutdown(Shutdown::Both);
            trace_connect!("connection {id} from {} closed after {:?}", info.peer, info.duration());
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Live connections ordered by identifier.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionSummary> {
        let mut summaries: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, info)| ConnectionSummary {
                id: *id,
                peer: info.peer,
                module: info.module.clone(),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }

    /// Shuts every registered socket down so blocked I/O returns.
    pub fn shutdown_all(&self) {
        for (id, info) in self.lock().iter() {
            if let Err(error) = info.stream.shutdown(Shutdown::Both) {
                trace_connect!("shutdown of connection {id} failed: {error}");
            }
        }
    }
}

/// Keeps a connection registered until dropped.
#[derive(Debug)]
pub struct Registration {
    registry: ConnectionRegistry,
    id: ConnectionId,
}

impl Registration {
    /// Identifier of this connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Records the selected module.
    pub fn set_module(&self, module: &str) {
        self.registry.set_module(self.id, module);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn registration_lifecycle() {
        let registry = ConnectionRegistry::new();
        let (_client, server) = socket_pair();
        let peer = server.peer_addr().unwrap();

        let first = registry.register(peer, server.try_clone().unwrap());
        let second = registry.register(peer, server.try_clone().unwrap());
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 2);

        first.set_module("data");
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].id, first.id());
        assert_eq!(snapshot[0].module.as_deref(), Some("data"));
        assert_eq!(snapshot[1].module, None);

        drop(first);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn shutdown_all_unblocks_readers() {
        let registry = ConnectionRegistry::new();
        let (_client, server) = socket_pair();
        let peer = server.peer_addr().unwrap();
        let _registration = registry.register(peer, server.try_clone().unwrap());

        let reader = std::thread::spawn(move || {
            let mut server = server;
            let mut buf = [0u8; 1];
            server.read(&mut buf)
        });
        registry.shutdown_all();
        assert_eq!(reader.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn dropping_registration_closes_socket() {
        let registry = ConnectionRegistry::new();
        let (mut client, server) = socket_pair();
        let peer = server.peer_addr().unwrap();
        drop(registry.register(peer, server.try_clone().unwrap()));

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
