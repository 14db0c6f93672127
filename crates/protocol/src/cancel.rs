//! Cooperative cancellation shared between a worker and its controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flag observed by [`StreamChannel`](crate::StreamChannel) at every blocking
/// call. Once set, channel operations fail with
/// [`ProtocolError::Cancelled`](crate::ProtocolError::Cancelled).
///
/// Clones share the same flag.
///
/// ```
/// use protocol::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_view = token.clone();
/// token.cancel();
/// assert!(worker_view.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Reports whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
