//! crates/logging/src/subscriber.rs
//! Process-wide tracing subscriber bootstrap.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;

use crate::Verbosity;

/// Builds the filter for `verbosity`, letting `RUST_LOG` override it.
#[must_use]
pub fn filter_for(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()))
}

/// Installs a stderr formatter honouring `verbosity`.
///
/// Fails when a global subscriber has already been set, which callers that
/// embed the library may legitimately ignore.
pub fn init_tracing(verbosity: Verbosity) -> Result<(), TryInitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity.count() >= 3);

    tracing_subscriber::registry()
        .with(filter_for(verbosity))
        .with(fmt)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error() {
        let _ = init_tracing(Verbosity::QUIET);
        assert!(init_tracing(Verbosity::MAX).is_err());
    }
}
