//! crates/logging/src/verbosity.rs
//! Verbosity levels and subsystem targets.

use std::fmt;

use tracing::Level;

/// Classic rsync verbosity, i.e. the number of `-v` flags.
///
/// Level 0 only shows warnings and errors, level 1 adds per-file progress and
/// statistics, levels 2 and 3 add role-level and protocol debugging, level 4
/// adds per-chunk tracing.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Verbosity(u8);

impl Verbosity {
    /// Warnings and errors only.
    pub const QUIET: Self = Self(0);
    /// Highest meaningful verbosity.
    pub const MAX: Self = Self(4);

    /// Builds a verbosity from a `-v` count, saturating at [`Verbosity::MAX`].
    #[must_use]
    pub const fn from_count(count: u8) -> Self {
        if count > Self::MAX.0 {
            Self::MAX
        } else {
            Self(count)
        }
    }

    /// Returns the raw `-v` count.
    #[must_use]
    pub const fn count(self) -> u8 {
        self.0
    }

    /// Returns the most detailed tracing level shown for `subsystem`.
    #[must_use]
    pub const fn max_level(self, subsystem: Subsystem) -> Level {
        match self.0 {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => match subsystem {
                Subsystem::Io | Subsystem::Delta => Level::INFO,
                _ => Level::DEBUG,
            },
            3 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    /// Reports whether an event at `level` for `subsystem` is visible.
    #[must_use]
    pub fn enables(self, subsystem: Subsystem, level: Level) -> bool {
        level <= self.max_level(subsystem)
    }

    /// Renders the `EnvFilter` directive equivalent to this verbosity.
    #[must_use]
    pub fn directive(self) -> String {
        let base = match self.0 {
            0 => "warn",
            1 | 2 => "info",
            3 => "debug",
            _ => "trace",
        };
        let mut directive = String::from(base);
        for subsystem in Subsystem::ALL {
            let level = self.max_level(subsystem);
            directive.push(',');
            directive.push_str(subsystem.target());
            directive.push('=');
            directive.push_str(level_name(level));
        }
        directive
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-v x{}", self.0)
    }
}

const fn level_name(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

/// Diagnostic subsystems, each mapped to a dedicated tracing target.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Subsystem {
    /// Handshake, version negotiation and multiplex control messages.
    Proto,
    /// Raw channel I/O.
    Io,
    /// Signature generation and block matching.
    Delta,
    /// Sender role.
    Sender,
    /// Receiver role.
    Receiver,
    /// Generator role.
    Generator,
    /// File list construction and exchange.
    Flist,
    /// Transfer statistics.
    Stats,
    /// Daemon connection handling.
    Connect,
}

impl Subsystem {
    /// Every subsystem in a fixed order.
    pub const ALL: [Self; 9] = [
        Self::Proto,
        Self::Io,
        Self::Delta,
        Self::Sender,
        Self::Receiver,
        Self::Generator,
        Self::Flist,
        Self::Stats,
        Self::Connect,
    ];

    /// Returns the tracing target used for this subsystem.
    #[must_use]
    pub const fn target(self) -> &'static str {
        match self {
            Self::Proto => "deltasync::proto",
            Self::Io => "deltasync::io",
            Self::Delta => "deltasync::delta",
            Self::Sender => "deltasync::sender",
            Self::Receiver => "deltasync::receiver",
            Self::Generator => "deltasync::generator",
            Self::Flist => "deltasync::flist",
            Self::Stats => "deltasync::stats",
            Self::Connect => "deltasync::connect",
        }
    }

    /// Maps a tracing target back to its subsystem.
    #[must_use]
    pub fn from_target(target: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|subsystem| subsystem.target() == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_count_saturates() {
        assert_eq!(Verbosity::from_count(0), Verbosity::QUIET);
        assert_eq!(Verbosity::from_count(3).count(), 3);
        assert_eq!(Verbosity::from_count(9), Verbosity::MAX);
    }

    #[test]
    fn quiet_hides_info() {
        for subsystem in Subsystem::ALL {
            assert!(Verbosity::QUIET.enables(subsystem, Level::WARN));
            assert!(!Verbosity::QUIET.enables(subsystem, Level::INFO));
        }
    }

    #[test]
    fn level_two_keeps_chunk_chatter_hidden() {
        let verbosity = Verbosity::from_count(2);
        assert!(verbosity.enables(Subsystem::Sender, Level::DEBUG));
        assert!(!verbosity.enables(Subsystem::Delta, Level::DEBUG));
        assert!(!verbosity.enables(Subsystem::Io, Level::DEBUG));
    }

    #[test]
    fn max_enables_trace_everywhere() {
        for subsystem in Subsystem::ALL {
            assert!(Verbosity::MAX.enables(subsystem, Level::TRACE));
        }
    }

    #[test]
    fn targets_round_trip() {
        for subsystem in Subsystem::ALL {
            assert_eq!(Subsystem::from_target(subsystem.target()), Some(subsystem));
        }
        assert_eq!(Subsystem::from_target("unknown"), None);
    }

    #[test]
    fn directive_lists_every_target() {
        let directive = Verbosity::from_count(1).directive();
        assert!(directive.starts_with("info,"));
        for subsystem in Subsystem::ALL {
            assert!(directive.contains(subsystem.target()), "{directive}");
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn verbosity_serializes_as_count() {
        let json = serde_json::to_string(&Verbosity::from_count(2)).expect("serialize");
        assert_eq!(json, "2");
    }
}
