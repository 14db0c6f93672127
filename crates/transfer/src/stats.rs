//! Per-session transfer statistics.

use std::fmt;
use std::ops::AddAssign;

use logging::trace_stats;
use matching::MatchStats;

/// Counters collected by one session.
///
/// Each role adds to the struct it is handed; nothing is shared between
/// sessions.
///
/// ```
/// use transfer::Stats;
///
/// let mut stats = Stats::default();
/// stats.num_files = 3;
/// stats.total_size = 4096;
/// let report = stats.to_string();
/// assert!(report.starts_with("Number of files: 3\n"));
/// assert!(report.contains("Total file size: 4096 bytes\n"));
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stats {
    /// Entries in the file list.
    pub num_files: u64,
    /// Files whose data was sent or received.
    pub num_transferred_files: u64,
    /// Sum of the sizes in the file list.
    pub total_size: u64,
    /// Sum of the sizes of transferred files.
    pub total_transferred_size: u64,
    /// Bytes sent as literal data.
    pub literal_data: u64,
    /// Bytes rebuilt from basis blocks.
    pub matched_data: u64,
    /// Bytes of encoded file list.
    pub file_list_size: u64,
    /// Bytes read from the connection.
    pub total_read: u64,
    /// Bytes written to the connection.
    pub total_written: u64,
    /// Basis blocks reused by the matcher.
    pub matches: u64,
    /// Weak checksum hits rejected by the strong sum.
    pub false_alarms: u64,
    /// Offsets whose tag had candidates.
    pub hash_hits: u64,
}

impl Stats {
    /// Creates zeroed statistics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            num_files: 0,
            num_transferred_files: 0,
            total_size: 0,
            total_transferred_size: 0,
            literal_data: 0,
            matched_data: 0,
            file_list_size: 0,
            total_read: 0,
            total_written: 0,
            matches: 0,
            false_alarms: 0,
            hash_hits: 0,
        }
    }

    /// Total size divided by bytes on the wire; 0 when nothing moved.
    #[must_use]
    pub fn speedup(&self) -> f64 {
        let wire = self.total_read + self.total_written;
        if wire == 0 {
            0.0
        } else {
            self.total_size as f64 / wire as f64
        }
    }

    /// Logs the matcher counters the way the sender reports them.
    pub fn trace_match_report(&self) {
        trace_stats!(
            "total: matches={}  hash_hits={}  false_alarms={} data={}",
            self.matches,
            self.hash_hits,
            self.false_alarms,
            self.literal_data
        );
    }
}

impl AddAssign<MatchStats> for Stats {
    fn add_assign(&mut self, other: MatchStats) {
        self.matches += other.matches;
        self.false_alarms += other.false_alarms;
        self.hash_hits += other.hash_hits;
        self.literal_data += other.literal_data;
        self.matched_data += other.matched_data;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of files: {}", self.num_files)?;
        writeln!(f, "Number of files transferred: {}", self.num_transferred_files)?;
        writeln!(f, "Total file size: {} bytes", self.total_size)?;
        writeln!(
            f,
            "Total transferred file size: {} bytes",
            self.total_transferred_size
        )?;
        writeln!(f, "Literal data: {} bytes", self.literal_data)?;
        writeln!(f, "Matched data: {} bytes", self.matched_data)?;
        writeln!(f, "File list size: {}", self.file_list_size)?;
        writeln!(f, "Total bytes written: {}", self.total_written)?;
        writeln!(f, "Total bytes read: {}", self.total_read)?;
        writeln!(f)?;
        write!(
            f,
            "wrote {} bytes  read {} bytes\ntotal size is {}  speedup is {:.2}",
            self.total_written,
            self.total_read,
            self.total_size,
            self.speedup()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_counters_accumulate() {
        let mut stats = Stats::new();
        stats += MatchStats {
            matches: 2,
            false_alarms: 1,
            hash_hits: 5,
            literal_data: 100,
            matched_data: 1400,
        };
        stats += MatchStats {
            literal_data: 10,
            ..MatchStats::default()
        };
        assert_eq!(stats.matches, 2);
        assert_eq!(stats.hash_hits, 5);
        assert_eq!(stats.literal_data, 110);
        assert_eq!(stats.matched_data, 1400);
    }

    #[test]
    fn report_lists_every_counter_in_order() {
        let stats = Stats {
            num_files: 4,
            num_transferred_files: 2,
            total_size: 1000,
            total_transferred_size: 600,
            literal_data: 100,
            matched_data: 500,
            file_list_size: 77,
            total_read: 150,
            total_written: 250,
            ..Stats::new()
        };
        let report = stats.to_string();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "Number of files: 4");
        assert_eq!(lines[1], "Number of files transferred: 2");
        assert_eq!(lines[4], "Literal data: 100 bytes");
        assert_eq!(lines[6], "File list size: 77");
        assert_eq!(lines[7], "Total bytes written: 250");
        assert_eq!(lines[8], "Total bytes read: 150");
        assert_eq!(lines[11], "total size is 1000  speedup is 2.50");
    }

    #[test]
    fn speedup_without_traffic_is_zero() {
        assert!(Stats::new().speedup().abs() < f64::EPSILON);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_to_json() {
        let stats = Stats {
            num_files: 1,
            ..Stats::new()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["num_files"], 1);
        assert_eq!(json["literal_data"], 0);
    }
}
