use std::ops::AddAssign;

/// Counters collected while matching one or more files.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MatchStats {
    /// Blocks reused from the basis.
    pub matches: u64,
    /// Weak hits rejected by the strong sum.
    pub false_alarms: u64,
    /// Offsets whose tag had at least one candidate.
    pub hash_hits: u64,
    /// Bytes sent literally.
    pub literal_data: u64,
    /// Bytes covered by reused blocks.
    pub matched_data: u64,
}

impl AddAssign for MatchStats {
    fn add_assign(&mut self, other: Self) {
        self.matches += other.matches;
        self.false_alarms += other.false_alarms;
        self.hash_hits += other.hash_hits;
        self.literal_data += other.literal_data;
        self.matched_data += other.matched_data;
    }
}
