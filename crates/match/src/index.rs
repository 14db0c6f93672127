//! Tag table over signature blocks.

use checksums::weak_tag;
use signature::SignatureSet;

/// Number of slots in the tag table.
pub const TABLE_SIZE: usize = 1 << 16;

const NULL_TAG: i32 = -1;

#[derive(Clone, Copy, Debug)]
struct Target {
    tag: u16,
    index: u32,
}

/// Blocks sorted by tag plus a table mapping each tag to its first position.
///
/// The table allocation is kept across [`build`](Self::build) calls and fully
/// reset each time.
#[derive(Clone, Debug)]
pub struct HashIndex {
    targets: Vec<Target>,
    table: Box<[i32]>,
}

impl HashIndex {
    /// Creates an index with an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            table: vec![NULL_TAG; TABLE_SIZE].into_boxed_slice(),
        }
    }

    /// Rebuilds the index for `set`, discarding the previous contents.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn build(&mut self, set: &SignatureSet) {
        self.targets.clear();
        self.targets
            .extend(set.blocks().iter().enumerate().map(|(index, block)| Target {
                tag: weak_tag(block.weak()),
                index: index as u32,
            }));
        // Stable, so equal tags stay in block order.
        self.targets.sort_by_key(|target| target.tag);

        self.table.fill(NULL_TAG);
        for (position, target) in self.targets.iter().enumerate().rev() {
            self.table[usize::from(target.tag)] = position as i32;
        }
    }

    /// Block indices carrying `tag`, lowest sorted position first.
    #[must_use]
    pub fn candidates(&self, tag: u16) -> Candidates<'_> {
        let targets: &[Target] = match usize::try_from(self.table[usize::from(tag)]) {
            Ok(start) => &self.targets[start..],
            Err(_) => &[],
        };
        Candidates { targets, tag }
    }

    /// Whether any block carries `tag`.
    #[must_use]
    pub fn contains(&self, tag: u16) -> bool {
        self.table[usize::from(tag)] != NULL_TAG
    }

    /// Number of indexed blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Default for HashIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the run of blocks sharing one tag.
#[derive(Clone, Debug)]
pub struct Candidates<'a> {
    targets: &'a [Target],
    tag: u16,
}

impl Iterator for Candidates<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let (first, rest) = self.targets.split_first()?;
        if first.tag != self.tag {
            self.targets = &[];
            return None;
        }
        self.targets = rest;
        Some(first.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksums::DigestConfig;
    use protocol::ProtocolVersion;
    use signature::{LayoutParams, generate_signature, sum_sizes_sqroot};
    use std::io::Cursor;

    fn set_for(data: &[u8], block: u32) -> SignatureSet {
        let params = LayoutParams::new(ProtocolVersion::DEFAULT, 16)
            .with_block_size(core::num::NonZeroU32::new(block));
        let layout = sum_sizes_sqroot(data.len() as u64, params).unwrap();
        generate_signature(Cursor::new(data.to_vec()), layout, &DigestConfig::default()).unwrap()
    }

    #[test]
    fn duplicate_blocks_share_a_run_in_block_order() {
        let mut data = b"abcdxyzwabcd".to_vec();
        data.extend_from_slice(b"abcd");
        let set = set_for(&data, 4);
        let mut index = HashIndex::new();
        index.build(&set);

        let tag = weak_tag(set.blocks()[0].weak());
        let run: Vec<u32> = index.candidates(tag).collect();
        assert_eq!(run, [0, 2, 3]);
    }

    #[test]
    fn rebuild_forgets_previous_tags() {
        let mut index = HashIndex::new();
        let first = set_for(b"first file contents", 5);
        index.build(&first);
        let old_tag = weak_tag(first.blocks()[0].weak());
        assert!(index.contains(old_tag));

        let second = set_for(&[0xee; 8], 8);
        index.build(&second);
        let new_tag = weak_tag(second.blocks()[0].weak());
        assert_eq!(index.len(), 1);
        if old_tag != new_tag {
            assert!(!index.contains(old_tag));
            assert_eq!(index.candidates(old_tag).count(), 0);
        }
        assert_eq!(index.candidates(new_tag).collect::<Vec<_>>(), [0]);
    }

    #[test]
    fn every_block_is_reachable_from_its_tag() {
        let data: Vec<u8> = (0..4_096u32).map(|i| (i * 7 % 256) as u8).collect();
        let set = set_for(&data, 16);
        let mut index = HashIndex::new();
        index.build(&set);
        for (i, block) in set.blocks().iter().enumerate() {
            assert!(index.candidates(weak_tag(block.weak())).any(|c| c as usize == i));
        }
    }
}
