//! Rolling-checksum scan of a new file against a basis signature.
//!
//! The scan keeps a weak checksum over a window of one block length. At
//! every offset the window's tag selects candidate blocks; a candidate must
//! agree on the full weak sum, the block length and finally the truncated
//! strong sum. A hit emits the bytes since the previous hit as literal data
//! followed by the block reference, and the scan restarts one block later.

use std::io::{Read, Seek};

use checksums::{DigestConfig, RollingChecksum, SeededSum};
use fast_io::MapWindow;
use logging::trace_delta;
use protocol::CHUNK_SIZE;
use signature::SignatureSet;

use crate::{HashIndex, MatchError, MatchStats, TokenSink};

/// Block flag: the basis block already sits at its final offset.
pub const SUMFLG_SAME_OFFSET: u8 = 1 << 0;

/// Per-session matcher settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MatchOptions {
    /// The receiver rewrites the destination in place.
    pub inplace: bool,
    /// The receiver keeps a backup of the destination.
    pub make_backups: bool,
    /// Bytes of the whole-file digest put on the wire.
    pub file_digest_len: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            inplace: false,
            make_backups: false,
            file_digest_len: checksums::SUM_LENGTH,
        }
    }
}

/// What a call to [`Scan::matched`] terminates the pending literal run with.
#[derive(Clone, Copy, Debug)]
enum Emit {
    /// A matched basis block.
    Block(usize),
    /// Nothing; the literal run is only flushed.
    Flush,
    /// The end-of-file token.
    End,
}

/// Reusable matcher; keeps the tag table and running totals between files.
#[derive(Debug)]
pub struct Matcher {
    digest: DigestConfig,
    options: MatchOptions,
    index: HashIndex,
    totals: MatchStats,
}

impl Matcher {
    /// Creates a matcher for one session.
    #[must_use]
    pub fn new(digest: DigestConfig, options: MatchOptions) -> Self {
        Self {
            digest,
            options,
            index: HashIndex::new(),
            totals: MatchStats::default(),
        }
    }

    /// Totals over every file matched so far.
    #[must_use]
    pub const fn totals(&self) -> &MatchStats {
        &self.totals
    }

    /// Matches the file behind `map` against `set`, writing tokens and the
    /// whole-file digest to `sink`.
    ///
    /// Without blocks, or for an empty file, everything is sent as literal
    /// data. The first digest byte is bumped when the source reported a read
    /// error so the receiver rejects the result.
    #[doc(alias = "match_sums")]
    pub fn match_file<R, S>(
        &mut self,
        sink: &mut S,
        set: &SignatureSet,
        map: &mut MapWindow<R>,
    ) -> Result<MatchStats, MatchError>
    where
        R: Read + Seek,
        S: TokenSink + ?Sized,
    {
        let len = map.file_len();
        let mut scan = Scan {
            sink,
            set,
            map,
            sum: self.digest.file_sum(),
            last_match: 0,
            stats: MatchStats::default(),
        };

        if len > 0 && !set.is_empty() {
            self.index.build(set);
            trace_delta!("built hash table");
            scan.hash_search(&self.index, &self.digest, &self.options)?;
            trace_delta!("done hash search");
        } else {
            let chunk = CHUNK_SIZE as u64;
            let mut j = 0;
            while j + chunk < len {
                let n = chunk.min(len - chunk - j);
                scan.matched(j + n, Emit::Flush)?;
                j += chunk;
            }
            scan.matched(len, Emit::End)?;
        }

        let Scan {
            sink, map, sum, stats, ..
        } = scan;
        let mut digest = sum.finish();
        if map.read_error() {
            digest[0] = digest[0].wrapping_add(1);
        }
        let digest_len = self.options.file_digest_len.min(digest.len());
        sink.file_digest(&digest[..digest_len])?;

        trace_delta!(
            "false_alarms={} hash_hits={} matches={}",
            stats.false_alarms,
            stats.hash_hits,
            stats.matches
        );
        self.totals += stats;
        Ok(stats)
    }
}

struct Scan<'a, R, S: ?Sized> {
    sink: &'a mut S,
    set: &'a SignatureSet,
    map: &'a mut MapWindow<R>,
    sum: SeededSum,
    last_match: u64,
    stats: MatchStats,
}

impl<R: Read + Seek, S: TokenSink + ?Sized> Scan<'_, R, S> {
    /// Sends the literal bytes in `[last_match, offset)`, then the token for
    /// `emit`, feeding everything it covers into the whole-file digest.
    #[allow(clippy::cast_possible_truncation)]
    fn matched(&mut self, offset: u64, emit: Emit) -> Result<(), MatchError> {
        let literal = offset - self.last_match;
        if let Emit::Block(index) = emit {
            trace_delta!(trace:
                "match at {offset} last_match={} j={index} len={} n={literal}",
                self.last_match,
                self.set.blocks()[index].length()
            );
        }

        let chunk = CHUNK_SIZE as u64;
        let mut done = 0;
        while done < literal {
            let n = chunk.min(literal - done);
            let data = self.map.map(self.last_match + done, n as usize)?;
            self.sink.literal(data)?;
            self.sum.update(data);
            done += n;
        }
        self.stats.literal_data += literal;

        match emit {
            Emit::Block(index) => {
                self.sink.block(index as u32)?;
                let length = u64::from(self.set.blocks()[index].length());
                let mut done = 0;
                while done < length {
                    let n = chunk.min(length - done);
                    let data = self.map.map(offset + done, n as usize)?;
                    self.sum.update(data);
                    done += n;
                }
                self.stats.matched_data += length;
                self.last_match = offset + length;
            }
            Emit::Flush => self.last_match = offset,
            Emit::End => {
                self.sink.end()?;
                self.last_match = offset;
            }
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn hash_search(
        &mut self,
        index: &HashIndex,
        digest: &DigestConfig,
        options: &MatchOptions,
    ) -> Result<(), MatchError> {
        let set = self.set;
        let blocks = set.blocks();
        let len = self.map.file_len();
        let block_length = u64::from(set.layout().block_length());
        let chunk = CHUNK_SIZE as u64;
        trace_delta!(
            "hash search blength={block_length} len={len} count={}",
            blocks.len()
        );

        let mut want_i = 0usize;
        let mut k = block_length.min(len) as usize;
        let mut rolling = RollingChecksum::from_block(self.map.map(0, k)?);

        let last_length = blocks.last().map_or(0, |block| i64::from(block.length()));
        let end = len as i64 + 1 - last_length;
        let mut offset = 0u64;

        loop {
            let tag = rolling.tag();
            if index.contains(tag) {
                self.stats.hash_hits += 1;
                let weak = rolling.value();
                let mut strong: Option<[u8; checksums::SUM_LENGTH]> = None;

                for candidate in index.candidates(tag) {
                    let mut i = candidate as usize;
                    let block = &blocks[i];
                    if weak != block.weak() {
                        continue;
                    }
                    let l = block_length.min(len - offset);
                    if l != u64::from(block.length()) {
                        continue;
                    }

                    trace_delta!(trace: "potential match at {offset} target={i} sum={weak:08x}");
                    let strong_sum = match strong {
                        Some(sum) => sum,
                        None => {
                            let sum = digest.block_digest(self.map.map(offset, l as usize)?);
                            strong = Some(sum);
                            sum
                        }
                    };
                    if !block.strong_matches(&strong_sum) {
                        self.stats.false_alarms += 1;
                        continue;
                    }

                    // Prefer the block that follows the previous match so
                    // in-place updates copy in order.
                    if i != want_i && want_i < blocks.len() {
                        let wanted = &blocks[want_i];
                        if (!options.inplace
                            || options.make_backups
                            || wanted.offset() >= offset
                            || wanted.flags() & SUMFLG_SAME_OFFSET != 0)
                            && weak == wanted.weak()
                            && wanted.strong_matches(&strong_sum)
                        {
                            i = want_i;
                        }
                    }
                    want_i = i + 1;

                    self.matched(offset, Emit::Block(i))?;
                    offset += u64::from(blocks[i].length()) - 1;
                    k = block_length.min(len - offset) as usize;
                    rolling = RollingChecksum::from_block(self.map.map(offset, k)?);
                    self.stats.matches += 1;
                    break;
                }
            }

            let backup = offset.saturating_sub(self.last_match);
            let more = offset + (k as u64) < len;
            let start = offset - backup;
            let span = backup as usize + k + usize::from(more);
            let window = self.map.map(start, span)?;
            let outgoing = window[backup as usize];
            if more {
                rolling.roll(outgoing, window[backup as usize + k])?;
            } else {
                rolling.shrink(outgoing)?;
                k -= 1;
            }

            if backup >= chunk + block_length && end - offset as i64 > chunk as i64 {
                self.matched(offset - block_length, Emit::Flush)?;
            }

            offset += 1;
            if offset as i64 >= end {
                break;
            }
        }

        self.matched(len, Emit::End)
    }
}
