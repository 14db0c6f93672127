//! Streaming seeded digest used for whole-file verification.

use super::{Md4Padding, MdFour};
use crate::{CSUM_CHUNK, SUM_LENGTH};

/// Streaming digest whose message starts with the little-endian seed.
///
/// Input may arrive in arbitrary slices; partial 64-byte chunks are buffered
/// between calls so the engine only ever sees whole blocks until
/// [`finish`](Self::finish).
///
/// # Examples
///
/// ```
/// use checksums::{Md4Padding, SeededSum};
///
/// let mut split = SeededSum::new(7, Md4Padding::Standard);
/// split.update(b"hello ");
/// split.update(b"world");
///
/// let mut whole = SeededSum::new(7, Md4Padding::Standard);
/// whole.update(b"hello world");
/// assert_eq!(split.finish(), whole.finish());
/// ```
#[doc(alias = "sum_init")]
#[derive(Clone, Debug)]
pub struct SeededSum {
    md: MdFour,
    residue: [u8; CSUM_CHUNK],
    residue_len: usize,
}

impl SeededSum {
    /// Starts a sum and feeds the 4-byte seed, even when it is zero.
    #[must_use]
    pub fn new(seed: i32, padding: Md4Padding) -> Self {
        let mut sum = Self {
            md: MdFour::new(padding),
            residue: [0; CSUM_CHUNK],
            residue_len: 0,
        };
        sum.update(&seed.to_le_bytes());
        sum
    }

    /// Appends `data` to the message.
    #[doc(alias = "sum_update")]
    pub fn update(&mut self, mut data: &[u8]) {
        if self.residue_len + data.len() < CSUM_CHUNK {
            self.residue[self.residue_len..self.residue_len + data.len()].copy_from_slice(data);
            self.residue_len += data.len();
            return;
        }

        if self.residue_len != 0 {
            let fill = CSUM_CHUNK - self.residue_len;
            self.residue[self.residue_len..].copy_from_slice(&data[..fill]);
            self.md.update(&self.residue);
            data = &data[fill..];
        }

        let mut chunks = data.chunks_exact(CSUM_CHUNK);
        for chunk in &mut chunks {
            self.md.update(chunk);
        }
        let rest = chunks.remainder();
        self.residue[..rest.len()].copy_from_slice(rest);
        self.residue_len = rest.len();
    }

    /// Closes the message and returns the digest.
    #[doc(alias = "sum_end")]
    #[must_use]
    pub fn finish(mut self) -> [u8; SUM_LENGTH] {
        if self.residue_len != 0 || self.md.padding().pads_aligned_input() {
            let residue = self.residue;
            self.md.update(&residue[..self.residue_len]);
        }
        self.md.result()
    }
}
