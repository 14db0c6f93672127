//! Weak rolling checksum (`checksum1`).
//!
//! Bytes are summed as signed values (`-128..=127`). Peers that sum unsigned
//! bytes produce different weak sums for any block containing a byte above
//! `0x7f`, so the sign extension is part of the wire contract.

use thiserror::Error;

/// Offset added to every byte before summation. Always zero on the wire.
pub const CHAR_OFFSET: u32 = 0;

/// Errors raised by the sliding operations of [`RollingChecksum`].
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum RollingError {
    /// The window is empty, so there is no outgoing byte to remove.
    #[error("rolling checksum requires a non-empty window")]
    EmptyWindow,
    /// The window length does not fit the 32-bit arithmetic of the sum.
    #[error("rolling checksum window of {len} bytes exceeds 32-bit limit")]
    WindowTooLarge {
        /// Number of bytes in the window when the error was raised.
        len: usize,
    },
}

#[inline(always)]
const fn signed(byte: u8) -> u32 {
    (byte as i8 as i32 as u32).wrapping_add(CHAR_OFFSET)
}

/// Weak checksum state over a window of bytes.
///
/// `s1` is the byte sum and `s2` the sum of running prefix sums. Both are kept
/// unmasked and only folded into 16-bit halves by [`value`](Self::value).
///
/// # Examples
///
/// ```
/// use checksums::RollingChecksum;
///
/// let data = b"abcdefgh";
/// let mut rolling = RollingChecksum::from_block(&data[..4]);
/// rolling.roll(data[0], data[4]).unwrap();
/// assert_eq!(rolling.value(), RollingChecksum::from_block(&data[1..5]).value());
/// ```
#[doc(alias = "rsum")]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RollingChecksum {
    s1: u32,
    s2: u32,
    len: usize,
}

impl RollingChecksum {
    /// Creates an empty checksum.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            s1: 0,
            s2: 0,
            len: 0,
        }
    }

    /// Computes the checksum of `block` from scratch.
    #[doc(alias = "get_checksum1")]
    #[must_use]
    pub fn from_block(block: &[u8]) -> Self {
        let mut checksum = Self::new();
        checksum.update(block);
        checksum
    }

    /// Appends `chunk` to the window.
    pub fn update(&mut self, chunk: &[u8]) {
        let mut s1 = self.s1;
        let mut s2 = self.s2;

        let mut quads = chunk.chunks_exact(4);
        for quad in &mut quads {
            let b1 = signed(quad[0]);
            let b2 = signed(quad[1]);
            let b3 = signed(quad[2]);
            let b4 = signed(quad[3]);
            s2 = s2
                .wrapping_add(s1.wrapping_add(b1).wrapping_mul(4))
                .wrapping_add(b2.wrapping_mul(3))
                .wrapping_add(b3.wrapping_mul(2))
                .wrapping_add(b4);
            s1 = s1
                .wrapping_add(b1)
                .wrapping_add(b2)
                .wrapping_add(b3)
                .wrapping_add(b4);
        }
        for &byte in quads.remainder() {
            s1 = s1.wrapping_add(signed(byte));
            s2 = s2.wrapping_add(s1);
        }

        self.s1 = s1;
        self.s2 = s2;
        self.len += chunk.len();
    }

    /// Slides the window forward by one byte.
    ///
    /// `outgoing` must be the first byte of the current window and `incoming`
    /// the byte immediately after it.
    pub fn roll(&mut self, outgoing: u8, incoming: u8) -> Result<(), RollingError> {
        let len = self.window_len()?;
        let out = signed(outgoing);
        self.s1 = self.s1.wrapping_sub(out);
        self.s2 = self.s2.wrapping_sub(len.wrapping_mul(out));
        self.s1 = self.s1.wrapping_add(signed(incoming));
        self.s2 = self.s2.wrapping_add(self.s1);
        Ok(())
    }

    /// Drops the first byte of the window without appending a new one.
    ///
    /// Used when the window reaches the end of the file and shrinks.
    pub fn shrink(&mut self, outgoing: u8) -> Result<(), RollingError> {
        let len = self.window_len()?;
        let out = signed(outgoing);
        self.s1 = self.s1.wrapping_sub(out);
        self.s2 = self.s2.wrapping_sub(len.wrapping_mul(out));
        self.len -= 1;
        Ok(())
    }

    fn window_len(&self) -> Result<u32, RollingError> {
        if self.len == 0 {
            return Err(RollingError::EmptyWindow);
        }
        u32::try_from(self.len).map_err(|_| RollingError::WindowTooLarge { len: self.len })
    }

    /// Resets the state to an empty window.
    pub const fn reset(&mut self) {
        self.s1 = 0;
        self.s2 = 0;
        self.len = 0;
    }

    /// Number of bytes currently in the window.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the window is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Packed 32-bit value, `(s1 & 0xffff) | (s2 << 16)`.
    #[must_use]
    pub const fn value(&self) -> u32 {
        (self.s1 & 0xffff) | (self.s2 << 16)
    }

    /// 16-bit hash-table tag of the current value.
    #[must_use]
    pub const fn tag(&self) -> u16 {
        (self.s1.wrapping_add(self.s2) & 0xffff) as u16
    }
}

/// Weak checksum of `block`.
#[doc(alias = "get_checksum1")]
#[must_use]
pub fn checksum1(block: &[u8]) -> u32 {
    RollingChecksum::from_block(block).value()
}

/// Folds a packed weak checksum into its 16-bit hash-table tag.
#[must_use]
pub const fn weak_tag(weak: u32) -> u16 {
    ((weak & 0xffff).wrapping_add(weak >> 16) & 0xffff) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn reference(block: &[u8]) -> u32 {
        let mut s1: i64 = 0;
        let mut s2: i64 = 0;
        for &byte in block {
            s1 += i64::from(byte as i8);
            s2 += s1;
        }
        ((s1 as u32) & 0xffff) | ((s2 as u32) << 16)
    }

    #[test]
    fn empty_block_is_zero() {
        assert_eq!(checksum1(b""), 0);
        assert!(RollingChecksum::new().is_empty());
    }

    #[test]
    fn high_bytes_are_signed() {
        let weak = checksum1(&[0xff]);
        assert_eq!(weak & 0xffff, 0xffff);
        assert_eq!(weak >> 16, 0xffff);
        assert_eq!(checksum1(&[0x80]) & 0xffff, 0xff80);
        assert_eq!(checksum1(&[0x7f]), 0x007f_007f);
    }

    #[test]
    fn unrolled_loop_matches_scalar_reference() {
        for len in 0..=17 {
            let block: Vec<u8> = (0..len).map(|i| (i * 37 + 200) as u8).collect();
            assert_eq!(checksum1(&block), reference(&block), "len {len}");
        }
    }

    #[test]
    fn tag_matches_value_fold() {
        let checksum = RollingChecksum::from_block(b"the quick brown fox");
        assert_eq!(checksum.tag(), weak_tag(checksum.value()));
    }

    #[test]
    fn roll_on_empty_window_fails() {
        let mut checksum = RollingChecksum::new();
        assert_eq!(checksum.roll(1, 2), Err(RollingError::EmptyWindow));
        assert_eq!(checksum.shrink(1), Err(RollingError::EmptyWindow));
    }

    #[test]
    fn shrink_matches_suffix() {
        let data = b"\x90shrinking window\xfe";
        let mut checksum = RollingChecksum::from_block(data);
        for start in 1..data.len() {
            checksum.shrink(data[start - 1]).unwrap();
            assert_eq!(checksum.value(), checksum1(&data[start..]));
            assert_eq!(checksum.len(), data.len() - start);
        }
    }

    #[test]
    fn ten_thousand_random_windows_roll_like_recompute() {
        let mut rng = StdRng::seed_from_u64(0x5eed_0001);
        for _ in 0..10_000 {
            let window = rng.gen_range(1..=4096);
            let extra = rng.gen_range(1..=8);
            let data: Vec<u8> = (0..window + extra).map(|_| rng.r#gen()).collect();

            let mut rolling = RollingChecksum::from_block(&data[..window]);
            for start in 1..=extra {
                rolling
                    .roll(data[start - 1], data[start + window - 1])
                    .unwrap();
            }
            let fresh = RollingChecksum::from_block(&data[extra..extra + window]);
            assert_eq!(rolling.value(), fresh.value(), "window {window}");
            assert_eq!(rolling.tag(), fresh.tag());
        }
    }

    proptest! {
        #[test]
        fn rolling_matches_recompute_at_every_offset(
            data in proptest::collection::vec(any::<u8>(), 2..512),
            window in 1usize..64,
        ) {
            let window = window.min(data.len() - 1);
            let mut rolling = RollingChecksum::from_block(&data[..window]);
            for start in 1..=data.len() - window {
                rolling.roll(data[start - 1], data[start + window - 1]).unwrap();
                prop_assert_eq!(rolling.value(), reference(&data[start..start + window]));
            }
        }

        #[test]
        fn chunked_update_matches_single_pass(
            data in proptest::collection::vec(any::<u8>(), 0..300),
            split in 0usize..300,
        ) {
            let split = split.min(data.len());
            let mut chunked = RollingChecksum::new();
            chunked.update(&data[..split]);
            chunked.update(&data[split..]);
            prop_assert_eq!(chunked, RollingChecksum::from_block(&data));
        }
    }
}
