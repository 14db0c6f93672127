//! MD4 compression with protocol-dependent length padding.

use crate::{CSUM_CHUNK, SUM_LENGTH};

const IV: [u32; 4] = [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476];
const ROUND2: u32 = 0x5a82_7999;
const ROUND3: u32 = 0x6ed9_eba1;

/// How the final partial block is padded.
///
/// Protocols before 27 never pad input whose length is a multiple of 64
/// bytes and only record the low 32 bits of the bit length. Protocol 27 and
/// later always pad and record the full 64-bit length, which makes the
/// digest identical to RFC 1320 MD4.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Md4Padding {
    /// Pre-27 behaviour.
    Legacy,
    /// RFC 1320 behaviour.
    #[default]
    Standard,
}

impl Md4Padding {
    /// Selects the padding used by `protocol`.
    #[must_use]
    pub const fn for_protocol(protocol: u8) -> Self {
        if protocol >= 27 {
            Self::Standard
        } else {
            Self::Legacy
        }
    }

    /// Whether a trailing empty update is still fed when no residue is left.
    #[must_use]
    pub const fn pads_aligned_input(self) -> bool {
        matches!(self, Self::Standard)
    }
}

/// Incremental MD4-family digest.
///
/// [`update`](Self::update) consumes every whole 64-byte block of its input
/// and treats any remainder (or an empty slice) as the final block, padding
/// it immediately. Callers therefore feed exact 64-byte chunks and finish
/// with at most one short update before reading [`result`](Self::result).
///
/// # Examples
///
/// ```
/// use checksums::{Md4Padding, MdFour};
///
/// let mut md = MdFour::new(Md4Padding::Standard);
/// md.update(b"abc");
/// assert_eq!(md.result()[..4], [0xa4, 0x48, 0x01, 0x7a]);
/// ```
#[doc(alias = "mdfour")]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MdFour {
    state: [u32; 4],
    bits_lo: u32,
    bits_hi: u32,
    padding: Md4Padding,
}

impl MdFour {
    /// Creates a digest in its initial state.
    #[must_use]
    pub const fn new(padding: Md4Padding) -> Self {
        Self {
            state: IV,
            bits_lo: 0,
            bits_hi: 0,
            padding,
        }
    }

    /// One-shot digest of `data` in 64-byte steps.
    #[must_use]
    pub fn digest(data: &[u8], padding: Md4Padding) -> [u8; SUM_LENGTH] {
        let mut md = Self::new(padding);
        super::feed_chunked(&mut md, data);
        md.result()
    }

    /// Restores the initial state, keeping the padding mode.
    #[doc(alias = "mdfour_begin")]
    pub const fn begin(&mut self) {
        self.state = IV;
        self.bits_lo = 0;
        self.bits_hi = 0;
    }

    /// Padding mode of this digest.
    #[must_use]
    pub const fn padding(&self) -> Md4Padding {
        self.padding
    }

    /// Feeds `input`. A trailing partial block (or empty input) is padded and
    /// closes the message.
    #[doc(alias = "mdfour_update")]
    pub fn update(&mut self, input: &[u8]) {
        if input.is_empty() {
            self.tail(input);
            return;
        }

        let mut blocks = input.chunks_exact(CSUM_CHUNK);
        for block in &mut blocks {
            self.compress(block);
            self.add_bits(512);
        }
        let rest = blocks.remainder();
        if !rest.is_empty() {
            self.tail(rest);
        }
    }

    /// Returns the digest of everything fed so far.
    #[doc(alias = "mdfour_result")]
    #[must_use]
    pub fn result(&self) -> [u8; SUM_LENGTH] {
        let mut out = [0u8; SUM_LENGTH];
        for (slot, word) in out.chunks_exact_mut(4).zip(self.state) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    fn add_bits(&mut self, bits: u32) {
        let (lo, carry) = self.bits_lo.overflowing_add(bits);
        self.bits_lo = lo;
        if carry {
            self.bits_hi = self.bits_hi.wrapping_add(1);
        }
    }

    fn tail(&mut self, rest: &[u8]) {
        let n = rest.len() as u32;
        self.add_bits(n << 3);
        self.bits_hi = self.bits_hi.wrapping_add(n >> 29);

        let mut buf = [0u8; 2 * CSUM_CHUNK];
        buf[..rest.len()].copy_from_slice(rest);
        buf[rest.len()] = 0x80;

        let hi = match self.padding {
            Md4Padding::Standard => self.bits_hi,
            Md4Padding::Legacy => 0,
        };

        if rest.len() <= 55 {
            buf[56..60].copy_from_slice(&self.bits_lo.to_le_bytes());
            buf[60..64].copy_from_slice(&hi.to_le_bytes());
            self.compress(&buf[..CSUM_CHUNK]);
        } else {
            buf[120..124].copy_from_slice(&self.bits_lo.to_le_bytes());
            buf[124..128].copy_from_slice(&hi.to_le_bytes());
            self.compress(&buf[..CSUM_CHUNK]);
            self.compress(&buf[CSUM_CHUNK..]);
        }
    }

    fn compress(&mut self, block: &[u8]) {
        let mut x = [0u32; 16];
        for (word, bytes) in x.iter_mut().zip(block.chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }

        let [mut a, mut b, mut c, mut d] = self.state;

        for i in 0..4 {
            a = round1(a, b, c, d, x[4 * i], 3);
            d = round1(d, a, b, c, x[4 * i + 1], 7);
            c = round1(c, d, a, b, x[4 * i + 2], 11);
            b = round1(b, c, d, a, x[4 * i + 3], 19);
        }
        for i in 0..4 {
            a = round2(a, b, c, d, x[i], 3);
            d = round2(d, a, b, c, x[i + 4], 5);
            c = round2(c, d, a, b, x[i + 8], 9);
            b = round2(b, c, d, a, x[i + 12], 13);
        }
        for i in [0, 2, 1, 3] {
            a = round3(a, b, c, d, x[i], 3);
            d = round3(d, a, b, c, x[i + 8], 9);
            c = round3(c, d, a, b, x[i + 4], 11);
            b = round3(b, c, d, a, x[i + 12], 15);
        }

        self.state[0] = self.state[0].wrapping_add(a);
        self.state[1] = self.state[1].wrapping_add(b);
        self.state[2] = self.state[2].wrapping_add(c);
        self.state[3] = self.state[3].wrapping_add(d);
    }
}

impl Default for MdFour {
    fn default() -> Self {
        Self::new(Md4Padding::Standard)
    }
}

#[inline(always)]
const fn f(x: u32, y: u32, z: u32) -> u32 {
    (x & y) | (!x & z)
}

#[inline(always)]
const fn g(x: u32, y: u32, z: u32) -> u32 {
    (x & y) | (x & z) | (y & z)
}

#[inline(always)]
const fn h(x: u32, y: u32, z: u32) -> u32 {
    x ^ y ^ z
}

#[inline(always)]
const fn round1(a: u32, b: u32, c: u32, d: u32, k: u32, s: u32) -> u32 {
    a.wrapping_add(f(b, c, d)).wrapping_add(k).rotate_left(s)
}

#[inline(always)]
const fn round2(a: u32, b: u32, c: u32, d: u32, k: u32, s: u32) -> u32 {
    a.wrapping_add(g(b, c, d))
        .wrapping_add(k)
        .wrapping_add(ROUND2)
        .rotate_left(s)
}

#[inline(always)]
const fn round3(a: u32, b: u32, c: u32, d: u32, k: u32, s: u32) -> u32 {
    a.wrapping_add(h(b, c, d))
        .wrapping_add(k)
        .wrapping_add(ROUND3)
        .rotate_left(s)
}
