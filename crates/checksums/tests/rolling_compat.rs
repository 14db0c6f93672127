//! Wire compatibility checks for the weak rolling checksum.
//!
//! Bytes are summed as signed chars with a zero offset:
//!
//! ```text
//! s1 = sum of (int8)byte[i]
//! s2 = sum of prefix sums of s1
//! value = (s1 & 0xffff) | (s2 << 16)
//! ```

use checksums::{CHAR_OFFSET, RollingChecksum, checksum1, weak_tag};

#[test]
fn char_offset_is_zero() {
    assert_eq!(CHAR_OFFSET, 0);
    assert_eq!(checksum1(b""), 0);
}

#[test]
fn ascii_bytes_follow_unsigned_formula() {
    // s1 = 0x12 + 0x34, s2 = 0x12 + s1
    let value = checksum1(&[0x12, 0x34]);
    assert_eq!(value & 0xffff, 0x46);
    assert_eq!(value >> 16, 0x58);
}

#[test]
fn high_bytes_subtract() {
    // 0xff is -1 and 0x02 is 2: s1 = 1, s2 = -1 + 1 = 0
    let value = checksum1(&[0xff, 0x02]);
    assert_eq!(value & 0xffff, 1);
    assert_eq!(value >> 16, 0);
}

#[test]
fn all_ff_block_is_negative_length() {
    let block = vec![0xffu8; 128];
    let value = checksum1(&block);
    // s1 = -128, s2 = -(1 + 2 + ... + 128) = -8256
    assert_eq!(value & 0xffff, (-128i32 as u32) & 0xffff);
    assert_eq!(value >> 16, (-8256i32 as u32) & 0xffff);
}

#[test]
fn all_zero_block_is_zero() {
    assert_eq!(checksum1(&[0u8; 1024]), 0);
}

#[test]
fn sliding_window_full_scan() {
    let file_data =
        b"The quick brown fox jumps over the lazy dog. \xe9\xe8\xff The quick brown fox jumps again.";
    let block_size = 16;

    let mut rolling = RollingChecksum::from_block(&file_data[..block_size]);
    for start in 1..=file_data.len() - block_size {
        rolling
            .roll(file_data[start - 1], file_data[start + block_size - 1])
            .unwrap();
        assert_eq!(
            rolling.value(),
            checksum1(&file_data[start..start + block_size]),
            "mismatch at offset {start}"
        );
        assert_eq!(rolling.tag(), weak_tag(rolling.value()));
    }
}

#[test]
fn typical_block_sizes_keep_length() {
    for block_size in [700usize, 2048, 8192] {
        let data: Vec<u8> = (0..block_size).map(|i| (i % 256) as u8).collect();
        let checksum = RollingChecksum::from_block(&data);
        assert_eq!(checksum.len(), block_size);
    }
}
