//! crates/signature/src/generation.rs
//!
//! Signature generation from a seekable basis file.

use std::io::{Read, Seek};

use checksums::{DigestConfig, checksum1};
use fast_io::{MAX_MAP_SIZE, MapWindow};
use logging::trace_delta;

use crate::SignatureError;
use crate::block::BlockSignature;
use crate::layout::SignatureLayout;
use crate::set::SignatureSet;

/// Computes the weak and strong sum of every block described by `layout`.
///
/// `source` must be positioned at offset zero and hold at least
/// `layout.file_length()` bytes; missing bytes read as zeros.
#[doc(alias = "generate_sums")]
pub fn generate_signature<R: Read + Seek>(
    source: R,
    layout: SignatureLayout,
    digest: &DigestConfig,
) -> Result<SignatureSet, SignatureError> {
    if layout.is_empty() {
        return Ok(SignatureSet::new(layout, Vec::new()));
    }

    let block_length = layout.block_length() as usize;
    let strong_length = usize::from(layout.strong_length());
    let mut map = MapWindow::new(source, layout.file_length(), MAX_MAP_SIZE, block_length);
    let mut blocks = Vec::with_capacity(layout.block_count() as usize);

    for index in 0..layout.block_count() {
        let offset = layout.block_offset(index);
        let length = layout.block_len_at(index);
        let data = map.map(offset, length as usize)?;
        let weak = checksum1(data);
        let mut strong = digest.block_digest(data).to_vec();
        strong.truncate(strong_length);
        trace_delta!(trace: "chunk[{index}] offset={offset} len={length} sum1={weak:08x}");
        blocks.push(BlockSignature::new(weak, strong, length, offset));
    }

    Ok(SignatureSet::new(layout, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutParams, sum_sizes_sqroot};
    use checksums::RollingChecksum;
    use protocol::ProtocolVersion;
    use std::io::Cursor;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn blocks_cover_the_file() {
        let data = sample(5_000);
        let layout =
            sum_sizes_sqroot(5_000, LayoutParams::new(ProtocolVersion::DEFAULT, 16)).unwrap();
        let digest = DigestConfig::new(0x1234, 28);
        let set = generate_signature(Cursor::new(data.clone()), layout, &digest).unwrap();

        assert_eq!(set.len(), 8);
        let mut offset = 0usize;
        for block in set.blocks() {
            let chunk = &data[offset..offset + block.length() as usize];
            assert_eq!(block.offset(), offset as u64);
            assert_eq!(block.weak(), RollingChecksum::from_block(chunk).value());
            assert_eq!(block.strong(), &digest.block_digest(chunk)[..]);
            offset += chunk.len();
        }
        assert_eq!(offset, data.len());
        assert_eq!(set.blocks().last().unwrap().length(), 5_000 - 7 * 700);
    }

    #[test]
    fn strong_sums_are_truncated() {
        let data = sample(1_500);
        let layout =
            sum_sizes_sqroot(1_500, LayoutParams::new(ProtocolVersion::DEFAULT, 2)).unwrap();
        let set = generate_signature(Cursor::new(data), layout, &DigestConfig::default()).unwrap();
        assert!(set.blocks().iter().all(|block| block.strong().len() == 2));
    }

    #[test]
    fn empty_layout_has_no_blocks() {
        let set = generate_signature(
            Cursor::new(Vec::new()),
            SignatureLayout::EMPTY,
            &DigestConfig::default(),
        )
        .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn generates_from_real_file() {
        use std::io::Write;

        let data = sample(300_000);
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&data).unwrap();
        std::io::Seek::rewind(&mut file).unwrap();

        let layout =
            sum_sizes_sqroot(300_000, LayoutParams::new(ProtocolVersion::DEFAULT, 2)).unwrap();
        let digest = DigestConfig::default();
        let from_file = generate_signature(file, layout, &digest).unwrap();
        let from_memory = generate_signature(Cursor::new(data), layout, &digest).unwrap();
        assert_eq!(from_file, from_memory);
    }
}
