//! crates/signature/src/wire.rs
//!
//! Sum head: `int count, int blength, [int s2length], int remainder`, the
//! strong length only from protocol 27. Each block follows as
//! `int weak, s2length bytes`.

use std::io::{Read, Write};

use checksums::SUM_LENGTH;
use logging::trace_delta;
use protocol::{ProtocolError, ProtocolVersion, StreamChannel};

use crate::SignatureError;
use crate::block::BlockSignature;
use crate::layout::SignatureLayout;
use crate::set::SignatureSet;

/// Writes the sum head for `layout`.
#[allow(clippy::cast_possible_wrap)]
pub fn write_sum_head<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    layout: &SignatureLayout,
    protocol: ProtocolVersion,
) -> Result<(), ProtocolError> {
    channel.write_int(layout.block_count() as i32)?;
    channel.write_int(layout.block_length() as i32)?;
    if protocol.sends_sum_length() {
        channel.write_int(i32::from(layout.strong_length()))?;
    }
    channel.write_int(layout.remainder() as i32)
}

/// Reads and validates a sum head.
///
/// Before protocol 27 the strong length is not transmitted and
/// `checksum_length` is used instead.
#[allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]
pub fn read_sum_head<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    protocol: ProtocolVersion,
    checksum_length: u8,
) -> Result<SignatureLayout, SignatureError> {
    let count = channel.read_int()?;
    let block_length = channel.read_int()?;
    let strong_length = if protocol.sends_sum_length() {
        let length = channel.read_int()?;
        if !(0..=SUM_LENGTH as i32).contains(&length) {
            return Err(ProtocolError::InvalidChecksumLength(length).into());
        }
        length as u8
    } else {
        checksum_length
    };
    let remainder = channel.read_int()?;

    let invalid = SignatureError::InvalidHeader {
        count,
        block_length,
        remainder,
    };
    if count < 0 || block_length < 0 || remainder < 0 {
        return Err(invalid);
    }
    if count > 0 && (block_length == 0 || remainder >= block_length) {
        return Err(invalid);
    }

    trace_delta!("count={count} n={block_length} rem={remainder}");
    Ok(SignatureLayout::from_head(
        count as u32,
        block_length as u32,
        strong_length,
        remainder as u32,
    ))
}

/// Writes the sum head followed by every block.
pub fn write_signature<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    set: &SignatureSet,
    protocol: ProtocolVersion,
) -> Result<(), ProtocolError> {
    write_sum_head(channel, set.layout(), protocol)?;
    for block in set.blocks() {
        channel.write_uint(block.weak())?;
        channel.write_bytes(block.strong())?;
    }
    Ok(())
}

/// Reads a sum head and the blocks it announces.
pub fn read_signature<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    protocol: ProtocolVersion,
    checksum_length: u8,
) -> Result<SignatureSet, SignatureError> {
    let layout = read_sum_head(channel, protocol, checksum_length)?;
    let strong_length = usize::from(layout.strong_length());
    let mut blocks = Vec::with_capacity(layout.block_count().min(1 << 16) as usize);
    for index in 0..layout.block_count() {
        let weak = channel.read_uint()?;
        let strong = channel.read_bytes(strong_length)?;
        let length = layout.block_len_at(index);
        trace_delta!(trace: "chunk[{index}] len={length}");
        blocks.push(BlockSignature::new(
            weak,
            strong,
            length,
            layout.block_offset(index),
        ));
    }
    Ok(SignatureSet::new(layout, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::generate_signature;
    use crate::layout::{LayoutParams, sum_sizes_sqroot};
    use checksums::DigestConfig;
    use std::io::Cursor;

    type Channel = StreamChannel<Cursor<Vec<u8>>, Vec<u8>>;

    fn writer() -> Channel {
        StreamChannel::new(Cursor::new(Vec::new()), Vec::new())
    }

    fn reader(bytes: Vec<u8>) -> Channel {
        StreamChannel::new(Cursor::new(bytes), Vec::new())
    }

    fn ints(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn head_layout_depends_on_protocol() {
        let layout =
            sum_sizes_sqroot(1_500, LayoutParams::new(ProtocolVersion::DEFAULT, 2)).unwrap();

        let mut modern = writer();
        write_sum_head(&mut modern, &layout, ProtocolVersion::DEFAULT).unwrap();
        assert_eq!(modern.into_parts().1, ints(&[3, 700, 2, 100]));

        let mut legacy = writer();
        write_sum_head(&mut legacy, &layout, ProtocolVersion::new(26).unwrap()).unwrap();
        assert_eq!(legacy.into_parts().1, ints(&[3, 700, 100]));
    }

    #[test]
    fn legacy_head_uses_configured_length() {
        let mut channel = reader(ints(&[2, 700, 5]));
        let layout = read_sum_head(&mut channel, ProtocolVersion::new(26).unwrap(), 2).unwrap();
        assert_eq!(layout.strong_length(), 2);
        assert_eq!(layout.file_length(), 705);
    }

    #[test]
    fn oversized_strong_length_is_fatal() {
        let mut channel = reader(ints(&[1, 700, 17, 0]));
        let err = read_sum_head(&mut channel, ProtocolVersion::DEFAULT, 2).unwrap_err();
        assert!(matches!(
            err,
            SignatureError::Protocol(ProtocolError::InvalidChecksumLength(17))
        ));
        assert!(err.is_protocol());
    }

    #[test]
    fn inconsistent_head_is_rejected() {
        for head in [[-1, 700, 2, 0], [1, 0, 2, 0], [1, 700, 2, 700]] {
            let mut channel = reader(ints(&head));
            assert!(matches!(
                read_sum_head(&mut channel, ProtocolVersion::DEFAULT, 2),
                Err(SignatureError::InvalidHeader { .. })
            ));
        }
    }

    #[test]
    fn empty_head_is_all_zero() {
        let mut channel = writer();
        write_sum_head(&mut channel, &SignatureLayout::EMPTY, ProtocolVersion::DEFAULT).unwrap();
        let bytes = channel.into_parts().1;
        assert_eq!(bytes, ints(&[0, 0, 0, 0]));

        let set = read_signature(&mut reader(bytes), ProtocolVersion::DEFAULT, 2).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn signature_survives_the_wire() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        let layout =
            sum_sizes_sqroot(10_000, LayoutParams::new(ProtocolVersion::DEFAULT, 2)).unwrap();
        let set = generate_signature(Cursor::new(data), layout, &DigestConfig::new(7, 28)).unwrap();

        let mut out = writer();
        write_signature(&mut out, &set, ProtocolVersion::DEFAULT).unwrap();
        let bytes = out.into_parts().1;
        assert_eq!(bytes.len(), 16 + set.len() * (4 + 2));

        let received = read_signature(&mut reader(bytes), ProtocolVersion::DEFAULT, 2).unwrap();
        assert_eq!(received, set);
    }
}
