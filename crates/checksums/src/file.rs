//! Whole-file strong digests.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use fast_io::{MAX_MAP_SIZE, MapWindow};
use logging::trace_delta;

use crate::strong::{Md4Padding, MdFour};
use crate::{CSUM_CHUNK, SUM_LENGTH};

/// Unseeded strong digest of the file at `path`.
///
/// Returns `None` when the file cannot be opened, inspected or read. The
/// digest is never partially computed.
#[must_use]
pub fn file_checksum(path: &Path, padding: Md4Padding) -> Option<[u8; SUM_LENGTH]> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            trace_delta!("cannot open {} for checksum: {error}", path.display());
            return None;
        }
    };
    let len = match file.metadata() {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            trace_delta!("cannot stat {} for checksum: {error}", path.display());
            return None;
        }
    };
    source_checksum(file, len, padding)
}

/// Unseeded strong digest of the first `len` bytes of `source`.
#[must_use]
pub fn source_checksum<R: Read + Seek>(
    source: R,
    len: u64,
    padding: Md4Padding,
) -> Option<[u8; SUM_LENGTH]> {
    let mut map = MapWindow::new(source, len, MAX_MAP_SIZE, CSUM_CHUNK);
    let mut md = MdFour::new(padding);

    let mut offset = 0u64;
    while offset + CSUM_CHUNK as u64 <= len {
        md.update(map.map(offset, CSUM_CHUNK).ok()?);
        offset += CSUM_CHUNK as u64;
    }

    let rest = (len - offset) as usize;
    if rest > 0 || padding.pads_aligned_input() {
        md.update(map.map(offset, rest).ok()?);
    }

    if map.read_error() {
        return None;
    }
    Some(md.result())
}
