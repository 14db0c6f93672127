//! Sliding window over a seekable byte source.
//!
//! The window starts at the first requested offset and spans the configured
//! map size (rounded up to a multiple of the block length), clamped to the
//! end of the file. Requests that fall inside the current window are served
//! without I/O. A request that starts inside the window and extends past it
//! keeps the overlapping tail and only reads the new bytes.

use std::io::{self, Read, Seek, SeekFrom};

use logging::trace_io;
use thiserror::Error;

/// Default upper bound on the window size.
pub const MAX_MAP_SIZE: usize = 256 * 1024;

/// Failures that prevent a window from being mapped.
#[derive(Debug, Error)]
pub enum MapError {
    /// The source refused to seek to the read start.
    #[error("seek to offset {offset} failed: {source}")]
    Seek {
        /// Requested absolute position.
        offset: u64,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The requested offset lies past the end of the file.
    #[error("offset {offset} is beyond the end of a {file_len}-byte file")]
    OutOfRange {
        /// Requested offset.
        offset: u64,
        /// File length the window was created with.
        file_len: u64,
    },
}

/// Lazily refilled view over `source`.
///
/// Short reads are zero-filled rather than reported; a failed read also sets
/// [`read_error`](Self::read_error) so callers can flag the data as suspect.
#[doc(alias = "map_file")]
#[derive(Debug)]
pub struct MapWindow<R> {
    source: R,
    buffer: Vec<u8>,
    window_start: u64,
    window_len: usize,
    file_len: u64,
    default_window: usize,
    cursor: u64,
    read_error: bool,
}

impl<R: Read + Seek> MapWindow<R> {
    /// Creates a window over the first `file_len` bytes of `source`.
    ///
    /// `map_size` is rounded up to a multiple of `block_len` when the latter
    /// is non-zero. The source is assumed to be positioned at offset zero.
    #[must_use]
    pub fn new(source: R, file_len: u64, map_size: usize, block_len: usize) -> Self {
        let mut default_window = map_size;
        if block_len != 0 && default_window % block_len != 0 {
            default_window += block_len - default_window % block_len;
        }
        Self {
            source,
            buffer: Vec::new(),
            window_start: 0,
            window_len: 0,
            file_len,
            default_window,
            cursor: 0,
            read_error: false,
        }
    }

    /// Maps `[offset, offset + len)` and returns the bytes.
    ///
    /// The range is silently clamped to the end of the file, so the slice may
    /// be shorter than `len`.
    pub fn map(&mut self, offset: u64, len: usize) -> Result<&[u8], MapError> {
        let len = self.clamp(offset, len)?;
        if len == 0 {
            return Ok(&[]);
        }
        let view = self.map_ptr(offset, len)?;
        Ok(&self.buffer[view..view + len])
    }

    /// Maps `[offset, offset + len)` and returns its position inside
    /// [`buffer`](Self::buffer).
    pub fn map_ptr(&mut self, offset: u64, len: usize) -> Result<usize, MapError> {
        let len = self.clamp(offset, len)?;
        if len == 0 {
            return Ok(0);
        }

        let end = offset + len as u64;
        let old_end = self.window_start + self.window_len as u64;
        if offset >= self.window_start && end <= old_end {
            return Ok((offset - self.window_start) as usize);
        }

        let window_start = offset;
        let mut window_size = self.default_window;
        if window_start + window_size as u64 > self.file_len {
            window_size = (self.file_len - window_start) as usize;
        }
        if end > window_start + window_size as u64 {
            window_size = (end - window_start) as usize;
        }

        if window_size > self.buffer.len() {
            self.buffer.resize(window_size, 0);
        }

        let (read_start, read_offset) = if window_start >= self.window_start
            && window_start < old_end
            && window_start + window_size as u64 >= old_end
        {
            let read_offset = (old_end - window_start) as usize;
            let keep_from = (window_start - self.window_start) as usize;
            self.buffer.copy_within(keep_from..keep_from + read_offset, 0);
            (old_end, read_offset)
        } else {
            (window_start, 0)
        };
        let read_size = window_size - read_offset;

        if read_size == 0 {
            tracing::warn!("unexpected read size of 0 while mapping offset {offset}");
        } else if let Err(error) = self.fill(read_start, read_offset, read_size) {
            // The buffer may already hold shifted bytes.
            self.window_len = 0;
            return Err(error);
        }

        self.window_start = window_start;
        self.window_len = window_size;
        Ok((offset - window_start) as usize)
    }

    fn clamp(&self, offset: u64, len: usize) -> Result<usize, MapError> {
        if offset > self.file_len {
            return Err(MapError::OutOfRange {
                offset,
                file_len: self.file_len,
            });
        }
        let available = self.file_len - offset;
        Ok(if len as u64 > available {
            available as usize
        } else {
            len
        })
    }

    fn fill(&mut self, read_start: u64, read_offset: usize, read_size: usize) -> Result<(), MapError> {
        if self.cursor != read_start {
            self.source
                .seek(SeekFrom::Start(read_start))
                .map_err(|source| MapError::Seek {
                    offset: read_start,
                    source,
                })?;
            self.cursor = read_start;
        }

        let target = &mut self.buffer[read_offset..read_offset + read_size];
        let mut filled = 0;
        while filled < target.len() {
            match self.source.read(&mut target[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    tracing::warn!("read failed at offset {}: {error}", read_start + filled as u64);
                    self.read_error = true;
                    break;
                }
            }
        }
        if filled < read_size {
            trace_io!("short read: {filled} of {read_size} bytes at {read_start}, zero-filling");
            target[filled..].fill(0);
        }
        self.cursor += filled as u64;
        Ok(())
    }

    /// Backing buffer addressed by [`map_ptr`](Self::map_ptr).
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Length of the mapped file.
    #[must_use]
    pub const fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Current window as `(start, len)`.
    #[must_use]
    pub const fn window(&self) -> (u64, usize) {
        (self.window_start, self.window_len)
    }

    /// Whether any read from the source failed.
    #[must_use]
    pub const fn read_error(&self) -> bool {
        self.read_error
    }

    /// Releases the window and returns the source.
    pub fn into_inner(self) -> R {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::Cell;
    use std::io::Cursor;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Counters {
        reads: Rc<Cell<usize>>,
        seeks: Rc<Cell<usize>>,
    }

    struct CountingSource {
        inner: Cursor<Vec<u8>>,
        counters: Counters,
    }

    impl Read for CountingSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.counters.reads.set(self.counters.reads.get() + 1);
            self.inner.read(buf)
        }
    }

    impl Seek for CountingSource {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.counters.seeks.set(self.counters.seeks.get() + 1);
            self.inner.seek(pos)
        }
    }

    fn counting(data: Vec<u8>) -> (CountingSource, Counters) {
        let counters = Counters::default();
        let source = CountingSource {
            inner: Cursor::new(data),
            counters: counters.clone(),
        };
        (source, counters)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn map_size_rounds_up_to_block_multiple() {
        let data = pattern(1000);
        let mut map = MapWindow::new(Cursor::new(data), 1000, 100, 64);
        map.map(0, 1).unwrap();
        assert_eq!(map.window(), (0, 128));
    }

    #[test]
    fn covered_range_does_not_read_again() {
        let data = pattern(4096);
        let (source, counters) = counting(data.clone());
        let mut map = MapWindow::new(source, 4096, 1024, 0);

        let first = map.map(100, 200).unwrap().to_vec();
        let reads = counters.reads.get();
        for _ in 0..5 {
            assert_eq!(map.map(100, 200).unwrap(), first.as_slice());
            assert_eq!(map.map(150, 50).unwrap(), &data[150..200]);
        }
        assert_eq!(counters.reads.get(), reads);
        assert_eq!(first, &data[100..300]);
    }

    #[test]
    fn overlapping_request_reuses_tail() {
        let data = pattern(4096);
        let (source, counters) = counting(data.clone());
        let mut map = MapWindow::new(source, 4096, 1024, 0);

        map.map(0, 100).unwrap();
        assert_eq!(map.window(), (0, 1024));
        // Starts inside the window, ends past it: only the new bytes are read.
        assert_eq!(map.map(1000, 100).unwrap(), &data[1000..1100]);
        assert_eq!(map.window(), (1000, 1024));
        assert_eq!(counters.seeks.get(), 0, "cursor already at old window end");
        assert_eq!(map.map(1000, 1024).unwrap(), &data[1000..2024]);
    }

    #[test]
    fn disjoint_request_seeks_and_refills() {
        let data = pattern(10_000);
        let (source, counters) = counting(data.clone());
        let mut map = MapWindow::new(source, 10_000, 512, 0);

        map.map(0, 10).unwrap();
        assert_eq!(map.map(8000, 10).unwrap(), &data[8000..8010]);
        assert_eq!(counters.seeks.get(), 1);
    }

    #[test]
    fn request_is_clamped_to_file_end() {
        let data = pattern(300);
        let mut map = MapWindow::new(Cursor::new(data.clone()), 300, 128, 0);
        assert_eq!(map.map(250, 128).unwrap(), &data[250..]);
        assert!(map.map(300, 10).unwrap().is_empty());
        assert!(matches!(
            map.map(301, 1),
            Err(MapError::OutOfRange { offset: 301, .. })
        ));
    }

    #[test]
    fn window_grows_to_cover_large_request() {
        let data = pattern(5000);
        let mut map = MapWindow::new(Cursor::new(data.clone()), 5000, 256, 0);
        assert_eq!(map.map(10, 3000).unwrap(), &data[10..3010]);
        assert_eq!(map.window(), (10, 3000));
    }

    #[test]
    fn truncated_source_is_zero_filled() {
        let data = pattern(100);
        let mut map = MapWindow::new(Cursor::new(data.clone()), 150, 64, 0);
        let bytes = map.map(80, 70).unwrap();
        assert_eq!(&bytes[..20], &data[80..]);
        assert!(bytes[20..].iter().all(|&b| b == 0));
        assert!(!map.read_error());
    }

    #[test]
    fn failed_read_sets_read_error() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("device gone"))
            }
        }
        impl Seek for Broken {
            fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
                Ok(0)
            }
        }

        let mut map = MapWindow::new(Broken, 32, 32, 0);
        assert_eq!(map.map(0, 32).unwrap(), &[0u8; 32]);
        assert!(map.read_error());
    }

    #[test]
    fn failed_seek_during_slide_drops_the_window() {
        struct FlakySeek {
            inner: Cursor<Vec<u8>>,
            fail_next: Rc<Cell<bool>>,
        }
        impl Read for FlakySeek {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.inner.read(buf)
            }
        }
        impl Seek for FlakySeek {
            fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
                if self.fail_next.replace(false) {
                    return Err(io::Error::other("seek refused"));
                }
                self.inner.seek(pos)
            }
        }

        // 40 real bytes behind a 200-byte length leave the cursor short of
        // the window end, so extending the window has to seek.
        let data = pattern(40);
        let fail_next = Rc::new(Cell::new(false));
        let source = FlakySeek {
            inner: Cursor::new(data.clone()),
            fail_next: Rc::clone(&fail_next),
        };
        let mut map = MapWindow::new(source, 200, 64, 0);
        assert_eq!(&map.map(0, 10).unwrap()[..], &data[..10]);
        assert_eq!(map.window(), (0, 64));

        fail_next.set(true);
        assert!(matches!(map.map(32, 64), Err(MapError::Seek { offset: 64, .. })));
        assert_eq!(map.window().1, 0);
        assert_eq!(&map.map(0, 10).unwrap()[..], &data[..10]);
    }

    #[test]
    fn maps_real_file() {
        let mut file = tempfile::tempfile().unwrap();
        let data = pattern(70_000);
        std::io::Write::write_all(&mut file, &data).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut map = MapWindow::new(file, 70_000, MAX_MAP_SIZE, 700);
        assert_eq!(map.map(69_300, 700).unwrap(), &data[69_300..]);
    }

    proptest! {
        #[test]
        fn any_request_sequence_returns_source_bytes(
            requests in proptest::collection::vec((0u64..3000, 0usize..700), 1..40),
            map_size in 1usize..1024,
        ) {
            let data = pattern(3000);
            let mut map = MapWindow::new(Cursor::new(data.clone()), 3000, map_size, 0);
            for (offset, len) in requests {
                let end = (offset as usize + len).min(3000);
                prop_assert_eq!(map.map(offset, len).unwrap(), &data[offset as usize..end]);
            }
        }
    }
}
