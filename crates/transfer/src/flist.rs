//! File list: local tree walk and the incremental wire encoding.
//!
//! Each entry is sent as a flags byte followed by only the fields that differ
//! from the previous entry. The name is prefix-compressed against the
//! previous name. A zero flags byte ends the list and is followed by an
//! `int32` I/O error flag.

use std::fs::{self, Metadata};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use checksums::{Md4Padding, SUM_LENGTH, file_checksum};
use logging::trace_flist;
use protocol::{ProtocolVersion, StreamChannel};
use tracing::warn;

use crate::error::{FatalError, TransferError};
use crate::options::Options;

/// File type mask of a mode word.
pub const S_IFMT: u32 = 0o170_000;
/// Directory type bits.
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file type bits.
pub const S_IFREG: u32 = 0o100_000;

/// Flag: top-level directory entry; also the filler for an empty flags byte.
pub const XMIT_TOP_DIR: u8 = 1 << 0;
/// Flag: mode equals the previous entry's.
pub const XMIT_SAME_MODE: u8 = 1 << 1;
/// Flag: a second flags byte follows (protocol 28 and later).
pub const XMIT_EXTENDED_FLAGS: u8 = 1 << 2;
/// Flag: uid equals the previous entry's.
pub const XMIT_SAME_UID: u8 = 1 << 3;
/// Flag: gid equals the previous entry's.
pub const XMIT_SAME_GID: u8 = 1 << 4;
/// Flag: the name shares a prefix with the previous name.
pub const XMIT_SAME_NAME: u8 = 1 << 5;
/// Flag: the name suffix length is an `int32`.
pub const XMIT_LONG_NAME: u8 = 1 << 6;
/// Flag: mtime equals the previous entry's.
pub const XMIT_SAME_TIME: u8 = 1 << 7;

/// One file or directory in the transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEntry {
    path: String,
    len: u64,
    mtime: i64,
    mode: u32,
    checksum: Option<[u8; SUM_LENGTH]>,
    local_path: Option<PathBuf>,
}

impl FileEntry {
    /// Creates an entry for `path`, a relative `/`-separated name.
    #[must_use]
    pub fn new(path: impl Into<String>, len: u64, mtime: i64, mode: u32) -> Self {
        Self {
            path: path.into(),
            len,
            mtime,
            mode,
            checksum: None,
            local_path: None,
        }
    }

    /// Attaches a whole-file digest.
    #[must_use]
    pub const fn with_checksum(mut self, checksum: [u8; SUM_LENGTH]) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Records where the sending side finds the file on disk.
    #[must_use]
    pub fn with_local_path(mut self, path: PathBuf) -> Self {
        self.local_path = Some(path);
        self
    }

    /// Relative name as sent on the wire.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// File length in bytes; 0 for directories.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Modification time in seconds since the epoch.
    #[must_use]
    pub const fn mtime(&self) -> i64 {
        self.mtime
    }

    /// Mode word including the file type bits.
    #[must_use]
    pub const fn mode(&self) -> u32 {
        self.mode
    }

    /// Permission bits only.
    #[must_use]
    pub const fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Whether this entry is a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Whole-file digest, present when checksums were requested.
    #[must_use]
    pub const fn checksum(&self) -> Option<&[u8; SUM_LENGTH]> {
        self.checksum.as_ref()
    }

    /// Location on the sending side; `None` for received entries.
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// One line of a file listing: type and permissions, size, mtime, name.
    ///
    /// ```
    /// use transfer::{FileEntry, S_IFREG};
    ///
    /// let entry = FileEntry::new("a/b", 42, 7, S_IFREG | 0o640);
    /// assert_eq!(entry.listing(), "-rw-r-----          42          7 a/b");
    /// ```
    #[must_use]
    pub fn listing(&self) -> String {
        const BITS: [(u32, char); 9] = [
            (0o400, 'r'),
            (0o200, 'w'),
            (0o100, 'x'),
            (0o040, 'r'),
            (0o020, 'w'),
            (0o010, 'x'),
            (0o004, 'r'),
            (0o002, 'w'),
            (0o001, 'x'),
        ];
        let kind = if self.is_dir() { 'd' } else { '-' };
        let permissions: String = BITS
            .iter()
            .map(|&(bit, c)| if self.mode & bit != 0 { c } else { '-' })
            .collect();
        format!("{kind}{permissions} {:>11} {:>10} {}", self.len, self.mtime, self.path)
    }

    /// Path of this entry below `root`.
    #[must_use]
    pub fn path_under(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }
}

/// Sorted, duplicate-free list of entries; indices on the wire refer to it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileList {
    entries: Vec<FileEntry>,
    io_error: bool,
}

impl FileList {
    /// Sorts `entries` by name bytes and drops repeated names, keeping the
    /// first occurrence.
    #[must_use]
    pub fn from_entries(mut entries: Vec<FileEntry>) -> Self {
        entries.sort_by(|a, b| a.path.as_bytes().cmp(b.path.as_bytes()));
        entries.dedup_by(|later, earlier| {
            let duplicate = later.path == earlier.path;
            if duplicate {
                trace_flist!("removing duplicate name {}", later.path);
            }
            duplicate
        });
        Self {
            entries,
            io_error: false,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at wire index `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FileEntry> {
        self.entries.get(index)
    }

    /// Entries in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }

    /// Sum of every entry length.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(FileEntry::len).sum()
    }

    /// Whether some part of the tree could not be read.
    #[must_use]
    pub const fn io_error(&self) -> bool {
        self.io_error
    }

    fn mark_io_error(&mut self) {
        self.io_error = true;
    }
}

impl<'a> IntoIterator for &'a FileList {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Normalizes a relative `/`-separated name, or returns `None` when it is
/// empty, absolute or climbs above its root.
///
/// ```
/// use transfer::sanitize_path;
///
/// assert_eq!(sanitize_path("./a//b/").as_deref(), Some("a/b"));
/// assert_eq!(sanitize_path("a/../../etc"), None);
/// assert_eq!(sanitize_path("/etc/passwd"), None);
/// ```
#[must_use]
pub fn sanitize_path(name: &str) -> Option<String> {
    if name.starts_with('/') {
        return None;
    }
    let mut parts = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

// ------------------------------------------------------------------- builder

/// Walks `roots` below `base` and collects the entries to send.
///
/// A root naming a directory contributes the directory itself plus, when
/// recursing, its contents. `.` or a trailing `/` sends only the contents.
/// Without relative paths entries are named from the last component of
/// their root. Anything that is neither a regular file nor a directory is
/// skipped, as are files whose digest is needed but cannot be computed.
pub fn build_file_list(base: &Path, roots: &[String], options: &Options) -> FileList {
    let mut builder = Builder {
        options,
        padding: Md4Padding::for_protocol(options.protocol().as_u8()),
        entries: Vec::new(),
        io_error: false,
    };
    for root in roots {
        builder.add_root(base, root);
    }
    let mut list = FileList::from_entries(builder.entries);
    if builder.io_error {
        list.mark_io_error();
    }
    trace_flist!("built file list of {} entries", list.len());
    list
}

struct Builder<'a> {
    options: &'a Options,
    padding: Md4Padding,
    entries: Vec<FileEntry>,
    io_error: bool,
}

impl Builder<'_> {
    fn add_root(&mut self, base: &Path, root: &str) {
        let contents_only = root == "." || root.ends_with('/');
        let trimmed = root.trim_end_matches('/');
        let source = if trimmed.is_empty() {
            base.to_path_buf()
        } else {
            base.join(trimmed)
        };

        let metadata = match fs::symlink_metadata(&source) {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("link_stat {} failed: {error}", source.display());
                self.io_error = true;
                return;
            }
        };

        let name = if self.options.relative() {
            sanitize_path(trimmed.trim_start_matches('/')).unwrap_or_default()
        } else {
            last_component(&source).unwrap_or_default()
        };

        if !metadata.is_dir() {
            if name.is_empty() {
                warn!("skipping {}: no usable name", source.display());
                return;
            }
            self.add_entry(name, &source, &metadata);
            return;
        }

        if !self.options.recurse() {
            warn!("skipping directory {root}");
            return;
        }

        let prefix = if contents_only && !self.options.relative() {
            String::new()
        } else {
            if !name.is_empty() {
                self.add_entry(name.clone(), &source, &metadata);
            }
            name
        };
        self.walk(&source, &prefix);
    }

    fn walk(&mut self, dir: &Path, prefix: &str) {
        let reader = match fs::read_dir(dir) {
            Ok(reader) => reader,
            Err(error) => {
                warn!("opendir {} failed: {error}", dir.display());
                self.io_error = true;
                return;
            }
        };

        let mut children = Vec::new();
        for child in reader {
            match child {
                Ok(child) => children.push(child.path()),
                Err(error) => {
                    warn!("readdir {} failed: {error}", dir.display());
                    self.io_error = true;
                }
            }
        }
        children.sort();

        for child in children {
            let Some(file_name) = last_component(&child) else {
                warn!("skipping non UTF-8 name in {}", dir.display());
                continue;
            };
            let name = if prefix.is_empty() {
                file_name
            } else {
                format!("{prefix}/{file_name}")
            };
            let metadata = match fs::symlink_metadata(&child) {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!("link_stat {} failed: {error}", child.display());
                    self.io_error = true;
                    continue;
                }
            };
            if metadata.is_dir() {
                self.add_entry(name.clone(), &child, &metadata);
                self.walk(&child, &name);
            } else {
                self.add_entry(name, &child, &metadata);
            }
        }
    }

    fn add_entry(&mut self, name: String, source: &Path, metadata: &Metadata) {
        let mode = if metadata.is_dir() {
            S_IFDIR | permission_bits(metadata)
        } else if metadata.is_file() {
            S_IFREG | permission_bits(metadata)
        } else {
            trace_flist!("skipping non-regular file {name}");
            return;
        };
        let len = if metadata.is_dir() { 0 } else { metadata.len() };
        let mtime = filetime::FileTime::from_last_modification_time(metadata).unix_seconds();

        let mut entry = FileEntry::new(name, len, mtime, mode).with_local_path(source.to_path_buf());
        if self.options.always_checksum() && !entry.is_dir() {
            let Some(sum) = file_checksum(source, self.padding) else {
                warn!("skipping {}: cannot compute checksum", source.display());
                self.io_error = true;
                return;
            };
            entry = entry.with_checksum(sum);
        }
        trace_flist!("make_file({})", entry.path());
        self.entries.push(entry);
    }
}

fn last_component(path: &Path) -> Option<String> {
    match path.components().next_back()? {
        Component::Normal(name) => name.to_str().map(str::to_owned),
        _ => None,
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

// ---------------------------------------------------------------------- wire

/// Encoder state carried from one entry to the next.
#[derive(Debug)]
pub struct FileListWriter {
    protocol: ProtocolVersion,
    always_checksum: bool,
    last_name: Vec<u8>,
    last_mode: u32,
    last_mtime: i64,
}

impl FileListWriter {
    /// Creates an encoder for one list.
    #[must_use]
    pub const fn new(protocol: ProtocolVersion, always_checksum: bool) -> Self {
        Self {
            protocol,
            always_checksum,
            last_name: Vec::new(),
            last_mode: 0,
            last_mtime: 0,
        }
    }

    /// Encodes one entry.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn write_entry<R: Read, W: Write>(
        &mut self,
        channel: &mut StreamChannel<R, W>,
        entry: &FileEntry,
    ) -> Result<(), TransferError> {
        let name = entry.path.as_bytes();
        let l1 = self
            .last_name
            .iter()
            .zip(name)
            .take(255)
            .take_while(|(a, b)| a == b)
            .count();
        let l2 = name.len() - l1;

        let mut flags = 0u8;
        if l1 > 0 {
            flags |= XMIT_SAME_NAME;
        }
        if l2 > 255 {
            flags |= XMIT_LONG_NAME;
        }
        if entry.mtime == self.last_mtime {
            flags |= XMIT_SAME_TIME;
        }
        if entry.mode == self.last_mode {
            flags |= XMIT_SAME_MODE;
        }
        if flags == 0 {
            flags = if self.protocol.uses_top_dir_filler() {
                XMIT_TOP_DIR
            } else {
                XMIT_LONG_NAME
            };
        }

        channel.write_byte(flags)?;
        if flags & XMIT_SAME_NAME != 0 {
            channel.write_byte(l1 as u8)?;
        }
        if flags & XMIT_LONG_NAME != 0 {
            channel.write_int(l2 as i32)?;
        } else {
            channel.write_byte(l2 as u8)?;
        }
        channel.write_bytes(&name[l1..])?;
        channel.write_longint(entry.len as i64)?;
        if flags & XMIT_SAME_TIME == 0 {
            channel.write_int(entry.mtime as i32)?;
        }
        if flags & XMIT_SAME_MODE == 0 {
            channel.write_int(entry.mode as i32)?;
        }
        if let Some(sum_len) = self.checksum_len(entry.is_dir()) {
            let sum = entry.checksum.unwrap_or_default();
            channel.write_bytes(&sum[..sum_len])?;
        }

        self.last_name.clear();
        self.last_name.extend_from_slice(name);
        self.last_mode = entry.mode;
        self.last_mtime = entry.mtime;
        Ok(())
    }

    /// Writes the end-of-list byte and the I/O error flag.
    pub fn finish<R: Read, W: Write>(
        &mut self,
        channel: &mut StreamChannel<R, W>,
        io_error: bool,
    ) -> Result<(), TransferError> {
        channel.write_byte(0)?;
        channel.write_int(i32::from(io_error))?;
        self.last_name.clear();
        Ok(())
    }

    fn checksum_len(&self, is_dir: bool) -> Option<usize> {
        digest_len_for(self.protocol, self.always_checksum, is_dir)
    }
}

/// Decoder state carried from one entry to the next.
#[derive(Debug)]
pub struct FileListReader {
    protocol: ProtocolVersion,
    always_checksum: bool,
    last_name: Vec<u8>,
    last_mode: u32,
    last_mtime: i64,
}

impl FileListReader {
    /// Creates a decoder for one list.
    #[must_use]
    pub const fn new(protocol: ProtocolVersion, always_checksum: bool) -> Self {
        Self {
            protocol,
            always_checksum,
            last_name: Vec::new(),
            last_mode: 0,
            last_mtime: 0,
        }
    }

    /// Decodes the next entry, or `None` at the end of the list.
    ///
    /// The name is returned as sent; [`recv_file_list`] sanitizes it.
    #[allow(clippy::cast_sign_loss)]
    pub fn read_entry<R: Read, W: Write>(
        &mut self,
        channel: &mut StreamChannel<R, W>,
    ) -> Result<Option<FileEntry>, TransferError> {
        let flags = channel.read_byte()?;
        if flags == 0 {
            return Ok(None);
        }
        if self.protocol.uses_top_dir_filler() && flags & XMIT_EXTENDED_FLAGS != 0 {
            let extended = channel.read_byte()?;
            trace_flist!("ignoring extended flags {extended:#04x}");
        }

        let l1 = if flags & XMIT_SAME_NAME != 0 {
            usize::from(channel.read_byte()?)
        } else {
            0
        };
        let l2 = if flags & XMIT_LONG_NAME != 0 {
            let l2 = channel.read_int()?;
            usize::try_from(l2).map_err(|_| malformed("negative name length"))?
        } else {
            usize::from(channel.read_byte()?)
        };
        if l1 > self.last_name.len() {
            return Err(malformed("name prefix longer than previous name"));
        }
        if l1 + l2 > protocol::MAX_LINE_LEN {
            return Err(malformed("name too long"));
        }

        self.last_name.truncate(l1);
        let suffix = channel.read_bytes(l2)?;
        self.last_name.extend_from_slice(&suffix);

        let len = channel.read_longint()?;
        let len = u64::try_from(len).map_err(|_| malformed("negative file length"))?;
        if flags & XMIT_SAME_TIME == 0 {
            self.last_mtime = i64::from(channel.read_int()?);
        }
        if flags & XMIT_SAME_MODE == 0 {
            self.last_mode = channel.read_int()? as u32;
        }

        let name = String::from_utf8(self.last_name.clone())
            .map_err(|_| FatalError::UnsafePath(String::from_utf8_lossy(&self.last_name).into_owned()))?;
        let mut entry = FileEntry::new(name, len, self.last_mtime, self.last_mode);

        if let Some(sum_len) = digest_len_for(self.protocol, self.always_checksum, entry.is_dir()) {
            let mut sum = [0u8; SUM_LENGTH];
            channel.read_exact(&mut sum[..sum_len])?;
            if !entry.is_dir() {
                entry = entry.with_checksum(sum);
            }
        }
        Ok(Some(entry))
    }
}

fn digest_len_for(protocol: ProtocolVersion, always_checksum: bool, is_dir: bool) -> Option<usize> {
    if !always_checksum || (is_dir && protocol.uses_top_dir_filler()) {
        return None;
    }
    Some(protocol.file_digest_len())
}

fn malformed(reason: &'static str) -> TransferError {
    FatalError::MalformedFileList(reason).into()
}

/// Sends `list` and returns the number of bytes it took.
pub fn send_file_list<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    list: &FileList,
    protocol: ProtocolVersion,
    always_checksum: bool,
) -> Result<u64, TransferError> {
    let start = channel.total_written();
    let mut writer = FileListWriter::new(protocol, always_checksum);
    for entry in list {
        trace_flist!("send_file_name({})", entry.path());
        writer.write_entry(channel, entry)?;
    }
    writer.finish(channel, list.io_error())?;
    let size = channel.total_written() - start;
    trace_flist!("send_file_list done: {} entries, {size} bytes", list.len());
    Ok(size)
}

/// Receives a file list and returns it with the number of bytes it took.
///
/// Every name is sanitized; an absolute or escaping name ends the session.
pub fn recv_file_list<R: Read, W: Write>(
    channel: &mut StreamChannel<R, W>,
    protocol: ProtocolVersion,
    always_checksum: bool,
) -> Result<(FileList, u64), TransferError> {
    let start = channel.total_read();
    let mut reader = FileListReader::new(protocol, always_checksum);
    let mut entries = Vec::new();
    while let Some(mut entry) = reader.read_entry(channel)? {
        let Some(clean) = sanitize_path(&entry.path) else {
            return Err(FatalError::UnsafePath(entry.path).into());
        };
        entry.path = clean;
        trace_flist!("receive_file_name({})", entry.path);
        entries.push(entry);
    }
    let io_error = channel.read_int()?;

    let mut list = FileList::from_entries(entries);
    if io_error != 0 {
        warn!("sender reported I/O errors while building the file list");
        list.mark_io_error();
    }
    let size = channel.total_read() - start;
    trace_flist!("received {} names, {size} bytes", list.len());
    Ok((list, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    type Channel = StreamChannel<Cursor<Vec<u8>>, Vec<u8>>;

    fn writer() -> Channel {
        StreamChannel::new(Cursor::new(Vec::new()), Vec::new())
    }

    fn reader(bytes: Vec<u8>) -> Channel {
        StreamChannel::new(Cursor::new(bytes), Vec::new())
    }

    fn version(value: u8) -> ProtocolVersion {
        ProtocolVersion::new(value).unwrap()
    }

    fn file(name: &str, len: u64, mtime: i64) -> FileEntry {
        FileEntry::new(name, len, mtime, S_IFREG | 0o644)
    }

    fn transfer(list: &FileList, protocol: ProtocolVersion, checksum: bool) -> (FileList, Vec<u8>) {
        let mut out = writer();
        send_file_list(&mut out, list, protocol, checksum).unwrap();
        let wire = out.into_parts().1;
        let mut input = reader(wire.clone());
        let (received, size) = recv_file_list(&mut input, protocol, checksum).unwrap();
        assert_eq!(size, wire.len() as u64);
        (received, wire)
    }

    fn strip_local(list: &FileList) -> Vec<(String, u64, i64, u32)> {
        list.iter()
            .map(|e| (e.path().to_owned(), e.len(), e.mtime(), e.mode()))
            .collect()
    }

    #[test]
    fn list_is_sorted_bytewise_and_deduplicated() {
        let list = FileList::from_entries(vec![
            file("b", 1, 0),
            file("B", 2, 0),
            file("a/c", 3, 0),
            file("b", 9, 0),
            file("a", 4, 0),
        ]);
        let names: Vec<&str> = list.iter().map(FileEntry::path).collect();
        assert_eq!(names, ["B", "a", "a/c", "b"]);
        assert_eq!(list.get(3).unwrap().len(), 1);
        assert_eq!(list.total_size(), 10);
    }

    #[test]
    fn first_entry_encoding_is_exact() {
        let list = FileList::from_entries(vec![file("ab", 5, 100)]);
        let mut out = writer();
        send_file_list(&mut out, &list, version(28), false).unwrap();
        let wire = out.into_parts().1;

        let mut expected = vec![XMIT_TOP_DIR, 2, b'a', b'b'];
        expected.extend_from_slice(&5i32.to_le_bytes());
        expected.extend_from_slice(&100i32.to_le_bytes());
        expected.extend_from_slice(&((S_IFREG | 0o644) as i32).to_le_bytes());
        expected.push(0);
        expected.extend_from_slice(&0i32.to_le_bytes());
        assert_eq!(wire, expected);
    }

    #[test]
    fn old_protocols_use_long_name_filler() {
        let list = FileList::from_entries(vec![file("x", 1, 7)]);
        let mut out = writer();
        send_file_list(&mut out, &list, version(27), false).unwrap();
        let wire = out.into_parts().1;
        assert_eq!(wire[0], XMIT_LONG_NAME);
        assert_eq!(&wire[1..5], &1i32.to_le_bytes());

        let (received, _) = transfer(&list, version(27), false);
        assert_eq!(strip_local(&received), strip_local(&list));
    }

    #[test]
    fn shared_fields_are_compressed() {
        let list = FileList::from_entries(vec![
            file("dir/one.txt", 10, 500),
            file("dir/two.txt", 20, 500),
        ]);
        let (received, wire) = transfer(&list, version(28), false);
        assert_eq!(strip_local(&received), strip_local(&list));

        // second entry: SAME_NAME | SAME_TIME | SAME_MODE, l1 = 4
        let second = 1 + 1 + 11 + 4 + 4 + 4;
        assert_eq!(wire[second], XMIT_SAME_NAME | XMIT_SAME_TIME | XMIT_SAME_MODE);
        assert_eq!(wire[second + 1], 4);
        assert_eq!(wire[second + 2], 7);
        assert_eq!(&wire[second + 3..second + 10], b"two.txt");
    }

    #[test]
    fn long_names_and_large_files_survive() {
        let long = "n".repeat(300);
        let list = FileList::from_entries(vec![file(&long, 5 << 32, -3)]);
        let (received, wire) = transfer(&list, version(28), false);
        assert_eq!(strip_local(&received), strip_local(&list));
        assert_ne!(wire[0] & XMIT_LONG_NAME, 0);
    }

    #[test]
    fn checksums_travel_with_regular_files_only() {
        let sum: [u8; SUM_LENGTH] = std::array::from_fn(|i| i as u8 + 1);
        let list = FileList::from_entries(vec![
            FileEntry::new("d", 0, 1, S_IFDIR | 0o755),
            file("d/f", 3, 1).with_checksum(sum),
        ]);

        let (received, _) = transfer(&list, version(28), true);
        assert_eq!(received.get(0).unwrap().checksum(), None);
        assert_eq!(received.get(1).unwrap().checksum(), Some(&sum));

        let (received, _) = transfer(&list, version(20), true);
        let mut short = [0u8; SUM_LENGTH];
        short[..2].copy_from_slice(&sum[..2]);
        assert_eq!(received.get(1).unwrap().checksum(), Some(&short));
    }

    #[test]
    fn unsafe_names_are_fatal() {
        for name in ["../escape", "/etc/passwd", "a/../../b"] {
            let list = FileList {
                entries: vec![file(name, 1, 1)],
                io_error: false,
            };
            let mut out = writer();
            send_file_list(&mut out, &list, version(28), false).unwrap();
            let mut input = reader(out.into_parts().1);
            let error = recv_file_list(&mut input, version(28), false).unwrap_err();
            assert!(
                matches!(error, TransferError::Fatal(FatalError::UnsafePath(_))),
                "{name}: {error}"
            );
        }
    }

    #[test]
    fn io_error_flag_is_carried() {
        let mut list = FileList::from_entries(vec![file("a", 1, 1)]);
        list.mark_io_error();
        let (received, _) = transfer(&list, version(28), false);
        assert!(received.io_error());
    }

    #[test]
    fn sanitize_rejects_escapes() {
        assert_eq!(sanitize_path("a/b").as_deref(), Some("a/b"));
        assert_eq!(sanitize_path("./x/./y").as_deref(), Some("x/y"));
        assert_eq!(sanitize_path("."), None);
        assert_eq!(sanitize_path(""), None);
        assert_eq!(sanitize_path(".."), None);
    }

    #[test]
    fn builder_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/a.txt"), b"alpha").unwrap();
        fs::write(root.join("src/nested/b.txt"), b"beta!").unwrap();

        let options = Options::new().with_recurse(true);
        let list = build_file_list(root, &["src".to_owned()], &options);
        let names: Vec<&str> = list.iter().map(FileEntry::path).collect();
        assert_eq!(names, ["src", "src/a.txt", "src/nested", "src/nested/b.txt"]);
        assert!(list.get(0).unwrap().is_dir());
        assert_eq!(list.total_size(), 10);
        assert_eq!(
            list.get(1).unwrap().local_path(),
            Some(root.join("src/a.txt").as_path())
        );

        let list = build_file_list(root, &["src/".to_owned()], &options);
        let names: Vec<&str> = list.iter().map(FileEntry::path).collect();
        assert_eq!(names, ["a.txt", "nested", "nested/b.txt"]);
    }

    #[test]
    fn builder_without_recursion_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("top.txt"), b"x").unwrap();

        let options = Options::new();
        let roots = ["sub".to_owned(), "top.txt".to_owned(), "missing".to_owned()];
        let list = build_file_list(dir.path(), &roots, &options);
        let names: Vec<&str> = list.iter().map(FileEntry::path).collect();
        assert_eq!(names, ["top.txt"]);
        assert!(list.io_error());
    }

    #[test]
    fn builder_relative_names_keep_the_given_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/c.txt"), b"c").unwrap();

        let options = Options::new().with_relative(true);
        let list = build_file_list(dir.path(), &["a/b/c.txt".to_owned()], &options);
        assert_eq!(list.get(0).unwrap().path(), "a/b/c.txt");
    }

    #[test]
    fn builder_computes_digests_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), b"digest me").unwrap();

        let options = Options::new().with_always_checksum(true);
        let list = build_file_list(dir.path(), &["f".to_owned()], &options);
        let expected = file_checksum(&dir.path().join("f"), Md4Padding::for_protocol(28));
        assert_eq!(list.get(0).unwrap().checksum().copied(), expected);
    }
}
