//! Directory entry staging.
//!
//! Entries are encoded in the kernel's `fuse_dirent` layout, native byte order:
//!
//! ```text
//! ino: u64 | off: u64 | namelen: u32 | type: u32 | name[namelen] | zero padding to 8 bytes
//! ```
//!
//! `off` is the byte position just past the entry, so the offsets the kernel sends back on
//! continuation reads are byte offsets into the staged buffer.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt as _;
use std::path::PathBuf;

use bytes::{BufMut as _, BytesMut};

use crate::fs::error::BufferTooSmall;
use crate::fs::{DirEntryType, Handle};

/// Size of the fixed part of an encoded entry.
pub const DIRENT_HEADER_LEN: usize = 24;

const DIRENT_ALIGN: usize = 8;

/// Encoded size of an entry whose name is `name_len` bytes long.
#[must_use]
pub const fn dirent_size(name_len: usize) -> usize {
    (DIRENT_HEADER_LEN + name_len).next_multiple_of(DIRENT_ALIGN)
}

/// A growable staging area for encoded directory entries.
///
/// Growth is capped at `max` bytes. Appending past the cap fails with [`BufferTooSmall`] and
/// leaves everything staged so far intact.
#[derive(Debug)]
pub struct DirBuffer {
    bytes: BytesMut,
    max: usize,
}

impl DirBuffer {
    /// Creates an empty buffer with `initial` bytes of capacity that never grows past `max`.
    #[must_use]
    pub fn new(initial: usize, max: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(initial.min(max)),
            max,
        }
    }

    /// Drops every staged entry. Capacity is kept.
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    /// Makes sure at least `size` bytes (up to the cap) can be staged without reallocating.
    pub fn reserve(&mut self, size: usize) {
        let wanted = size.min(self.max);
        if wanted > self.bytes.len() {
            self.bytes.reserve(wanted - self.bytes.len());
        }
    }

    /// Appends one entry and returns its `off` field, i.e. the buffer length after the append.
    ///
    /// # Errors
    ///
    /// [`BufferTooSmall`] if the entry does not fit under the cap. Nothing is written.
    pub fn push(
        &mut self,
        ino: Handle,
        name: &OsStr,
        kind: DirEntryType,
    ) -> Result<u64, BufferTooSmall> {
        let name = name.as_bytes();
        let size = dirent_size(name.len());
        let end = self.bytes.len() + size;
        let too_small = BufferTooSmall {
            needed: end,
            max: self.max,
        };
        if end > self.max {
            return Err(too_small);
        }
        let namelen = u32::try_from(name.len()).map_err(|_| too_small)?;
        let off = end as u64;

        self.bytes.reserve(size);
        self.bytes.put_u64_ne(ino);
        self.bytes.put_u64_ne(off);
        self.bytes.put_u32_ne(namelen);
        self.bytes.put_u32_ne(kind.dirent_type());
        self.bytes.put_slice(name);
        self.bytes.put_bytes(0, size - DIRENT_HEADER_LEN - name.len());
        Ok(off)
    }

    /// Number of staged bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes that can be staged before the next reallocation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// The growth cap.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Everything staged so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One decoded directory entry, borrowing its name from the encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dirent<'a> {
    /// Handle of the entry.
    pub ino: Handle,
    /// Byte offset of the next entry.
    pub off: u64,
    /// `DT_*` code.
    pub kind: u32,
    /// Entry name.
    pub name: &'a OsStr,
}

impl Dirent<'_> {
    /// The decoded kind, if the code is one this crate writes.
    #[must_use]
    pub fn entry_type(&self) -> Option<DirEntryType> {
        DirEntryType::from_dirent_type(self.kind)
    }
}

/// Iterates the complete entries of an encoded slice. A truncated trailing entry is ignored.
#[derive(Debug, Clone)]
pub struct DirentIter<'a> {
    rest: &'a [u8],
}

impl<'a> DirentIter<'a> {
    /// Decodes `bytes`, which must start on an entry boundary.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { rest: bytes }
    }
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    bytes
        .get(at..at + 8)?
        .try_into()
        .ok()
        .map(u64::from_ne_bytes)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)?
        .try_into()
        .ok()
        .map(u32::from_ne_bytes)
}

impl<'a> Iterator for DirentIter<'a> {
    type Item = Dirent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest;
        let ino = read_u64(rest, 0)?;
        let off = read_u64(rest, 8)?;
        let namelen = usize::try_from(read_u32(rest, 16)?).ok()?;
        let kind = read_u32(rest, 20)?;

        let size = dirent_size(namelen);
        let name = rest.get(DIRENT_HEADER_LEN..DIRENT_HEADER_LEN + namelen)?;
        self.rest = rest.get(size..)?;

        Some(Dirent {
            ino,
            off,
            kind,
            name: OsStr::from_bytes(name),
        })
    }
}

/// State of one open directory.
///
/// Lives from a successful `opendir` until the matching `releasedir`. `W` is the wrapped
/// filesystem's own per-open handle.
#[derive(Debug)]
pub struct DirHandle<W> {
    /// Staged entries.
    pub buffer: DirBuffer,
    /// Whether the last offset-zero pass staged the complete listing.
    pub fully_filled: bool,
    /// Handle of the directory itself.
    pub dir: Handle,
    /// Path of the directory, resolved at open time.
    pub path: PathBuf,
    /// The wrapped filesystem's handle. Consumed by `releasedir`.
    pub wrapped: W,
}

impl<W> DirHandle<W> {
    /// Creates a handle with an empty, unfilled buffer.
    pub fn new(dir: Handle, path: PathBuf, wrapped: W, buffer: DirBuffer) -> Self {
        Self {
            buffer,
            fully_filled: false,
            dir,
            path,
            wrapped,
        }
    }

    /// The bytes to reply with for a read of `size` bytes at `offset`.
    ///
    /// A complete listing is paginated by byte offset and reads past its end are empty. An
    /// incomplete listing is served from byte 0 regardless of `offset`, clamped to `size`.
    #[must_use]
    pub fn page(&self, offset: u64, size: usize) -> &[u8] {
        let staged = self.buffer.as_bytes();
        if !self.fully_filled {
            return &staged[..size.min(staged.len())];
        }

        let Ok(start) = usize::try_from(offset) else {
            return &[];
        };
        if start >= staged.len() {
            return &[];
        }
        let end = start.saturating_add(size).min(staged.len());
        &staged[start..end]
    }
}
