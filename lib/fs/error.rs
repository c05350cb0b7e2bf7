use thiserror::Error;

use crate::fs::{FileHandle, Handle};

/// Errors raised by the [`InodeTable`](super::inode_table::InodeTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    /// The handle does not resolve to any node. The transport should never present a handle
    /// the adapter did not issue, so this indicates an internal inconsistency.
    #[error("handle {0} is not in the inode table")]
    UnknownParent(Handle),
}

/// Errors surfaced by the [`LowLevelAdapter`](super::adapter::LowLevelAdapter).
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The wrapped path-based filesystem reported a failure. Propagated verbatim.
    #[error("wrapped operation failed: {0}")]
    Wrapped(#[source] std::io::Error),

    /// A handle could not be resolved to a path.
    #[error(transparent)]
    Table(#[from] TableError),

    /// The wrapped lookup succeeded but no entry could be established in the table.
    #[error("no entry could be established")]
    NotFound,

    /// The file handle does not name an open directory.
    #[error("file handle {0} is not an open directory")]
    BadDirHandle(FileHandle),
}

impl AdapterError {
    /// The errno to reply with.
    ///
    /// Wrapped failures keep their OS error code unchanged.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Wrapped(e) => io_to_errno(e),
            Self::Table(TableError::UnknownParent(_)) | Self::NotFound => libc::ENOENT,
            Self::BadDirHandle(_) => libc::EBADF,
        }
    }
}

/// Convert an I/O error to the corresponding errno value for FUSE replies.
#[expect(
    clippy::wildcard_enum_match_arm,
    reason = "ErrorKind is non_exhaustive; EIO is the safe default"
)]
#[must_use]
pub fn io_to_errno(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or_else(|| match e.kind() {
        std::io::ErrorKind::NotFound => libc::ENOENT,
        std::io::ErrorKind::PermissionDenied => libc::EACCES,
        std::io::ErrorKind::AlreadyExists => libc::EEXIST,
        _ => libc::EIO,
    })
}

/// An encoded directory entry would push the staging buffer past its configured cap.
///
/// Never surfaced to the kernel: the fill stops and the listing is served in degraded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("directory entry needs {needed} bytes of buffer, cap is {max}")]
pub struct BufferTooSmall {
    /// Buffer length the entry would have required.
    pub needed: usize,
    /// The configured cap.
    pub max: usize,
}
