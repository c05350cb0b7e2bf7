use std::ffi::OsStr;
use std::path::Path;

use crate::fs::FileAttr;

/// Callback handed to [`PathFs::readdir`].
///
/// Called once per entry with the entry name, its attributes, and the offset a later call should
/// resume from. Returns `true` when the receiver wants no more entries.
pub type Filler<'a> = dyn FnMut(&OsStr, &FileAttr, u64) -> bool + Send + 'a;

/// A filesystem addressed by absolute paths.
///
/// Paths always start at `/`, which names the root of the served tree. Errors are plain
/// [`std::io::Error`]s; the adapter forwards their OS error code to the kernel untouched.
pub trait PathFs: Send {
    /// Per-open state returned by [`opendir`](Self::opendir) and handed back on every
    /// [`readdir`](Self::readdir) and the final [`releasedir`](Self::releasedir).
    type DirHandle: Send;

    /// Attributes of the node at `path`. The reported `ino` is the filesystem's own identity.
    fn getattr(
        &mut self,
        path: &Path,
    ) -> impl Future<Output = Result<FileAttr, std::io::Error>> + Send;

    /// Opens the directory at `path` for listing.
    fn opendir(
        &mut self,
        path: &Path,
    ) -> impl Future<Output = Result<Self::DirHandle, std::io::Error>> + Send;

    /// Lists the directory starting at `offset`, feeding entries to `filler` until it asks to
    /// stop or the listing is exhausted.
    ///
    /// Implementations may include `.` and `..`.
    fn readdir(
        &mut self,
        path: &Path,
        dir: &mut Self::DirHandle,
        offset: u64,
        filler: &mut Filler<'_>,
    ) -> impl Future<Output = Result<(), std::io::Error>> + Send;

    /// Closes a directory previously opened with [`opendir`](Self::opendir).
    fn releasedir(
        &mut self,
        path: &Path,
        dir: Self::DirHandle,
    ) -> impl Future<Output = Result<(), std::io::Error>> + Send;
}
