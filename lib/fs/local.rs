//! A [`PathFs`] that directly overlays a directory of the host filesystem.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::fs::FileAttr;
use crate::fs::path_fs::{Filler, PathFs};

fn attr_of(meta: std::fs::Metadata) -> Result<FileAttr, std::io::Error> {
    FileAttr::try_from(meta).map_err(|()| std::io::Error::from_raw_os_error(libc::EIO))
}

/// Serves the tree below `root`. Path `/` maps to `root` itself.
///
/// Symlinks are reported, never followed.
#[derive(Debug, Clone)]
pub struct LocalPathFs {
    root: PathBuf,
}

/// An open directory: a snapshot of its entries taken by the last offset-zero read.
///
/// Offsets handed to the filler are positions in the snapshot.
#[derive(Debug, Default)]
pub struct LocalDir {
    entries: Vec<(OsString, FileAttr)>,
}

impl LocalPathFs {
    /// Create a filesystem rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The host directory being served.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    async fn snapshot(&self, path: &Path) -> Result<Vec<(OsString, FileAttr)>, std::io::Error> {
        let host = self.host_path(path);
        let dot = attr_of(tokio::fs::symlink_metadata(&host).await?)?;
        let dotdot = match path.parent() {
            Some(parent) => attr_of(tokio::fs::symlink_metadata(self.host_path(parent)).await?)?,
            None => dot,
        };

        let mut children = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&host).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            match entry.metadata().await.and_then(attr_of) {
                Ok(attr) => children.push((entry.file_name(), attr)),
                Err(e) => {
                    debug!(name = ?entry.file_name(), error = %e, "skipping unreadable entry");
                }
            }
        }
        children.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push((OsString::from("."), dot));
        entries.push((OsString::from(".."), dotdot));
        entries.extend(children);
        Ok(entries)
    }
}

impl PathFs for LocalPathFs {
    type DirHandle = LocalDir;

    async fn getattr(&mut self, path: &Path) -> Result<FileAttr, std::io::Error> {
        attr_of(tokio::fs::symlink_metadata(self.host_path(path)).await?)
    }

    async fn opendir(&mut self, path: &Path) -> Result<LocalDir, std::io::Error> {
        let meta = tokio::fs::symlink_metadata(self.host_path(path)).await?;
        if !meta.is_dir() {
            return Err(std::io::Error::from_raw_os_error(libc::ENOTDIR));
        }
        Ok(LocalDir::default())
    }

    async fn readdir(
        &mut self,
        path: &Path,
        dir: &mut LocalDir,
        offset: u64,
        filler: &mut Filler<'_>,
    ) -> Result<(), std::io::Error> {
        if offset == 0 || dir.entries.is_empty() {
            dir.entries = self.snapshot(path).await?;
        }

        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        for (index, (name, attr)) in dir.entries.iter().enumerate().skip(start) {
            if filler(OsStr::new(name), attr, index as u64 + 1) {
                trace!(index, "filler asked to stop");
                break;
            }
        }
        Ok(())
    }

    async fn releasedir(&mut self, path: &Path, dir: LocalDir) -> Result<(), std::io::Error> {
        trace!(?path, cached = dir.entries.len(), "releasing directory");
        drop(dir);
        Ok(())
    }
}
