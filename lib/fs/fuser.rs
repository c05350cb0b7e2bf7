//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`LowLevelAdapter`].

use std::ffi::OsStr;

use tracing::{debug, error, info, instrument};

use super::adapter::{AdapterOptions, LowLevelAdapter};
use super::dirbuf::DirentIter;
use super::error::AdapterError;
use super::path_fs::PathFs;
use super::{CommonFileAttr, DirEntryType, FileAttr};

impl From<FileAttr> for fuser::FileAttr {
    fn from(val: FileAttr) -> Self {
        fn common_to_fuser(common: CommonFileAttr, kind: fuser::FileType) -> fuser::FileAttr {
            fuser::FileAttr {
                ino: common.ino,
                size: 0,
                blocks: 0,
                atime: common.atime,
                mtime: common.mtime,
                ctime: common.ctime,
                crtime: common.crtime,
                kind,
                perm: common.perm.bits(),
                nlink: common.nlink,
                uid: common.uid,
                gid: common.gid,
                rdev: 0,
                blksize: common.blksize,
                flags: 0,
            }
        }

        fn narrow_rdev(rdev: u64) -> u32 {
            u32::try_from(rdev).unwrap_or_else(|_| {
                error!(rdev, "rdev too large for fuser::FileAttr");
                0
            })
        }

        let kind: fuser::FileType = DirEntryType::from(val).into();
        match val {
            FileAttr::RegularFile {
                common,
                size,
                blocks,
            } => fuser::FileAttr {
                size,
                blocks,
                ..common_to_fuser(common, kind)
            },
            FileAttr::Symlink { common, size } => fuser::FileAttr {
                size,
                ..common_to_fuser(common, kind)
            },
            FileAttr::CharDevice { common, rdev } | FileAttr::BlockDevice { common, rdev } => {
                fuser::FileAttr {
                    rdev: narrow_rdev(rdev),
                    ..common_to_fuser(common, kind)
                }
            }
            FileAttr::Directory { common }
            | FileAttr::NamedPipe { common }
            | FileAttr::Socket { common } => common_to_fuser(common, kind),
        }
    }
}

impl From<DirEntryType> for fuser::FileType {
    fn from(val: DirEntryType) -> Self {
        match val {
            DirEntryType::RegularFile => Self::RegularFile,
            DirEntryType::Directory => Self::Directory,
            DirEntryType::Symlink => Self::Symlink,
            DirEntryType::CharDevice => Self::CharDevice,
            DirEntryType::BlockDevice => Self::BlockDevice,
            DirEntryType::NamedPipe => Self::NamedPipe,
            DirEntryType::Socket => Self::Socket,
        }
    }
}

/// Trait abstracting the `.error(errno)` method common to all fuser reply types.
trait FuseReply {
    fn error(self, errno: i32);
}

macro_rules! impl_fuse_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl FuseReply for $ty {
            fn error(self, errno: i32) {
                // Calls the inherent fuser method (not this trait method).
                self.error(errno);
            }
        })*
    };
}

impl_fuse_reply!(
    fuser::ReplyEntry,
    fuser::ReplyAttr,
    fuser::ReplyOpen,
    fuser::ReplyEmpty,
);

/// Extension trait on `Result<T, AdapterError>` for FUSE reply handling.
///
/// Centralizes the error-logging + errno-reply path so each FUSE callback
/// only has to express its success path.
trait FuseResultExt<T> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R));
}

impl<T> FuseResultExt<T> for Result<T, AdapterError> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R)) {
        match self {
            Ok(val) => on_ok(val, reply),
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.errno());
            }
        }
    }
}

/// Bridges a [`PathFs`] to the [`fuser::Filesystem`] trait.
///
/// Every callback blocks on the tokio runtime until the adapter call completes, so at most one
/// request is in flight.
pub struct FuserAdapter<F: PathFs> {
    adapter: LowLevelAdapter<F>,
    runtime: tokio::runtime::Handle,
    readdir_page_size: usize,
}

impl<F: PathFs> FuserAdapter<F> {
    /// Create a new adapter serving `ops`.
    ///
    /// fuser does not pass the kernel's requested readdir size through, so `readdir_page_size`
    /// is used instead.
    pub fn new(
        ops: F,
        options: AdapterOptions,
        readdir_page_size: usize,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            adapter: LowLevelAdapter::new(ops, options),
            runtime,
            readdir_page_size,
        }
    }
}

impl<F: PathFs> fuser::Filesystem for FuserAdapter<F> {
    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        self.runtime
            .block_on(self.adapter.lookup(parent, name))
            .fuse_reply(reply, |entry, reply| {
                let f_attr: fuser::FileAttr = entry.attr.into();
                debug!(?f_attr, "replying...");
                reply.entry(&entry.entry_ttl, &f_attr, entry.generation);
            });
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        self.runtime
            .block_on(self.adapter.getattr(ino))
            .fuse_reply(reply, |attr, reply| {
                let f_attr: fuser::FileAttr = attr.attr.into();
                debug!(?f_attr, "replying...");
                reply.attr(&attr.ttl, &f_attr);
            });
    }

    #[instrument(name = "FuserAdapter::opendir", skip(self, _req, _flags, reply))]
    fn opendir(&mut self, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        self.runtime
            .block_on(self.adapter.opendir(ino))
            .fuse_reply(reply, |fh, reply| {
                debug!(handle = fh, "replying...");
                reply.opened(fh, 0);
            });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _ino, offset, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let page = match self.runtime.block_on(self.adapter.readdir(
            fh,
            self.readdir_page_size,
            offset.cast_unsigned(),
        )) {
            Ok(page) => page,
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.errno());
                return;
            }
        };

        for dirent in DirentIter::new(page) {
            let kind = dirent
                .entry_type()
                .map_or(fuser::FileType::RegularFile, Into::into);
            let Ok(next) = i64::try_from(dirent.off) else {
                error!(off = dirent.off, "directory entry offset too large for fuser");
                reply.error(libc::EIO);
                return;
            };

            debug!(name = ?dirent.name, ino = dirent.ino, "adding entry to reply...");
            if reply.add(dirent.ino, next, kind, dirent.name) {
                debug!("buffer full for now, stopping readdir");
                break;
            }
        }

        debug!("finalizing reply...");
        reply.ok();
    }

    #[instrument(name = "FuserAdapter::releasedir", skip(self, _req, _ino, _flags, reply))]
    fn releasedir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        self.runtime
            .block_on(self.adapter.releasedir(fh))
            .fuse_reply(reply, |(), reply| {
                debug!("replying ok");
                reply.ok();
            });
    }

    fn destroy(&mut self) {
        let released = self.runtime.block_on(self.adapter.teardown());
        info!(released, "session torn down");
    }
}
