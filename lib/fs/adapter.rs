//! Handle-addressed operations in, path-addressed operations out.
//!
//! [`LowLevelAdapter`] is the per-session state behind the FUSE glue. It resolves kernel handles
//! to paths through its [`InodeTable`], calls the wrapped [`PathFs`], enters newly discovered
//! children into the table, and stages directory listings so the kernel can page through them.
//!
//! Calls are strictly sequential: every method takes `&mut self`.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt as _;
use std::path::PathBuf;
use std::time::Duration;

use bytesize::ByteSize;
use rustc_hash::FxHashMap;
use tracing::{debug, error, instrument, trace, warn};

use crate::fs::dirbuf::{DirBuffer, DirHandle};
use crate::fs::error::{AdapterError, TableError};
use crate::fs::handle_factory::HandleFactory;
use crate::fs::inode_table::{InodeTable, PathNode};
use crate::fs::path_fs::PathFs;
use crate::fs::{DirEntryType, FileAttr, FileHandle, Handle, ROOT_HANDLE, UNKNOWN_HANDLE};

/// How long the kernel may cache a name → handle binding.
pub const ENTRY_TTL: Duration = Duration::ZERO;

/// How long the kernel may cache attributes returned by `lookup`.
pub const LOOKUP_ATTR_TTL: Duration = Duration::ZERO;

/// How long the kernel may cache attributes returned by `getattr`.
pub const GETATTR_TTL: Duration = Duration::from_secs(1);

/// Tuning knobs for directory staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterOptions {
    /// Capacity each directory buffer starts with.
    pub initial_dir_buffer: usize,
    /// Size past which a directory buffer refuses to grow.
    pub max_dir_buffer: usize,
}

impl Default for AdapterOptions {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "64 MiB fits in usize on every supported platform"
    )]
    fn default() -> Self {
        Self {
            initial_dir_buffer: 256,
            max_dir_buffer: ByteSize::mib(64).as_u64() as usize,
        }
    }
}

/// Reply to a successful `lookup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryReply {
    /// Handle of the looked-up node.
    pub handle: Handle,
    /// Its attributes. `ino` equals `handle`.
    pub attr: FileAttr,
    /// Always 0. Handles are never reused within a session.
    pub generation: u64,
    /// See [`ENTRY_TTL`].
    pub entry_ttl: Duration,
    /// See [`LOOKUP_ATTR_TTL`].
    pub attr_ttl: Duration,
}

/// Reply to a successful `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrReply {
    /// Attributes of the node. `ino` equals the requested handle.
    pub attr: FileAttr,
    /// See [`GETATTR_TTL`].
    pub ttl: Duration,
}

/// Per-session adapter from the handle-based protocol to a [`PathFs`].
pub struct LowLevelAdapter<F: PathFs> {
    table: InodeTable,
    ops: F,
    dirs: FxHashMap<FileHandle, DirHandle<F::DirHandle>>,
    file_handles: HandleFactory,
    options: AdapterOptions,
}

impl<F: PathFs> LowLevelAdapter<F> {
    /// Creates the session state for `ops`, with only the root in the table.
    pub fn new(ops: F, options: AdapterOptions) -> Self {
        Self {
            table: InodeTable::new(),
            ops,
            dirs: FxHashMap::default(),
            file_handles: HandleFactory::new(1),
            options,
        }
    }

    /// The inode table.
    #[must_use]
    pub fn table(&self) -> &InodeTable {
        &self.table
    }

    /// The wrapped filesystem.
    #[must_use]
    pub fn ops(&self) -> &F {
        &self.ops
    }

    /// The options this adapter was built with.
    #[must_use]
    pub fn options(&self) -> AdapterOptions {
        self.options
    }

    /// State of an open directory, if `fh` names one.
    #[must_use]
    pub fn dir_handle(&self, fh: FileHandle) -> Option<&DirHandle<F::DirHandle>> {
        self.dirs.get(&fh)
    }

    /// Number of directories currently open.
    #[must_use]
    pub fn open_dirs(&self) -> usize {
        self.dirs.len()
    }

    fn path_of(&self, handle: Handle) -> Result<PathBuf, AdapterError> {
        self.table.path_of(handle).map_err(|e| {
            error!(handle, error = %e, "handle does not resolve to a path");
            e.into()
        })
    }

    /// Handle of the parent of `handle`. The root is its own parent.
    fn parent_of(&self, handle: Handle) -> Result<Handle, AdapterError> {
        let node = self.table.lookup_by_handle(handle).ok_or_else(|| {
            error!(handle, "handle is not in the inode table");
            TableError::UnknownParent(handle)
        })?;
        Ok(node.parent().unwrap_or(ROOT_HANDLE))
    }

    /// Fetches fresh attributes for an existing node and caches them.
    async fn refresh_attr(&mut self, handle: Handle) -> Result<FileAttr, AdapterError> {
        let path = self.path_of(handle)?;
        let attr = self
            .ops
            .getattr(&path)
            .await
            .map_err(AdapterError::Wrapped)?;
        self.table.set_attr(handle, attr);
        Ok(attr.with_ino(handle))
    }

    /// Resolves `name` under `parent`, entering it into the table on first sight.
    ///
    /// # Errors
    ///
    /// A wrapped `getattr` failure is returned unchanged and nothing is inserted.
    #[instrument(name = "LowLevelAdapter::lookup", skip(self))]
    pub async fn lookup(
        &mut self,
        parent: Handle,
        name: &OsStr,
    ) -> Result<EntryReply, AdapterError> {
        let dot_target = match name.as_bytes() {
            b"." => Some(parent),
            b".." => Some(self.parent_of(parent)?),
            _ => None,
        };

        let (handle, attr) = if let Some(target) = dot_target {
            (target, self.refresh_attr(target).await?)
        } else {
            let path = self.table.child_path(parent, name).map_err(|e| {
                error!(parent, error = %e, "parent does not resolve to a path");
                AdapterError::from(e)
            })?;
            let attr = self
                .ops
                .getattr(&path)
                .await
                .map_err(AdapterError::Wrapped)?;

            let handle = self
                .table
                .insert(parent, name, attr.common().ino)
                .map(PathNode::handle)
                .map_err(|e| {
                    error!(parent, ?name, error = %e, "could not enter node");
                    AdapterError::NotFound
                })?;
            self.table
                .set_attr(handle, attr)
                .ok_or(AdapterError::NotFound)?;
            (handle, attr.with_ino(handle))
        };

        debug!(handle, "resolved entry");
        Ok(EntryReply {
            handle,
            attr,
            generation: 0,
            entry_ttl: ENTRY_TTL,
            attr_ttl: LOOKUP_ATTR_TTL,
        })
    }

    /// Fetches the attributes of `handle` and refreshes the cached copy.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or the wrapped `getattr` fails.
    #[instrument(name = "LowLevelAdapter::getattr", skip(self))]
    pub async fn getattr(&mut self, handle: Handle) -> Result<AttrReply, AdapterError> {
        let attr = self.refresh_attr(handle).await?;
        Ok(AttrReply {
            attr,
            ttl: GETATTR_TTL,
        })
    }

    /// Opens the directory `handle` and returns a fresh file handle for it.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or the wrapped `opendir` fails. Nothing is allocated in
    /// either case.
    #[instrument(name = "LowLevelAdapter::opendir", skip(self))]
    pub async fn opendir(&mut self, handle: Handle) -> Result<FileHandle, AdapterError> {
        let path = self.path_of(handle)?;
        let wrapped = self
            .ops
            .opendir(&path)
            .await
            .map_err(AdapterError::Wrapped)?;

        let fh = self.file_handles.allocate();
        let buffer = DirBuffer::new(
            self.options.initial_dir_buffer,
            self.options.max_dir_buffer,
        );
        self.dirs
            .insert(fh, DirHandle::new(handle, path, wrapped, buffer));
        debug!(fh, "opened directory");
        Ok(fh)
    }

    /// Reads up to `size` bytes of encoded entries at byte `offset` of the listing.
    ///
    /// Offset zero restages the whole listing from the wrapped filesystem. Any other offset is
    /// served from what is already staged.
    ///
    /// # Errors
    ///
    /// [`AdapterError::BadDirHandle`] if `fh` is not open, or the wrapped `readdir` error. A
    /// failed pass keeps whatever it staged; later reads serve it in degraded form.
    #[instrument(name = "LowLevelAdapter::readdir", skip(self))]
    pub async fn readdir(
        &mut self,
        fh: FileHandle,
        size: usize,
        offset: u64,
    ) -> Result<&[u8], AdapterError> {
        let Self {
            table, ops, dirs, ..
        } = self;
        let dh = dirs.get_mut(&fh).ok_or(AdapterError::BadDirHandle(fh))?;

        if offset == 0 {
            fill(table, ops, dh, size).await?;
        } else {
            trace!(fully_filled = dh.fully_filled, "continuing from staged listing");
        }

        let page = dh.page(offset, size);
        debug!(
            fully_filled = dh.fully_filled,
            staged = dh.buffer.len(),
            replied = page.len(),
            "replying with directory page"
        );
        Ok(page)
    }

    /// Closes `fh` and hands the wrapped handle back to the wrapped filesystem.
    ///
    /// The file handle is freed even if the wrapped `releasedir` fails.
    ///
    /// # Errors
    ///
    /// [`AdapterError::BadDirHandle`] if `fh` is not open, or the wrapped `releasedir` error.
    #[instrument(name = "LowLevelAdapter::releasedir", skip(self))]
    pub async fn releasedir(&mut self, fh: FileHandle) -> Result<(), AdapterError> {
        let DirHandle { path, wrapped, .. } = self
            .dirs
            .remove(&fh)
            .ok_or(AdapterError::BadDirHandle(fh))?;
        self.ops
            .releasedir(&path, wrapped)
            .await
            .map_err(AdapterError::Wrapped)
    }

    /// Releases every directory still open, then tears down the inode table.
    ///
    /// Returns how many nodes were released. Wrapped `releasedir` failures are logged and
    /// otherwise ignored.
    #[instrument(name = "LowLevelAdapter::teardown", skip(self))]
    pub async fn teardown(&mut self) -> usize {
        let open: Vec<_> = self.dirs.drain().collect();
        for (fh, dh) in open {
            if let Err(e) = self.ops.releasedir(&dh.path, dh.wrapped).await {
                warn!(fh, error = %e, "releasedir failed during teardown");
            }
        }
        self.table.teardown()
    }
}

/// Restages the complete listing of `dh` from offset zero.
async fn fill<F: PathFs>(
    table: &mut InodeTable,
    ops: &mut F,
    dh: &mut DirHandle<F::DirHandle>,
    size: usize,
) -> Result<(), AdapterError> {
    let dir = dh.dir;
    let dir_parent = table
        .lookup_by_handle(dir)
        .and_then(PathNode::parent)
        .unwrap_or(ROOT_HANDLE);

    dh.fully_filled = false;
    dh.buffer.reset();
    dh.buffer.reserve(size);

    let buffer = &mut dh.buffer;
    let mut truncated = false;
    let result = {
        let mut filler = |name: &OsStr, attr: &FileAttr, _next_offset: u64| -> bool {
            let handle = match name.as_bytes() {
                b"." => dir,
                b".." => dir_parent,
                _ => match table.insert(dir, name, attr.common().ino) {
                    Ok(node) => {
                        let handle = node.handle();
                        table.set_attr(handle, *attr);
                        handle
                    }
                    Err(e) => {
                        error!(dir, ?name, error = %e, "could not enter directory entry");
                        UNKNOWN_HANDLE
                    }
                },
            };

            match buffer.push(handle, name, DirEntryType::from(*attr)) {
                Ok(_) => false,
                Err(e) => {
                    warn!(error = %e, "directory listing truncated");
                    truncated = true;
                    true
                }
            }
        };
        ops.readdir(&dh.path, &mut dh.wrapped, 0, &mut filler).await
    };

    match result {
        Ok(()) => {
            dh.fully_filled = !truncated;
            debug!(
                fully_filled = dh.fully_filled,
                staged = dh.buffer.len(),
                "directory staged"
            );
            Ok(())
        }
        Err(e) => {
            debug!(error = %e, staged = dh.buffer.len(), "wrapped readdir failed");
            Err(AdapterError::Wrapped(e))
        }
    }
}
