//! Handle-based serving of path-based filesystems.
/// Low-level operation adapter: handle-addressed calls in, path-addressed calls out.
pub mod adapter;
/// Directory entry staging buffers and per-open directory state.
pub mod dirbuf;
/// Error types shared by the table and the adapter.
pub mod error;
/// FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`adapter::LowLevelAdapter`].
pub mod fuser;
/// Monotonic allocation of handles.
pub mod handle_factory;
/// Bidirectional index between handles and path nodes.
pub mod inode_table;
/// A [`path_fs::PathFs`] that serves a directory of the host filesystem.
pub mod local;
/// The path-based operation set that the adapter wraps.
pub mod path_fs;

use std::time::{Duration, SystemTime};

use bitflags::bitflags;
use tracing::error;

/// Numeric identifier the kernel uses to address a node instead of a path.
pub type Handle = u64;

/// Protocol-visible handle of an open directory.
pub type FileHandle = u64;

/// The reserved handle of the root directory.
pub const ROOT_HANDLE: Handle = 1;

/// Parent handle recorded for the root, meaning "no parent".
pub const NO_PARENT: Handle = 0;

/// Handle reported for directory entries that could not be entered into the table.
pub const UNKNOWN_HANDLE: Handle = 0xffff_ffff;

/// Path separator, which is also the name of the root node.
pub const PATH_SEPARATOR: &str = "/";

bitflags! {
    /// Permission bits for a node, similar to Unix file permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write permission.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;

        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write permission.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;

        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write permission.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// Sticky bit.
        const STICKY        = 1 << 9;
        /// Set-group-ID bit.
        const SETGID        = 1 << 10;
        /// Set-user-ID bit.
        const SETUID        = 1 << 11;

        /// Other: read, write, and execute.
        const OTHER_RWX = Self::OTHER_READ.bits()
            | Self::OTHER_WRITE.bits()
            | Self::OTHER_EXECUTE.bits();
        /// Group: read, write, and execute.
        const GROUP_RWX = Self::GROUP_READ.bits()
            | Self::GROUP_WRITE.bits()
            | Self::GROUP_EXECUTE.bits();
        /// Owner: read, write, and execute.
        const OWNER_RWX = Self::OWNER_READ.bits()
            | Self::OWNER_WRITE.bits()
            | Self::OWNER_EXECUTE.bits();
    }
}

/// Attributes shared by every kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommonFileAttr {
    /// The inode number. Native when reported by a [`path_fs::PathFs`], the table handle once it
    /// has passed through the adapter.
    pub ino: u64,
    /// Time of last access.
    pub atime: SystemTime,
    /// Time of last modification.
    pub mtime: SystemTime,
    /// Time of last status change.
    pub ctime: SystemTime,
    /// Time of creation (macOS only, `UNIX_EPOCH` elsewhere).
    pub crtime: SystemTime,
    /// Permission bits.
    pub perm: Permissions,
    /// Number of hard links.
    pub nlink: u32,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Preferred block size for I/O.
    pub blksize: u32,
}

/// Cached filesystem metadata for a node, tagged by file kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAttr {
    /// A regular file.
    RegularFile {
        /// Common attributes.
        common: CommonFileAttr,
        /// Size in bytes.
        size: u64,
        /// Allocated 512-byte blocks.
        blocks: u64,
    },
    /// A directory.
    Directory {
        /// Common attributes.
        common: CommonFileAttr,
    },
    /// A symbolic link.
    Symlink {
        /// Common attributes.
        common: CommonFileAttr,
        /// Length of the link target.
        size: u64,
    },
    /// A character device.
    CharDevice {
        /// Common attributes.
        common: CommonFileAttr,
        /// Device number.
        rdev: u64,
    },
    /// A block device.
    BlockDevice {
        /// Common attributes.
        common: CommonFileAttr,
        /// Device number.
        rdev: u64,
    },
    /// A FIFO.
    NamedPipe {
        /// Common attributes.
        common: CommonFileAttr,
    },
    /// A Unix domain socket.
    Socket {
        /// Common attributes.
        common: CommonFileAttr,
    },
}

impl FileAttr {
    /// The attributes shared by every kind.
    #[must_use]
    pub fn common(&self) -> &CommonFileAttr {
        match self {
            Self::RegularFile { common, .. }
            | Self::Directory { common }
            | Self::Symlink { common, .. }
            | Self::CharDevice { common, .. }
            | Self::BlockDevice { common, .. }
            | Self::NamedPipe { common }
            | Self::Socket { common } => common,
        }
    }

    fn common_mut(&mut self) -> &mut CommonFileAttr {
        match self {
            Self::RegularFile { common, .. }
            | Self::Directory { common }
            | Self::Symlink { common, .. }
            | Self::CharDevice { common, .. }
            | Self::BlockDevice { common, .. }
            | Self::NamedPipe { common }
            | Self::Socket { common } => common,
        }
    }

    /// Returns a copy of these attributes reporting `ino` as the inode number.
    #[must_use]
    pub fn with_ino(mut self, ino: u64) -> Self {
        self.common_mut().ino = ino;
        self
    }

    /// Whether this node is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }
}

/// The kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirEntryType {
    /// A regular file.
    RegularFile,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// A character device.
    CharDevice,
    /// A block device.
    BlockDevice,
    /// A FIFO.
    NamedPipe,
    /// A Unix domain socket.
    Socket,
}

impl DirEntryType {
    /// The `DT_*` code written into the `type` field of an encoded directory entry.
    #[must_use]
    pub fn dirent_type(self) -> u32 {
        let dt = match self {
            Self::RegularFile => libc::DT_REG,
            Self::Directory => libc::DT_DIR,
            Self::Symlink => libc::DT_LNK,
            Self::CharDevice => libc::DT_CHR,
            Self::BlockDevice => libc::DT_BLK,
            Self::NamedPipe => libc::DT_FIFO,
            Self::Socket => libc::DT_SOCK,
        };
        u32::from(dt)
    }

    /// Inverse of [`dirent_type`](Self::dirent_type). Returns `None` for `DT_UNKNOWN` and any
    /// code this crate never writes.
    #[must_use]
    pub fn from_dirent_type(code: u32) -> Option<Self> {
        let dt = u8::try_from(code).ok()?;
        match dt {
            libc::DT_REG => Some(Self::RegularFile),
            libc::DT_DIR => Some(Self::Directory),
            libc::DT_LNK => Some(Self::Symlink),
            libc::DT_CHR => Some(Self::CharDevice),
            libc::DT_BLK => Some(Self::BlockDevice),
            libc::DT_FIFO => Some(Self::NamedPipe),
            libc::DT_SOCK => Some(Self::Socket),
            _ => None,
        }
    }
}

impl From<FileAttr> for DirEntryType {
    fn from(attr: FileAttr) -> Self {
        match attr {
            FileAttr::RegularFile { .. } => Self::RegularFile,
            FileAttr::Directory { .. } => Self::Directory,
            FileAttr::Symlink { .. } => Self::Symlink,
            FileAttr::CharDevice { .. } => Self::CharDevice,
            FileAttr::BlockDevice { .. } => Self::BlockDevice,
            FileAttr::NamedPipe { .. } => Self::NamedPipe,
            FileAttr::Socket { .. } => Self::Socket,
        }
    }
}

impl TryFrom<std::fs::Metadata> for FileAttr {
    type Error = ();

    #[expect(
        clippy::cast_possible_truncation,
        reason = "metadata mode/nlink/blksize narrowing is intentional"
    )]
    #[expect(
        clippy::cast_sign_loss,
        reason = "nsecs from MetadataExt is always in [0, 999_999_999]"
    )]
    fn try_from(meta: std::fs::Metadata) -> Result<Self, Self::Error> {
        use std::os::unix::fs::FileTypeExt as _;
        use std::os::unix::fs::MetadataExt as _;

        fn to_systime(secs: i64, nsecs: i64) -> SystemTime {
            if secs >= 0 {
                std::time::UNIX_EPOCH + Duration::new(secs.cast_unsigned(), nsecs as u32)
            } else {
                std::time::UNIX_EPOCH - Duration::from_secs((-secs).cast_unsigned())
                    + Duration::from_nanos(nsecs.cast_unsigned())
            }
        }

        let common = CommonFileAttr {
            ino: meta.ino(),
            atime: to_systime(meta.atime(), meta.atime_nsec()),
            mtime: to_systime(meta.mtime(), meta.mtime_nsec()),
            ctime: to_systime(meta.ctime(), meta.ctime_nsec()),
            crtime: meta.created().unwrap_or(std::time::UNIX_EPOCH),
            perm: Permissions::from_bits_truncate(meta.mode() as u16),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            blksize: meta.blksize() as u32,
        };

        let ft = meta.file_type();
        if ft.is_file() {
            Ok(Self::RegularFile {
                common,
                size: meta.len(),
                blocks: meta.blocks(),
            })
        } else if ft.is_dir() {
            Ok(Self::Directory { common })
        } else if ft.is_symlink() {
            Ok(Self::Symlink {
                common,
                size: meta.len(),
            })
        } else if ft.is_char_device() {
            Ok(Self::CharDevice {
                common,
                rdev: meta.rdev(),
            })
        } else if ft.is_block_device() {
            Ok(Self::BlockDevice {
                common,
                rdev: meta.rdev(),
            })
        } else if ft.is_fifo() {
            Ok(Self::NamedPipe { common })
        } else if ft.is_socket() {
            Ok(Self::Socket { common })
        } else {
            error!(ft = ?ft, "Unknown file type encountered in FileAttr conversion");
            Err(())
        }
    }
}
