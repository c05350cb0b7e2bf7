#![allow(missing_docs, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use path_fuse::fs::path_fs::{Filler, PathFs};
use path_fuse::fs::{CommonFileAttr, FileAttr, Permissions};

fn common(ino: u64) -> CommonFileAttr {
    CommonFileAttr {
        ino,
        atime: SystemTime::UNIX_EPOCH,
        mtime: SystemTime::UNIX_EPOCH,
        ctime: SystemTime::UNIX_EPOCH,
        crtime: SystemTime::UNIX_EPOCH,
        perm: Permissions::OWNER_RWX | Permissions::GROUP_READ | Permissions::OTHER_READ,
        nlink: 1,
        uid: 1000,
        gid: 1000,
        blksize: 4096,
    }
}

/// Directory attributes with the given native inode number.
pub fn dir_attr(ino: u64) -> FileAttr {
    FileAttr::Directory {
        common: common(ino),
    }
}

/// Regular file attributes with the given native inode number and size.
pub fn file_attr(ino: u64, size: u64) -> FileAttr {
    FileAttr::RegularFile {
        common: common(ino),
        size,
        blocks: size.div_ceil(512),
    }
}

/// One call the adapter made into the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Getattr(PathBuf),
    Opendir(PathBuf),
    Readdir { path: PathBuf, offset: u64 },
    Releasedir { path: PathBuf, dir: u64 },
}

/// Makes `readdir` of a path fail after handing out `after` entries.
#[derive(Debug, Clone, Copy)]
pub struct ReaddirFailure {
    pub after: usize,
    pub errno: i32,
}

/// Shared state backing `MockPathFs`.
#[derive(Debug)]
pub struct MockState {
    /// Absolute path → attributes. Native inode numbers start at 1000 so they never collide
    /// with adapter handles by accident.
    pub nodes: BTreeMap<PathBuf, FileAttr>,
    /// Whether listings start with `.` and `..`.
    pub emit_dots: bool,
    pub fail_getattr: HashMap<PathBuf, i32>,
    pub fail_opendir: HashMap<PathBuf, i32>,
    pub fail_readdir: HashMap<PathBuf, ReaddirFailure>,
    pub fail_releasedir: HashMap<PathBuf, i32>,
    pub calls: Vec<Call>,
    next_ino: u64,
    next_dir: u64,
}

impl Default for MockState {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(PathBuf::from("/"), dir_attr(1000));
        Self {
            nodes,
            emit_dots: false,
            fail_getattr: HashMap::new(),
            fail_opendir: HashMap::new(),
            fail_readdir: HashMap::new(),
            fail_releasedir: HashMap::new(),
            calls: Vec::new(),
            next_ino: 1001,
            next_dir: 1,
        }
    }
}

impl MockState {
    fn alloc_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    /// Children of `path`, sorted by name.
    fn children(&self, path: &Path) -> Vec<(OsString, FileAttr)> {
        self.nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, attr)| (p.file_name().unwrap().to_os_string(), *attr))
            .collect()
    }
}

/// A clonable in-memory `PathFs`. Clones share state, so a test keeps one clone to inspect
/// calls and inject failures while the adapter owns the other.
#[derive(Debug, Clone, Default)]
pub struct MockPathFs {
    pub state: Arc<Mutex<MockState>>,
}

/// The per-open handle the mock hands out.
#[derive(Debug)]
pub struct MockDir {
    pub id: u64,
}

impl MockPathFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let ino = state.alloc_ino();
            state.nodes.insert(PathBuf::from(path), dir_attr(ino));
        }
        self
    }

    pub fn with_file(self, path: &str, size: u64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let ino = state.alloc_ino();
            state.nodes.insert(PathBuf::from(path), file_attr(ino, size));
        }
        self
    }

    pub fn with_dots(self) -> Self {
        self.state.lock().unwrap().emit_dots = true;
        self
    }

    pub fn fail_getattr(&self, path: &str, errno: i32) {
        self.state
            .lock()
            .unwrap()
            .fail_getattr
            .insert(PathBuf::from(path), errno);
    }

    pub fn fail_opendir(&self, path: &str, errno: i32) {
        self.state
            .lock()
            .unwrap()
            .fail_opendir
            .insert(PathBuf::from(path), errno);
    }

    pub fn fail_readdir(&self, path: &str, after: usize, errno: i32) {
        self.state
            .lock()
            .unwrap()
            .fail_readdir
            .insert(PathBuf::from(path), ReaddirFailure { after, errno });
    }

    pub fn fail_releasedir(&self, path: &str, errno: i32) {
        self.state
            .lock()
            .unwrap()
            .fail_releasedir
            .insert(PathBuf::from(path), errno);
    }

    pub fn native_ino(&self, path: &str) -> u64 {
        self.state.lock().unwrap().nodes[Path::new(path)].common().ino
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn getattr_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Getattr(_)))
            .count()
    }

    pub fn released(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Releasedir { .. }))
            .collect()
    }
}

fn errno(code: i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(code)
}

impl PathFs for MockPathFs {
    type DirHandle = MockDir;

    async fn getattr(&mut self, path: &Path) -> Result<FileAttr, std::io::Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Getattr(path.to_path_buf()));
        if let Some(&code) = state.fail_getattr.get(path) {
            return Err(errno(code));
        }
        state
            .nodes
            .get(path)
            .copied()
            .ok_or_else(|| errno(libc::ENOENT))
    }

    async fn opendir(&mut self, path: &Path) -> Result<MockDir, std::io::Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Opendir(path.to_path_buf()));
        if let Some(&code) = state.fail_opendir.get(path) {
            return Err(errno(code));
        }
        match state.nodes.get(path) {
            Some(attr) if attr.is_dir() => {}
            Some(_) => return Err(errno(libc::ENOTDIR)),
            None => return Err(errno(libc::ENOENT)),
        }
        let id = state.next_dir;
        state.next_dir += 1;
        Ok(MockDir { id })
    }

    async fn readdir(
        &mut self,
        path: &Path,
        _dir: &mut MockDir,
        offset: u64,
        filler: &mut Filler<'_>,
    ) -> Result<(), std::io::Error> {
        let (entries, failure) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Readdir {
                path: path.to_path_buf(),
                offset,
            });
            let Some(&own) = state.nodes.get(path) else {
                return Err(errno(libc::ENOENT));
            };

            let mut entries = Vec::new();
            if state.emit_dots {
                let parent = path
                    .parent()
                    .and_then(|p| state.nodes.get(p).copied())
                    .unwrap_or(own);
                entries.push((OsString::from("."), own));
                entries.push((OsString::from(".."), parent));
            }
            entries.extend(state.children(path));
            (entries, state.fail_readdir.get(path).copied())
        };

        let start = usize::try_from(offset).unwrap();
        for (index, (name, attr)) in entries.iter().enumerate().skip(start) {
            if let Some(f) = failure
                && f.after == index
            {
                return Err(errno(f.errno));
            }
            if filler(name.as_os_str(), attr, index as u64 + 1) {
                return Ok(());
            }
        }
        match failure {
            Some(f) if f.after >= entries.len() => Err(errno(f.errno)),
            _ => Ok(()),
        }
    }

    async fn releasedir(&mut self, path: &Path, dir: MockDir) -> Result<(), std::io::Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Releasedir {
            path: path.to_path_buf(),
            dir: dir.id,
        });
        match state.fail_releasedir.get(path) {
            Some(&code) => Err(errno(code)),
            None => Ok(()),
        }
    }
}
