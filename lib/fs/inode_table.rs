//! Bidirectional index between numeric handles and path nodes.
//!
//! [`InodeTable`] owns every [`PathNode`] of a mounted session in a flat arena. Two hash indexes
//! sit over that arena: one keyed by handle, one keyed by `(parent handle, name)`. Parent links
//! are stored as handles, so nodes never borrow from each other and a path is rebuilt by walking
//! handles up to the root.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt as _, OsStringExt as _};
use std::path::PathBuf;

use rustc_hash::{FxBuildHasher, FxHashMap};
use tracing::{debug, error, trace};

use crate::fs::error::TableError;
use crate::fs::handle_factory::HandleFactory;
use crate::fs::{FileAttr, Handle, NO_PARENT, PATH_SEPARATOR, ROOT_HANDLE};

/// Initial bucket count of both indexes.
const INDEX_CAPACITY: usize = 8192;

/// Position of a node in the arena.
type NodeId = usize;

/// One component of the path graph.
///
/// Everything except the attribute cache is fixed at insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    handle: Handle,
    name: OsString,
    parent: Handle,
    native_ino: u64,
    attr: Option<FileAttr>,
}

impl PathNode {
    /// The handle assigned to this node when it was inserted.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The path component relative to the parent. The root is named `/`.
    #[must_use]
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    /// The parent's handle, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Handle> {
        (self.parent != NO_PARENT).then_some(self.parent)
    }

    /// The identity the wrapped filesystem reported when this node was discovered.
    #[must_use]
    pub fn native_ino(&self) -> u64 {
        self.native_ino
    }

    /// The last attributes observed for this node. The reported inode number always equals
    /// [`handle`](Self::handle).
    #[must_use]
    pub fn attr(&self) -> Option<&FileAttr> {
        self.attr.as_ref()
    }

    /// Whether this is the root node.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.handle == ROOT_HANDLE
    }
}

/// Hash of the composite `(parent, name)` key.
///
/// Seeds the accumulator with the parent handle and folds in the name one byte at a time.
fn name_hash(parent: Handle, name: &OsStr) -> u64 {
    name.as_bytes().iter().fold(parent, |hash, &byte| {
        hash.wrapping_mul(31).wrapping_add(u64::from(byte))
    })
}

/// Joins root-first components into an absolute path.
fn join_components<'a>(components: impl IntoIterator<Item = &'a OsStr>) -> PathBuf {
    let mut bytes = Vec::new();
    for component in components {
        bytes.extend_from_slice(PATH_SEPARATOR.as_bytes());
        bytes.extend_from_slice(component.as_bytes());
    }
    if bytes.is_empty() {
        bytes.extend_from_slice(PATH_SEPARATOR.as_bytes());
    }
    PathBuf::from(OsString::from_vec(bytes))
}

/// Handle ↔ path-node table for one mounted session.
///
/// The root is present from construction with handle [`ROOT_HANDLE`]. Other handles come from a
/// monotonic counter and are never reused while the table is alive.
///
/// Both indexes refer to the same arena slots, so a node is reachable by handle exactly when it
/// is reachable by `(parent, name)`. The arena is the only owner; [`teardown`](Self::teardown)
/// releases each node once.
#[derive(Debug)]
pub struct InodeTable {
    nodes: Vec<PathNode>,
    by_handle: FxHashMap<Handle, NodeId>,
    /// `name_hash(parent, name)` → chain of nodes sharing that hash.
    by_name: FxHashMap<u64, Vec<NodeId>>,
    handles: HandleFactory,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Creates a table holding only the root node.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            nodes: Vec::new(),
            by_handle: FxHashMap::with_capacity_and_hasher(INDEX_CAPACITY, FxBuildHasher),
            by_name: FxHashMap::with_capacity_and_hasher(INDEX_CAPACITY, FxBuildHasher),
            handles: HandleFactory::new(ROOT_HANDLE + 1),
        };
        table.link(PathNode {
            handle: ROOT_HANDLE,
            name: OsString::from(PATH_SEPARATOR),
            parent: NO_PARENT,
            native_ino: ROOT_HANDLE,
            attr: None,
        });
        table
    }

    fn link(&mut self, node: PathNode) -> NodeId {
        let id = self.nodes.len();
        self.by_handle.insert(node.handle, id);
        self.by_name
            .entry(name_hash(node.parent, &node.name))
            .or_default()
            .push(id);
        self.nodes.push(node);
        id
    }

    fn find_by_name(&self, parent: Handle, name: &OsStr) -> Option<NodeId> {
        self.by_name
            .get(&name_hash(parent, name))?
            .iter()
            .copied()
            .find(|&id| {
                let node = &self.nodes[id];
                node.parent == parent && node.name == name
            })
    }

    /// Enters `name` under `parent` and returns its node.
    ///
    /// Idempotent: if `(parent, name)` already names a node, that node is returned unchanged and
    /// keeps its handle. Otherwise a node with a fresh handle is linked into both indexes.
    ///
    /// # Errors
    ///
    /// [`TableError::UnknownParent`] if `parent` is not in the table.
    pub fn insert(
        &mut self,
        parent: Handle,
        name: &OsStr,
        native_ino: u64,
    ) -> Result<&PathNode, TableError> {
        if !self.by_handle.contains_key(&parent) {
            return Err(TableError::UnknownParent(parent));
        }

        if let Some(id) = self.find_by_name(parent, name) {
            trace!(parent, ?name, handle = self.nodes[id].handle, "node already present");
            return Ok(&self.nodes[id]);
        }

        let handle = self.handles.allocate();
        let id = self.link(PathNode {
            handle,
            name: name.to_os_string(),
            parent,
            native_ino,
            attr: None,
        });
        debug!(parent, ?name, handle, native_ino, "inserted node");
        Ok(&self.nodes[id])
    }

    /// Looks up a node by its handle.
    #[must_use]
    pub fn lookup_by_handle(&self, handle: Handle) -> Option<&PathNode> {
        self.by_handle.get(&handle).map(|&id| &self.nodes[id])
    }

    /// Looks up the node named `name` under `parent`.
    #[must_use]
    pub fn lookup_by_name(&self, parent: Handle, name: &OsStr) -> Option<&PathNode> {
        self.find_by_name(parent, name).map(|id| &self.nodes[id])
    }

    /// Caches `attr` on the node, rewriting its inode number to the node's handle.
    ///
    /// Returns `None` if `handle` is not in the table.
    pub fn set_attr(&mut self, handle: Handle, attr: FileAttr) -> Option<&PathNode> {
        let id = *self.by_handle.get(&handle)?;
        let node = &mut self.nodes[id];
        node.attr = Some(attr.with_ino(handle));
        Some(node)
    }

    /// Path components from the root down to `handle`, root excluded.
    fn components(&self, handle: Handle) -> Result<Vec<&OsStr>, TableError> {
        let mut components = Vec::new();
        let mut current = handle;
        loop {
            let node = self
                .lookup_by_handle(current)
                .ok_or(TableError::UnknownParent(current))?;
            if node.is_root() {
                break;
            }
            components.push(node.name());
            current = node.parent;

            if components.len() > self.nodes.len() {
                error!(handle, "parent chain does not reach the root");
                return Err(TableError::UnknownParent(handle));
            }
        }
        components.reverse();
        Ok(components)
    }

    /// Materialises the absolute path of `handle` by walking parent links up to the root.
    ///
    /// # Errors
    ///
    /// [`TableError::UnknownParent`] if `handle` or any ancestor is missing.
    pub fn path_of(&self, handle: Handle) -> Result<PathBuf, TableError> {
        Ok(join_components(self.components(handle)?))
    }

    /// The absolute path `name` would have as a child of `parent`.
    ///
    /// # Errors
    ///
    /// [`TableError::UnknownParent`] if `parent` or any ancestor is missing.
    pub fn child_path(&self, parent: Handle, name: &OsStr) -> Result<PathBuf, TableError> {
        let mut components = self.components(parent)?;
        components.push(name);
        Ok(join_components(components))
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the table holds no nodes. Only true after [`teardown`](Self::teardown).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates every node in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PathNode> {
        self.nodes.iter()
    }

    /// Releases every node and both indexes. Returns how many nodes were released.
    pub fn teardown(&mut self) -> usize {
        let released = self.nodes.len();
        self.by_handle.clear();
        self.by_name.clear();
        self.nodes.clear();
        debug!(released, "inode table torn down");
        released
    }

    /// Whether every node is reachable through both indexes, and both indexes hold exactly the
    /// owned set.
    ///
    /// Intended for testing only.
    #[doc(hidden)]
    #[must_use]
    pub fn indexes_agree(&self) -> bool {
        let chained: usize = self.by_name.values().map(Vec::len).sum();
        self.by_handle.len() == self.nodes.len()
            && chained == self.nodes.len()
            && self.nodes.iter().enumerate().all(|(id, node)| {
                self.by_handle.get(&node.handle) == Some(&id)
                    && self.find_by_name(node.parent, &node.name) == Some(id)
            })
    }
}
