//! path-fuse shared library.
//!
//! Serves filesystems written against a path-based operation set through the inode-based FUSE
//! protocol.

/// Handle-based adapter, inode table, directory buffers and the FUSE glue.
pub mod fs;
