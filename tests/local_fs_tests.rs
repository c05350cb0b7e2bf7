#![allow(clippy::unwrap_used, missing_docs)]

use std::ffi::OsStr;
use std::path::Path;

use path_fuse::fs::adapter::{AdapterOptions, LowLevelAdapter};
use path_fuse::fs::local::LocalPathFs;
use path_fuse::fs::path_fs::PathFs as _;
use path_fuse::fs::{FileAttr, ROOT_HANDLE};

mod common;
use common::{names, read_all};

fn os(s: &str) -> &OsStr {
    OsStr::new(s)
}

/// Builds:
///
/// ```text
/// root/
///   hello.txt   ("hello")
///   sub/
///     nested.txt
///   link -> hello.txt
/// ```
fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("nested.txt"), b"").unwrap();
    std::os::unix::fs::symlink("hello.txt", dir.path().join("link")).unwrap();
    dir
}

fn adapter_for(dir: &Path) -> LowLevelAdapter<LocalPathFs> {
    LowLevelAdapter::new(LocalPathFs::new(dir), AdapterOptions::default())
}

#[tokio::test]
async fn getattr_maps_root_to_the_source_directory() {
    let dir = fixture();
    let mut fs = LocalPathFs::new(dir.path());
    assert_eq!(fs.root(), dir.path());

    let attr = fs.getattr(Path::new("/")).await.unwrap();
    assert!(attr.is_dir());

    let attr = fs.getattr(Path::new("/hello.txt")).await.unwrap();
    assert!(matches!(attr, FileAttr::RegularFile { size: 5, .. }));
}

#[tokio::test]
async fn symlinks_are_reported_not_followed() {
    let dir = fixture();
    let mut fs = LocalPathFs::new(dir.path());

    let attr = fs.getattr(Path::new("/link")).await.unwrap();
    assert!(matches!(attr, FileAttr::Symlink { size: 9, .. }));
}

#[tokio::test]
async fn lookup_through_the_adapter_resolves_host_files() {
    let dir = fixture();
    let mut adapter = adapter_for(dir.path());

    let sub = adapter.lookup(ROOT_HANDLE, os("sub")).await.unwrap();
    assert!(sub.attr.is_dir());
    assert_eq!(sub.attr.common().ino, sub.handle);

    let nested = adapter.lookup(sub.handle, os("nested.txt")).await.unwrap();
    assert!(matches!(nested.attr, FileAttr::RegularFile { size: 0, .. }));
    assert_eq!(
        adapter.table().path_of(nested.handle).unwrap(),
        Path::new("/sub/nested.txt")
    );
}

#[tokio::test]
async fn missing_entries_report_enoent() {
    let dir = fixture();
    let mut adapter = adapter_for(dir.path());

    let err = adapter.lookup(ROOT_HANDLE, os("absent")).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    assert_eq!(adapter.table().len(), 1);
}

#[tokio::test]
async fn opendir_on_a_regular_file_is_enotdir() {
    let dir = fixture();
    let mut adapter = adapter_for(dir.path());
    let hello = adapter.lookup(ROOT_HANDLE, os("hello.txt")).await.unwrap();

    let err = adapter.opendir(hello.handle).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOTDIR);
    assert_eq!(adapter.open_dirs(), 0);
}

#[tokio::test]
async fn root_listing_is_served_end_to_end() {
    let dir = fixture();
    let mut adapter = adapter_for(dir.path());

    let fh = adapter.opendir(ROOT_HANDLE).await.unwrap();
    let listed = read_all(&mut adapter, fh, 64).await;
    assert_eq!(listed, vec![".", "..", "hello.txt", "link", "sub"]);
    assert!(adapter.dir_handle(fh).unwrap().fully_filled);

    // Every listed child is now addressable by name.
    for name in ["hello.txt", "link", "sub"] {
        assert!(adapter.table().lookup_by_name(ROOT_HANDLE, os(name)).is_some());
    }

    adapter.releasedir(fh).await.unwrap();
    assert_eq!(adapter.teardown().await, 4);
}

#[tokio::test]
async fn subdirectory_listing_uses_its_own_path() {
    let dir = fixture();
    let mut adapter = adapter_for(dir.path());
    let sub = adapter.lookup(ROOT_HANDLE, os("sub")).await.unwrap().handle;

    let fh = adapter.opendir(sub).await.unwrap();
    let page = adapter.readdir(fh, 4096, 0).await.unwrap();
    assert_eq!(names(page), vec![".", "..", "nested.txt"]);
}

#[tokio::test]
async fn restaging_picks_up_new_files() {
    let dir = fixture();
    let mut adapter = adapter_for(dir.path());
    let fh = adapter.opendir(ROOT_HANDLE).await.unwrap();
    let before = names(adapter.readdir(fh, 4096, 0).await.unwrap());

    std::fs::write(dir.path().join("late.txt"), b"").unwrap();
    let after = names(adapter.readdir(fh, 4096, 0).await.unwrap());

    assert!(!before.contains(&"late.txt".to_owned()));
    assert!(after.contains(&"late.txt".to_owned()));
}
