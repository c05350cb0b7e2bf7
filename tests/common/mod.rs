#![allow(dead_code, missing_docs, clippy::unwrap_used)]

pub mod path_fs_mocks;

use std::ffi::OsString;

use path_fuse::fs::adapter::{AdapterOptions, LowLevelAdapter};
use path_fuse::fs::dirbuf::DirentIter;
use path_fuse::fs::path_fs::PathFs;
use path_fuse::fs::{FileHandle, Handle};

use self::path_fs_mocks::MockPathFs;

/// Options with a tiny initial buffer so fills exercise growth.
pub fn small_options() -> AdapterOptions {
    AdapterOptions {
        initial_dir_buffer: 16,
        ..AdapterOptions::default()
    }
}

/// An adapter over `fs` plus a second handle on the same mock state.
pub fn adapter_over(fs: MockPathFs) -> (LowLevelAdapter<MockPathFs>, MockPathFs) {
    (LowLevelAdapter::new(fs.clone(), small_options()), fs)
}

/// Decodes an encoded page into `(handle, name)` pairs.
pub fn decode(page: &[u8]) -> Vec<(Handle, OsString)> {
    DirentIter::new(page)
        .map(|d| (d.ino, d.name.to_os_string()))
        .collect()
}

/// Names of a decoded page, lossily converted for easy comparison.
pub fn names(page: &[u8]) -> Vec<String> {
    DirentIter::new(page)
        .map(|d| d.name.to_string_lossy().into_owned())
        .collect()
}

/// Pages through an open directory the way the kernel does: start at 0, then continue from the
/// `off` of the last entry received until an empty page comes back.
pub async fn read_all<F: PathFs>(
    adapter: &mut LowLevelAdapter<F>,
    fh: FileHandle,
    page_size: usize,
) -> Vec<String> {
    let mut all = Vec::new();
    let mut offset = 0;
    loop {
        let page = adapter.readdir(fh, page_size, offset).await.unwrap();
        let Some(last) = DirentIter::new(page).last() else {
            break;
        };
        all.extend(names(page));
        offset = last.off;
    }
    all
}
