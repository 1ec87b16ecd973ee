// src/fs/mod.rs

//! Filesystem access used while discovering and reading project descriptors.
//!
//! Descriptor discovery goes through [`FileSystem`] so that the loader can be
//! exercised against [`mock::MockFileSystem`] without touching disk.

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        Ok(entries)
    }
}

/// Recursively copy `src` into `dst`, skipping every entry whose path
/// relative to `src` matches `skip` (a skipped directory is not descended).
///
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, skip: &dyn Fn(&Path) -> bool) -> Result<u64> {
    let mut copied = 0;
    let walker = walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(src) {
            Ok(rel) if rel.as_os_str().is_empty() => true,
            Ok(rel) => !skip(rel),
            Err(_) => false,
        });

    for entry in walker {
        let entry = entry.with_context(|| format!("walking {:?}", src))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relating {:?} to {:?}", entry.path(), src))?;
        let target = dst.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("creating dir {:?}", target))?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {:?} to {:?}", entry.path(), target))?;
            copied += 1;
        }
        // Symlinks and special files are not carried over.
    }

    Ok(copied)
}
