// src/project/loader.rs

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::{ProjrunError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::project::model::{Project, RawProjectFile};
use crate::project::validate::validate_project;

/// Canonical descriptor name, matched case-insensitively.
pub const DESCRIPTOR_FILE_NAME: &str = "MLproject";

/// Where a descriptor was (or was not) found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorLocation {
    /// The descriptor file, if the project has one.
    pub descriptor: Option<PathBuf>,
    /// The project working directory.
    pub directory: PathBuf,
}

/// Locate the descriptor for `path`.
///
/// - A directory is searched for a file named like [`DESCRIPTOR_FILE_NAME`]
///   (ignoring case; the first match in sorted order wins). No match means
///   the project has no descriptor.
/// - A file is used directly; its parent becomes the working directory.
pub fn find_descriptor(fs: &dyn FileSystem, path: &Path) -> Result<DescriptorLocation> {
    if fs.is_dir(path) {
        let mut entries = fs.read_dir(path)?;
        entries.sort();
        let descriptor = entries.into_iter().find(|entry| {
            entry
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.eq_ignore_ascii_case(DESCRIPTOR_FILE_NAME))
                && fs.is_file(entry)
        });
        return Ok(DescriptorLocation {
            descriptor,
            directory: path.to_path_buf(),
        });
    }

    if fs.is_file(path) {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        return Ok(DescriptorLocation {
            descriptor: Some(path.to_path_buf()),
            directory,
        });
    }

    Err(ProjrunError::ProjectNotFound(format!(
        "'{}' is neither a project directory nor a descriptor file",
        path.display()
    )))
}

/// Parse descriptor text. An empty document yields an empty descriptor.
pub fn parse_descriptor(contents: &str) -> Result<RawProjectFile> {
    let value: serde_yaml::Value = serde_yaml::from_str(contents)?;
    if value.is_null() {
        return Ok(RawProjectFile::default());
    }
    Ok(serde_yaml::from_value(value)?)
}

/// Load and validate the project at `path` from the real filesystem.
pub fn load_project(path: impl AsRef<Path>) -> Result<Project> {
    load_project_with_fs(&RealFileSystem, path.as_ref())
}

/// Load and validate the project at `path` through `fs`.
pub fn load_project_with_fs(fs: &dyn FileSystem, path: &Path) -> Result<Project> {
    let location = find_descriptor(fs, path)?;

    let raw = match &location.descriptor {
        Some(descriptor) => {
            info!(descriptor = %descriptor.display(), "loading project descriptor");
            parse_descriptor(&fs.read_to_string(descriptor)?)?
        }
        None => {
            debug!(
                directory = %location.directory.display(),
                "no project descriptor found; assuming an empty one"
            );
            RawProjectFile::default()
        }
    };

    validate_project(raw, &location.directory, fs)
}
