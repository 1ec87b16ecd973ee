// src/environment/build_context.rs

//! Staging of the project tree for container image builds.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::errors::{ProjrunError, Result};
use crate::fs::copy_tree;

/// Never copied into a build context, at any depth.
pub const DEFAULT_IGNORES: [&str; 8] = [
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    "*.pyc",
    ".ipynb_checkpoints",
    ".DS_Store",
    "mlruns",
];

pub const DOCKERIGNORE_FILE_NAME: &str = ".dockerignore";

const STAGED_DIR_NAME: &str = "project-contents";
const ARCHIVE_FILE_NAME: &str = "build-context.tar";

fn build_err(msg: impl Into<String>) -> ProjrunError {
    ProjrunError::BuildContext(msg.into())
}

/// Matcher for paths (relative to the project root) left out of a build
/// context: the defaults plus the patterns in the project's `.dockerignore`.
pub fn ignore_matcher(work_dir: &Path) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    let mut add = |pattern: &str| -> Result<()> {
        let glob = Glob::new(pattern)
            .map_err(|e| build_err(format!("invalid ignore pattern '{pattern}': {e}")))?;
        builder.add(glob);
        Ok(())
    };

    for name in DEFAULT_IGNORES {
        add(name)?;
        add(&format!("**/{name}"))?;
    }

    let dockerignore = work_dir.join(DOCKERIGNORE_FILE_NAME);
    if dockerignore.is_file() {
        let contents = fs::read_to_string(&dockerignore)?;
        for line in contents.lines() {
            let line = line.trim();
            // Re-inclusion (`!pattern`) is not supported.
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let pattern = line.trim_start_matches('/').trim_end_matches('/');
            if !pattern.is_empty() {
                add(pattern)?;
            }
        }
    }

    builder
        .build()
        .map_err(|e| build_err(format!("building ignore set: {e}")))
}

/// Fail when the project already contains a file named like a generated one.
pub fn check_generated_name(work_dir: &Path, generated_name: &str) -> Result<()> {
    let existing = work_dir.join(generated_name);
    if existing.exists() {
        return Err(build_err(format!(
            "project contains {}, which clashes with the generated build file; \
             rename or remove it",
            existing.display()
        )));
    }
    Ok(())
}

/// `staging` relative to `work_dir`, when it lies inside it.
fn staging_inside(work_dir: &Path, staging: &Path) -> Result<Option<PathBuf>> {
    let canonical = |path: &Path| {
        fs::canonicalize(path)
            .map_err(|e| build_err(format!("resolving {}: {e}", path.display())))
    };
    let work_dir = canonical(work_dir)?;
    let staging = canonical(staging)?;
    Ok(staging.strip_prefix(&work_dir).ok().map(Path::to_path_buf))
}

/// A private staging directory holding a filtered copy of the project plus
/// one generated build file.
///
/// Removed by [`BuildContext::close`] (or on drop).
#[derive(Debug)]
pub struct BuildContext {
    dir: TempDir,
    contents: PathBuf,
}

impl BuildContext {
    /// Copy `work_dir` into a fresh staging tree under the system temp dir
    /// and write the generated file `generated_name` at its root.
    pub fn stage(work_dir: &Path, generated_name: &str, generated_contents: &str) -> Result<Self> {
        Self::stage_in(&std::env::temp_dir(), work_dir, generated_name, generated_contents)
    }

    /// Like [`BuildContext::stage`], with the staging tree under `parent`.
    ///
    /// When `parent` lies inside `work_dir` the staging tree itself is left
    /// out of the copy.
    pub fn stage_in(
        parent: &Path,
        work_dir: &Path,
        generated_name: &str,
        generated_contents: &str,
    ) -> Result<Self> {
        check_generated_name(work_dir, generated_name)?;
        let ignore = ignore_matcher(work_dir)?;

        let dir = tempfile::Builder::new()
            .prefix("projrun-build-")
            .tempdir_in(parent)
            .map_err(|e| build_err(format!("creating staging directory: {e}")))?;
        let own_tree = staging_inside(work_dir, dir.path())?;
        let contents = dir.path().join(STAGED_DIR_NAME);

        let skip = |rel: &Path| ignore.is_match(rel) || own_tree.as_deref() == Some(rel);
        let copied = copy_tree(work_dir, &contents, &skip)
            .map_err(|e| build_err(format!("staging {}: {e:#}", work_dir.display())))?;
        fs::write(contents.join(generated_name), generated_contents)
            .map_err(|e| build_err(format!("writing {generated_name}: {e}")))?;

        debug!(
            work_dir = %work_dir.display(),
            staging = %contents.display(),
            files = copied,
            "staged build context"
        );

        Ok(Self { dir, contents })
    }

    pub fn contents_dir(&self) -> &Path {
        &self.contents
    }

    /// Package the staged tree as a tar archive whose entries live under
    /// `prefix/`. Returns the archive path inside the staging directory.
    pub fn archive(&self, prefix: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(ARCHIVE_FILE_NAME);
        let file = File::create(&path)
            .map_err(|e| build_err(format!("creating {}: {e}", path.display())))?;

        let mut builder = tar::Builder::new(file);
        builder.follow_symlinks(false);
        builder
            .append_dir_all(prefix, &self.contents)
            .and_then(|_| builder.finish())
            .map_err(|e| build_err(format!("writing build context archive: {e}")))?;

        Ok(path)
    }

    /// Remove the staging directory. Failure is logged, not returned.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(
                path = %path.display(),
                error = %e,
                "could not remove temporary build context"
            );
        }
    }
}
