// src/external/fetch.rs

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

use super::ProjectFetcher;
use crate::errors::{ProjrunError, Result};
use crate::project::parameter::{local_path_or_none, uri_scheme};

/// Fetches projects that already live on local disk.
///
/// Without a version the directory is used in place. With a version the
/// directory must be a git checkout; it is cloned into a fresh temporary
/// directory and the version is checked out there, so the user's tree is
/// never modified.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProjectFetcher;

impl ProjectFetcher for LocalProjectFetcher {
    fn fetch(&self, uri: &str, version: Option<&str>) -> Result<PathBuf> {
        let path = local_path_or_none(uri).ok_or_else(|| {
            ProjrunError::ProjectNotFound(format!(
                "cannot fetch project from '{uri}': scheme '{}' is not supported, \
                 use a local path or file:// URI",
                uri_scheme(uri).unwrap_or_default()
            ))
        })?;

        if !path.exists() {
            return Err(ProjrunError::ProjectNotFound(format!(
                "could not find project at '{uri}'"
            )));
        }
        let path = std::path::absolute(&path)?;

        let Some(version) = version else {
            debug!(path = %path.display(), "using local project in place");
            return Ok(path);
        };

        if !path.is_dir() || !path.join(".git").exists() {
            return Err(ProjrunError::Execution(format!(
                "version '{version}' requested but {} is not a git repository",
                path.display()
            )));
        }

        let checkout = tempfile::Builder::new()
            .prefix("projrun-checkout-")
            .tempdir()?
            .keep();

        info!(
            source = %path.display(),
            version,
            dest = %checkout.display(),
            "cloning project to check out requested version"
        );

        run_git(
            Command::new("git")
                .arg("clone")
                .arg("--quiet")
                .arg(&path)
                .arg(&checkout),
            "clone",
        )?;
        run_git(
            Command::new("git")
                .args(["checkout", "--quiet", version])
                .current_dir(&checkout),
            "checkout",
        )?;

        Ok(checkout)
    }
}

fn run_git(cmd: &mut Command, action: &str) -> Result<()> {
    let output = cmd.output().map_err(|e| {
        ProjrunError::ToolingNotFound(format!("could not run git {action}: {e}"))
    })?;
    if !output.status.success() {
        return Err(ProjrunError::Execution(format!(
            "git {action} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
