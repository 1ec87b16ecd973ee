// src/external/git.rs

use std::path::Path;
use std::process::Command;

use tracing::debug;

use super::GitMetadata;

/// Reads the checked-out commit with the `git` CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl GitMetadata for GitCli {
    fn commit_hash(&self, work_dir: &Path) -> Option<String> {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(work_dir)
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let hash = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (!hash.is_empty()).then_some(hash)
            }
            Ok(out) => {
                debug!(
                    work_dir = %work_dir.display(),
                    code = ?out.status.code(),
                    "not a git checkout; no commit hash"
                );
                None
            }
            Err(e) => {
                debug!(error = %e, "git executable unavailable; no commit hash");
                None
            }
        }
    }
}
