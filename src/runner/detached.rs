// src/runner/detached.rs

//! Asynchronous mode: a detached child process performs the synchronous
//! flow for a pre-created run and reports through the tracking record.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::info;

use crate::errors::Result;
use crate::exec::LocalRunHandle;
use crate::exec::ProcessGroup;
use crate::exec::spawn::spawn;
use crate::project::UserParams;

/// Everything a relaunched child needs to attach to an existing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedLaunch {
    pub program: PathBuf,
    /// Local project directory, already fetched at the requested version.
    pub work_dir: PathBuf,
    pub entry_point: String,
    pub run_id: String,
    pub experiment_id: String,
    pub tracking_uri: String,
    pub storage_dir: Option<PathBuf>,
    pub use_conda: bool,
    pub params: UserParams,
    /// Backend-specific arguments, e.g. `--docker-args gpus=all`.
    pub env_args: Vec<String>,
}

impl DetachedLaunch {
    /// Arguments for `program`, in the command line's own syntax.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            self.work_dir.display().to_string(),
            "-e".to_string(),
            self.entry_point.clone(),
            "--run-id".to_string(),
            self.run_id.clone(),
            "--experiment-id".to_string(),
            self.experiment_id.clone(),
            "--tracking-uri".to_string(),
            self.tracking_uri.clone(),
            "--inherit-process-group".to_string(),
        ];
        if let Some(dir) = &self.storage_dir {
            args.push("--storage-dir".to_string());
            args.push(dir.display().to_string());
        }
        if !self.use_conda {
            args.push("--no-conda".to_string());
        }
        args.extend(self.env_args.iter().cloned());
        for (key, value) in &self.params {
            args.push("-P".to_string());
            args.push(format!("{key}={value}"));
        }
        args
    }

    /// Start the child as a process-group leader with `env_vars` merged
    /// over the inherited environment. The child keeps the entry point in
    /// that group, so cancelling the child's group stops the entry point.
    pub fn spawn(&self, env_vars: &BTreeMap<String, String>) -> Result<LocalRunHandle> {
        let args = self.args();
        info!(
            run_id = %self.run_id,
            program = %self.program.display(),
            args = %shell_words::join(&args),
            "asynchronously launching run"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        spawn(cmd, &self.run_id, &self.work_dir, env_vars, ProcessGroup::New)
    }
}
