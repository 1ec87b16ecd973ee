// src/exec/handle.rs

//! Handles over launched runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::environment::BoxFuture;
use crate::errors::Result;
use crate::types::RunStatus;

/// A launched run that can be polled, awaited and cancelled.
///
/// Calls must be serialized: a handle is not meant to be waited on and
/// cancelled from several tasks at once.
pub trait RunHandle: Send {
    fn run_id(&self) -> &str;

    /// Non-blocking status poll.
    fn status(&mut self) -> Result<RunStatus>;

    /// Wait for the run to exit; `true` iff it exited with code 0.
    fn wait(&mut self) -> BoxFuture<'_, Result<bool>>;

    /// Kill the run's process tree (if still running) and reap it.
    fn cancel(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// A run backed by a local child process that leads its own process group.
#[derive(Debug)]
pub struct LocalRunHandle {
    run_id: String,
    child: Child,
    pid: Option<u32>,
    work_dir: PathBuf,
    env_vars: BTreeMap<String, String>,
    killed: bool,
}

impl LocalRunHandle {
    pub fn new(
        run_id: impl Into<String>,
        child: Child,
        work_dir: PathBuf,
        env_vars: BTreeMap<String, String>,
    ) -> Self {
        let pid = child.id();
        Self {
            run_id: run_id.into(),
            child,
            pid,
            work_dir,
            env_vars,
            killed: false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Variables set for the process on top of the inherited environment.
    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env_vars
    }
}

impl RunHandle for LocalRunHandle {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn status(&mut self) -> Result<RunStatus> {
        let status = match self.child.try_wait()? {
            None => RunStatus::Running,
            Some(_) if self.killed => RunStatus::Killed,
            Some(exit) if exit.success() => RunStatus::Finished,
            Some(_) => RunStatus::Failed,
        };
        Ok(status)
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let exit = self.child.wait().await?;
            debug!(run_id = %self.run_id, code = ?exit.code(), "run process exited");
            Ok(exit.success())
        })
    }

    fn cancel(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }

            if let Some(pid) = self.pid {
                match signal_tree(pid, &mut self.child) {
                    Ok(true) => self.killed = true,
                    Ok(false) => info!(
                        run_id = %self.run_id,
                        pid,
                        "failed to terminate run process; it may have already exited"
                    ),
                    Err(e) => warn!(
                        run_id = %self.run_id,
                        pid,
                        error = %e,
                        "error while signalling run process"
                    ),
                }
            }

            self.child.wait().await?;
            Ok(())
        })
    }
}

/// SIGKILL the process group led by `pid`, or just `pid` when it does not
/// lead one. `Ok(false)` means the process was already gone.
#[cfg(unix)]
fn signal_tree(pid: u32, _child: &mut Child) -> std::io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::{Pid, getpgid};

    let raw = i32::try_from(pid)
        .map_err(|_| std::io::Error::other(format!("pid {pid} out of range")))?;
    let pid = Pid::from_raw(raw);

    let signalled = match getpgid(Some(pid)) {
        Ok(pgid) if pgid == pid => killpg(pgid, Signal::SIGKILL),
        Ok(_) => kill(pid, Signal::SIGKILL),
        Err(e) => Err(e),
    };

    match signalled {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(std::io::Error::from(e)),
    }
}

#[cfg(not(unix))]
fn signal_tree(_pid: u32, child: &mut Child) -> std::io::Result<bool> {
    match child.start_kill() {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(false),
        Err(e) => Err(e),
    }
}
