// src/exec/spawn.rs

//! Launching run processes, normally as leaders of their own process group
//! so that a cancel reaches everything they start.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::info;

use super::handle::LocalRunHandle;
use crate::errors::{ProjrunError, Result};

/// Windows `CREATE_NEW_PROCESS_GROUP`.
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// A shell invocation of `command`.
pub fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("bash");
        c.arg("-c").arg(command);
        c
    }
}

fn new_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// Which process group a run process joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessGroup {
    /// Lead a fresh group.
    #[default]
    New,
    /// Stay in this process's group, so that signalling the group this
    /// process belongs to also reaches the run.
    Inherit,
}

/// Spawn `cmd` in `work_dir` with `env_vars` merged over the inherited
/// environment. Output is inherited from this process.
pub fn spawn(
    mut cmd: Command,
    run_id: &str,
    work_dir: &Path,
    env_vars: &BTreeMap<String, String>,
    group: ProcessGroup,
) -> Result<LocalRunHandle> {
    cmd.current_dir(work_dir).envs(env_vars);
    if group == ProcessGroup::New {
        new_process_group(&mut cmd);
    }

    let child = cmd.spawn().map_err(|e| {
        ProjrunError::Execution(format!(
            "spawning run {run_id} in {}: {e}",
            work_dir.display()
        ))
    })?;

    info!(run_id, pid = ?child.id(), ?group, "run process started");
    Ok(LocalRunHandle::new(
        run_id,
        child,
        work_dir.to_path_buf(),
        env_vars.clone(),
    ))
}

/// Run a shell command string for `run_id`.
pub fn spawn_shell(
    command: &str,
    run_id: &str,
    work_dir: &Path,
    env_vars: &BTreeMap<String, String>,
    group: ProcessGroup,
) -> Result<LocalRunHandle> {
    info!(run_id, command, "running command");
    spawn(shell_command(command), run_id, work_dir, env_vars, group)
}
