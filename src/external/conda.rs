// src/external/conda.rs

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, info};

use super::CondaEnvManager;
use crate::errors::{ProjrunError, Result};

/// Environment variable pointing at a conda installation root.
pub const CONDA_HOME_ENV_VAR: &str = "PROJRUN_CONDA_HOME";

const CONDA_INSTALL_HINT: &str =
    "see https://docs.conda.io/projects/conda/en/latest/user-guide/install/";

#[derive(Debug, Deserialize)]
struct EnvList {
    #[serde(default)]
    envs: Vec<PathBuf>,
}

/// Manages environments through the `conda` executable.
#[derive(Debug, Clone)]
pub struct CondaCli {
    conda: PathBuf,
}

impl CondaCli {
    pub fn new(conda: impl Into<PathBuf>) -> Self {
        Self {
            conda: conda.into(),
        }
    }

    /// `$PROJRUN_CONDA_HOME/bin/conda` when set, else `conda` from `PATH`.
    pub fn from_env() -> Self {
        match std::env::var_os(CONDA_HOME_ENV_VAR) {
            Some(home) => Self::new(PathBuf::from(home).join("bin").join("conda")),
            None => Self::new("conda"),
        }
    }

    /// Name of the environment built from a file with these contents.
    pub fn env_name_for(contents: &[u8]) -> String {
        let hash = blake3::hash(contents).to_hex();
        format!("projrun-{}", &hash.as_str()[..40])
    }

    fn conda_cmd(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.conda).args(args).output().map_err(|e| {
            ProjrunError::ToolingNotFound(format!(
                "could not find conda executable at {} ({e}); ensure conda is installed \
                 or set {CONDA_HOME_ENV_VAR}; {CONDA_INSTALL_HINT}",
                self.conda.display()
            ))
        })
    }

    fn existing_envs(&self) -> Result<Vec<String>> {
        let output = self.conda_cmd(&["env", "list", "--json"])?;
        if !output.status.success() {
            return Err(ProjrunError::Execution(format!(
                "conda env list failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let list: EnvList = serde_json::from_slice(&output.stdout).map_err(|e| {
            ProjrunError::Execution(format!("unexpected output from conda env list: {e}"))
        })?;
        Ok(list
            .envs
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    fn activate_script(&self) -> PathBuf {
        match self.conda.parent() {
            Some(bin) if !bin.as_os_str().is_empty() => bin.join("activate"),
            _ => PathBuf::from("activate"),
        }
    }
}

impl CondaEnvManager for CondaCli {
    fn resolve_or_create(&self, env_file: &Path) -> Result<String> {
        let contents = std::fs::read(env_file).map_err(|e| {
            ProjrunError::InvalidProjectSpec(format!(
                "could not read conda environment file {}: {e}",
                env_file.display()
            ))
        })?;
        let name = Self::env_name_for(&contents);

        if self.existing_envs()?.contains(&name) {
            debug!(env = %name, "reusing existing conda environment");
            return Ok(name);
        }

        info!(env = %name, file = %env_file.display(), "creating conda environment");
        let file = env_file.to_string_lossy();
        let output = self.conda_cmd(&["env", "create", "-n", name.as_str(), "--file", &*file])?;
        if !output.status.success() {
            return Err(ProjrunError::Execution(format!(
                "conda env create failed for {}: {}",
                env_file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(name)
    }

    fn activate_command(&self, env_name: &str) -> Vec<String> {
        vec![format!(
            "source {} {} 1>&2",
            shell_words::quote(&self.activate_script().to_string_lossy()),
            shell_words::quote(env_name)
        )]
    }
}
