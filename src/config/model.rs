// src/config/model.rs

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Value of a container runtime option passed through from the user.
///
/// In TOML:
///
/// ```toml
/// [docker_args]
/// gpus = "all"      # --gpus all
/// privileged = true # --privileged
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContainerArgValue {
    Flag(bool),
    Value(String),
}

/// Ordered container options, keyed by option name (without dashes).
pub type ContainerArgs = IndexMap<String, ContainerArgValue>;

/// Backend configuration for one local run.
///
/// Read from an optional TOML file and then overridden by CLI flags:
///
/// ```toml
/// synchronous = true
/// use_conda = false
/// storage_dir = "/scratch/projrun"
///
/// [singularity_args]
/// nv = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Run the entry point in this process (`true`) or hand the whole run
    /// to a detached child process (`false`).
    pub synchronous: bool,

    /// Activate the project's conda environment when it declares one.
    pub use_conda: bool,

    /// Parent directory for per-run scratch space (downloaded `path`
    /// parameters). Defaults to the system temp dir.
    pub storage_dir: Option<PathBuf>,

    /// Attach to an existing tracking record instead of creating one.
    pub run_id: Option<String>,

    pub docker_args: ContainerArgs,

    pub singularity_args: ContainerArgs,

    /// Program used for detached relaunch; defaults to the current
    /// executable.
    pub relaunch_program: Option<PathBuf>,

    /// Start the entry point as the leader of a new process group. A
    /// relaunched child turns this off so the entry point shares the group
    /// its launcher cancels.
    pub new_process_group: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            synchronous: true,
            use_conda: true,
            storage_dir: None,
            run_id: None,
            docker_args: ContainerArgs::new(),
            singularity_args: ContainerArgs::new(),
            relaunch_program: None,
            new_process_group: true,
        }
    }
}

/// Tracking coordinates threaded explicitly through a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub tracking_uri: String,
    pub experiment_id: String,
}

impl RunSettings {
    pub fn new(tracking_uri: impl Into<String>, experiment_id: impl Into<String>) -> Self {
        Self {
            tracking_uri: tracking_uri.into(),
            experiment_id: experiment_id.into(),
        }
    }
}

/// Render container options as runtime CLI arguments.
///
/// Single-character names get one dash (`-v`), longer names two
/// (`--gpus`). `true` flags render bare, `false` flags are dropped.
pub fn container_args_to_cli(args: &ContainerArgs) -> Vec<String> {
    let mut out = Vec::new();
    for (name, value) in args {
        let dashes = if name.chars().count() == 1 { "-" } else { "--" };
        match value {
            ContainerArgValue::Flag(true) => out.push(format!("{dashes}{name}")),
            ContainerArgValue::Flag(false) => {}
            ContainerArgValue::Value(v) => {
                out.push(format!("{dashes}{name}"));
                out.push(v.clone());
            }
        }
    }
    out
}

/// Render container options in the `NAME[=VALUE]` form accepted by
/// `--docker-args` / `--singularity-args`.
pub fn container_args_to_relaunch(args: &ContainerArgs) -> Vec<String> {
    args.iter()
        .filter_map(|(name, value)| match value {
            ContainerArgValue::Flag(true) => Some(name.clone()),
            ContainerArgValue::Flag(false) => None,
            ContainerArgValue::Value(v) => Some(format!("{name}={v}")),
        })
        .collect()
}

/// Parse `NAME[=VALUE]`; a bare name is a `true` flag.
pub fn parse_container_arg(raw: &str) -> Result<(String, ContainerArgValue), String> {
    let (name, value) = match raw.split_once('=') {
        Some((name, value)) => (name, ContainerArgValue::Value(value.to_string())),
        None => (raw, ContainerArgValue::Flag(true)),
    };
    let name = name.trim().trim_start_matches('-');
    if name.is_empty() {
        return Err(format!("invalid container argument '{raw}': empty name"));
    }
    Ok((name.to_string(), value))
}
