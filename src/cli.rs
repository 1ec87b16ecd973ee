// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{BackendConfig, ContainerArgValue, parse_container_arg};
use crate::project::UserParams;

/// Command-line arguments for `projrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "projrun",
    about = "Run a project entry point locally, optionally inside a conda, Docker or Singularity environment.",
    long_about = None
)]
pub struct CliArgs {
    /// Project location: a local directory, descriptor file or file:// URI.
    #[arg(value_name = "URI")]
    pub uri: String,

    /// Entry point to run: a declared name or a .py/.sh/.R script.
    #[arg(short = 'e', long, value_name = "NAME", default_value = "main")]
    pub entry_point: String,

    /// Version to check out (git commit, branch or tag).
    #[arg(short = 'v', long, value_name = "VERSION")]
    pub version: Option<String>,

    /// Entry point parameter, repeatable.
    #[arg(
        short = 'P',
        long = "param-list",
        value_name = "KEY=VALUE",
        value_parser = parse_key_val
    )]
    pub params: Vec<(String, String)>,

    /// `docker run` option, repeatable: `NAME` for a flag or `NAME=VALUE`.
    #[arg(long, value_name = "NAME[=VALUE]", value_parser = parse_container_arg)]
    pub docker_args: Vec<(String, ContainerArgValue)>,

    /// `singularity exec` option, repeatable: `NAME` or `NAME=VALUE`.
    #[arg(long, value_name = "NAME[=VALUE]", value_parser = parse_container_arg)]
    pub singularity_args: Vec<(String, ContainerArgValue)>,

    /// Experiment to create the run in.
    #[arg(long, value_name = "ID", default_value = "0")]
    pub experiment_id: String,

    /// Attach to an existing run instead of creating one.
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Parent directory for downloaded `path` parameters.
    #[arg(long, value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Do not activate the project's conda environment.
    #[arg(long)]
    pub no_conda: bool,

    /// Launch the run in a detached process and return immediately.
    #[arg(long)]
    pub detach: bool,

    /// Tracking URI. If omitted, `PROJRUN_TRACKING_URI` or `./mlruns` is used.
    #[arg(long, value_name = "URI")]
    pub tracking_uri: Option<String>,

    /// Backend configuration file (TOML), overridden by the flags above.
    #[arg(long, value_name = "PATH")]
    pub backend_config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROJRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the project, print the command, execute nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Run the entry point in this process's group. Set on detached
    /// relaunches.
    #[arg(long, hide = true)]
    pub inherit_process_group: bool,
}

impl CliArgs {
    /// User parameters in the order given.
    pub fn user_params(&self) -> UserParams {
        self.params.iter().cloned().collect()
    }

    /// Apply command-line overrides on top of `base`.
    pub fn apply_to(&self, mut base: BackendConfig) -> BackendConfig {
        if self.detach {
            base.synchronous = false;
        }
        if self.no_conda {
            base.use_conda = false;
        }
        if let Some(dir) = &self.storage_dir {
            base.storage_dir = Some(dir.clone());
        }
        if let Some(run_id) = &self.run_id {
            base.run_id = Some(run_id.clone());
        }
        if self.inherit_process_group {
            base.new_process_group = false;
        }
        base.docker_args.extend(self.docker_args.iter().cloned());
        base.singularity_args
            .extend(self.singularity_args.iter().cloned());
        base
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Parse `KEY=VALUE`; the value may itself contain `=`.
pub fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid parameter '{raw}': expected KEY=VALUE"))?;
    if key.trim().is_empty() {
        return Err(format!("invalid parameter '{raw}': empty key"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
