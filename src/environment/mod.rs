// src/environment/mod.rs

//! Execution environments a run's command can be wrapped in.
//!
//! Every backend goes through the same lifecycle, strictly in order:
//!
//! 1. [`ExecutionEnvironment::validate_installation`]: host tooling exists
//! 2. [`ExecutionEnvironment::validate_environment`]: configuration is usable
//! 3. [`ExecutionEnvironment::prepare_environment`]: build or resolve the runtime
//! 4. [`ExecutionEnvironment::command`]: prefix for the entry-point command
//!
//! [`run_lifecycle`] drives the steps; a failing step aborts the run.

pub mod artifact_storage;
pub mod build_context;
pub mod conda;
pub mod container;
pub mod docker;
pub mod singularity;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::errors::Result;
use crate::external::{RunInfo, Services};
use crate::project::{Project, ProjectEnvironment};
use crate::types::EnvironmentKind;

pub use conda::CondaEnvironment;
pub use container::HostEnv;
pub use docker::DockerEnvironment;
pub use singularity::SingularityEnvironment;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const TRACKING_URI_ENV_VAR: &str = "MLFLOW_TRACKING_URI";
pub const RUN_ID_ENV_VAR: &str = "MLFLOW_RUN_ID";
pub const EXPERIMENT_ID_ENV_VAR: &str = "MLFLOW_EXPERIMENT_ID";

/// What every backend knows about the run it prepares.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub work_dir: PathBuf,
    pub run: RunInfo,
    pub tracking_uri: String,
}

impl RunContext {
    /// Variables every launched process sees.
    pub fn base_env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (TRACKING_URI_ENV_VAR.to_string(), self.tracking_uri.clone()),
            (RUN_ID_ENV_VAR.to_string(), self.run.run_id.clone()),
            (
                EXPERIMENT_ID_ENV_VAR.to_string(),
                self.run.experiment_id.clone(),
            ),
        ])
    }
}

pub trait ExecutionEnvironment: Send + Sync {
    fn kind(&self) -> EnvironmentKind;

    fn context(&self) -> &RunContext;

    fn validate_installation(&mut self) -> BoxFuture<'_, Result<()>>;

    fn validate_environment(&mut self) -> BoxFuture<'_, Result<()>>;

    fn prepare_environment(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Shell-ready fragments placed before the entry-point command.
    fn command(&self) -> Result<Vec<String>>;

    /// Joins the fragments and the entry-point command.
    fn command_separator(&self) -> &'static str {
        " "
    }

    /// Variables to set for the launched host process.
    fn run_env_vars(&self) -> BTreeMap<String, String> {
        self.context().base_env_vars()
    }

    /// Arguments that make a detached relaunch pick this backend's
    /// configuration up again.
    fn relaunch_args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Pick the backend for a validated project, if it needs one.
///
/// A conda environment is only used when `use_conda` is set.
pub fn select(
    project: &Project,
    config: &BackendConfig,
    ctx: RunContext,
    services: &Services,
) -> Option<Box<dyn ExecutionEnvironment>> {
    match &project.environment {
        ProjectEnvironment::System => None,
        ProjectEnvironment::Conda(_) if !config.use_conda => {
            debug!("conda environment declared but disabled; running in system environment");
            None
        }
        ProjectEnvironment::Conda(env_file) => Some(Box::new(CondaEnvironment::new(
            ctx,
            env_file.clone(),
            services.conda.clone(),
        ))),
        ProjectEnvironment::Docker(env) => Some(Box::new(DockerEnvironment::new(
            ctx,
            project.name.clone(),
            env.clone(),
            config.docker_args.clone(),
            services.tracking.clone(),
            services.git.clone(),
        ))),
        ProjectEnvironment::Singularity(env) => Some(Box::new(SingularityEnvironment::new(
            ctx,
            project.name.clone(),
            env.clone(),
            config.singularity_args.clone(),
            services.tracking.clone(),
        ))),
    }
}

/// Run the four lifecycle steps in order and return the command fragments.
pub async fn run_lifecycle(env: &mut dyn ExecutionEnvironment) -> Result<Vec<String>> {
    let kind = env.kind();

    info!(environment = %kind, "validating installation");
    env.validate_installation().await?;

    info!(environment = %kind, "validating environment");
    env.validate_environment().await?;

    info!(environment = %kind, "preparing environment");
    env.prepare_environment().await?;

    let fragments = env.command()?;
    debug!(environment = %kind, ?fragments, "environment command ready");
    Ok(fragments)
}

/// Whether `program args...` can be started and exits successfully.
pub(crate) async fn tool_responds(program: &str, args: &[&str]) -> bool {
    tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
