// src/runner/local.rs

//! Local run orchestration.
//!
//! [`LocalRunner::run`] fetches and loads the project, creates (or attaches
//! to) the tracking record, drives the execution environment and launches
//! the entry point, either in-process or through a detached relaunch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::detached::DetachedLaunch;
use crate::config::{BackendConfig, RunSettings};
use crate::environment::{self, ExecutionEnvironment, RunContext};
use crate::errors::{ProjrunError, Result};
use crate::exec::{LocalRunHandle, ProcessGroup, RunHandle, spawn_shell};
use crate::external::{RunInfo, Services};
use crate::project::{EntryPoint, Project, UserParams, load_project};
use crate::types::{EnvironmentKind, RunStatus};

pub const PROJECT_ENV_TAG: &str = "projrun.project.env";
pub const SOURCE_URI_TAG: &str = "projrun.source.uri";
pub const SOURCE_ENTRY_POINT_TAG: &str = "projrun.source.entry_point";
pub const SOURCE_GIT_COMMIT_TAG: &str = "projrun.source.git.commit";

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub uri: String,
    pub entry_point: String,
    pub params: UserParams,
    pub version: Option<String>,
}

impl RunRequest {
    pub fn new(uri: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            entry_point: entry_point.into(),
            params: UserParams::new(),
            version: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Result of a dry run: what would be executed, with nothing downloaded,
/// built or spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub work_dir: PathBuf,
    pub entry_point: String,
    pub environment: Option<EnvironmentKind>,
    pub command: String,
}

/// A fetched, loaded project with its resolved entry point.
struct LoadedProject {
    work_dir: PathBuf,
    project: Project,
    entry_point: EntryPoint,
}

pub struct LocalRunner {
    services: Services,
    settings: RunSettings,
}

impl LocalRunner {
    pub fn new(services: Services, settings: RunSettings) -> Self {
        Self { services, settings }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    fn load(&self, request: &RunRequest) -> Result<LoadedProject> {
        let work_dir = self
            .services
            .projects
            .fetch(&request.uri, request.version.as_deref())?;
        let project = load_project(&work_dir)?;
        let entry_point = project.get_entry_point(&request.entry_point)?;
        entry_point.validate_parameters(&request.params)?;
        Ok(LoadedProject {
            work_dir,
            project,
            entry_point,
        })
    }

    /// Load and validate the project and render the entry-point command
    /// without downloading `path` parameters.
    pub fn plan(&self, request: &RunRequest, config: &BackendConfig) -> Result<RunPlan> {
        let loaded = self.load(request)?;
        let command = loaded.entry_point.compute_command(
            &request.params,
            None,
            self.services.artifacts.as_ref(),
        )?;
        let environment = match loaded.project.environment.kind() {
            Some(EnvironmentKind::Conda) if !config.use_conda => None,
            kind => kind,
        };
        Ok(RunPlan {
            work_dir: loaded.work_dir,
            entry_point: loaded.entry_point.name,
            environment,
            command,
        })
    }

    /// Launch a run and return its handle.
    ///
    /// With `config.synchronous` the entry point runs as a child of this
    /// process. Otherwise a detached copy of this program attaches to the
    /// same tracking record and performs the synchronous flow.
    pub async fn run(&self, request: &RunRequest, config: &BackendConfig) -> Result<LocalRunHandle> {
        let loaded = self.load(request)?;
        let run = self.get_or_create_run(request, &loaded, config)?;
        info!(
            run_id = %run.run_id,
            experiment_id = %run.experiment_id,
            entry_point = %loaded.entry_point.name,
            "starting run"
        );

        let ctx = RunContext {
            work_dir: loaded.work_dir.clone(),
            run: run.clone(),
            tracking_uri: self.settings.tracking_uri.clone(),
        };

        let mut env = environment::select(&loaded.project, config, ctx.clone(), &self.services);
        if let Some(env) = &env {
            self.services
                .tracking
                .set_tag(&run.run_id, PROJECT_ENV_TAG, env.kind().as_str())?;
        }

        let env = env
            .as_deref_mut()
            .map(|e| -> &mut dyn ExecutionEnvironment { e });
        if config.synchronous {
            self.run_synchronously(request, config, &loaded, &ctx, env)
                .await
        } else {
            self.run_detached(request, config, &loaded, &ctx, env).await
        }
    }

    async fn run_synchronously(
        &self,
        request: &RunRequest,
        config: &BackendConfig,
        loaded: &LoadedProject,
        ctx: &RunContext,
        env: Option<&mut dyn ExecutionEnvironment>,
    ) -> Result<LocalRunHandle> {
        let (mut parts, separator, env_vars) = match env {
            Some(env) => {
                let fragments = environment::run_lifecycle(env).await?;
                (fragments, env.command_separator(), env.run_env_vars())
            }
            None => (Vec::new(), " ", ctx.base_env_vars()),
        };

        let storage = run_storage_dir(config.storage_dir.as_deref())?;
        debug!(storage = %storage.display(), "run storage directory");

        // Remote `path` parameters are downloaded with blocking I/O.
        let entry_point = loaded.entry_point.clone();
        let params = request.params.clone();
        let artifacts = Arc::clone(&self.services.artifacts);
        let entry_command = tokio::task::spawn_blocking(move || {
            entry_point.compute_command(&params, Some(&storage), artifacts.as_ref())
        })
        .await
        .map_err(|e| ProjrunError::Execution(format!("resolving parameters: {e}")))??;
        parts.push(entry_command);
        let command = parts.join(separator);

        let group = if config.new_process_group {
            ProcessGroup::New
        } else {
            ProcessGroup::Inherit
        };
        spawn_shell(&command, &ctx.run.run_id, &loaded.work_dir, &env_vars, group)
    }

    /// The child redoes preparation, so only the validation steps run here.
    async fn run_detached(
        &self,
        request: &RunRequest,
        config: &BackendConfig,
        loaded: &LoadedProject,
        ctx: &RunContext,
        env: Option<&mut dyn ExecutionEnvironment>,
    ) -> Result<LocalRunHandle> {
        let (env_args, env_vars) = match env {
            Some(env) => {
                env.validate_installation().await?;
                env.validate_environment().await?;
                (env.relaunch_args(), env.run_env_vars())
            }
            None => (Vec::new(), ctx.base_env_vars()),
        };

        let program = match &config.relaunch_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(|e| {
                ProjrunError::Execution(format!("locating current executable for relaunch: {e}"))
            })?,
        };

        let launch = DetachedLaunch {
            program,
            work_dir: loaded.work_dir.clone(),
            entry_point: request.entry_point.clone(),
            run_id: ctx.run.run_id.clone(),
            experiment_id: ctx.run.experiment_id.clone(),
            tracking_uri: self.settings.tracking_uri.clone(),
            storage_dir: config.storage_dir.clone(),
            use_conda: config.use_conda,
            params: request.params.clone(),
            env_args,
        };
        launch.spawn(&env_vars)
    }

    fn get_or_create_run(
        &self,
        request: &RunRequest,
        loaded: &LoadedProject,
        config: &BackendConfig,
    ) -> Result<RunInfo> {
        let tracking = &self.services.tracking;

        if let Some(run_id) = &config.run_id {
            debug!(run_id = %run_id, "attaching to existing run");
            return tracking.get_run(run_id);
        }

        let mut tags = BTreeMap::from([
            (SOURCE_URI_TAG.to_string(), request.uri.clone()),
            (
                SOURCE_ENTRY_POINT_TAG.to_string(),
                loaded.entry_point.name.clone(),
            ),
        ]);
        if let Some(commit) = self.services.git.commit_hash(&loaded.work_dir) {
            tags.insert(SOURCE_GIT_COMMIT_TAG.to_string(), commit);
        }

        let run = tracking.create_run(&self.settings.experiment_id, &tags)?;
        for (key, value) in effective_params(&loaded.entry_point, &request.params) {
            tracking.log_param(&run.run_id, &key, &value)?;
        }
        Ok(run)
    }
}

/// Declared parameters (user value or default) followed by extras.
fn effective_params(entry_point: &EntryPoint, user: &UserParams) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    for (name, param) in &entry_point.parameters {
        if let Some(value) = user.get(name).or(param.default.as_ref()) {
            out.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in user {
        out.entry(name.clone()).or_insert_with(|| value.clone());
    }
    out
}

/// Fresh per-run scratch directory under `parent` (or the system temp
/// dir). It outlives this process so the run can use what was downloaded.
fn run_storage_dir(parent: Option<&Path>) -> Result<PathBuf> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("projrun-run-");
    let dir = match parent {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)?
        }
        None => builder.tempdir()?,
    };
    Ok(dir.keep())
}

/// Wait for a run and record its terminal status.
pub async fn wait_and_record(handle: &mut dyn RunHandle, services: &Services) -> Result<RunStatus> {
    let succeeded = handle.wait().await?;
    let status = if succeeded {
        RunStatus::Finished
    } else {
        RunStatus::Failed
    };
    record_terminal(handle.run_id(), status, services);
    Ok(status)
}

/// Cancel a run and record its terminal status.
pub async fn cancel_and_record(handle: &mut dyn RunHandle, services: &Services) -> Result<RunStatus> {
    handle.cancel().await?;
    // A run that exited before the cancel keeps its own outcome.
    let status = match handle.status()? {
        RunStatus::Running => RunStatus::Killed,
        other => other,
    };
    record_terminal(handle.run_id(), status, services);
    Ok(status)
}

fn record_terminal(run_id: &str, status: RunStatus, services: &Services) {
    if let Err(e) = services.tracking.set_terminated(run_id, status) {
        warn!(run_id, status = %status, error = %e, "could not record run status");
    } else {
        info!(run_id, status = %status, "run terminated");
    }
}
