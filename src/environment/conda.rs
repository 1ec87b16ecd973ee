// src/environment/conda.rs

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use super::{BoxFuture, ExecutionEnvironment, RunContext};
use crate::errors::{ProjrunError, Result};
use crate::external::CondaEnvManager;
use crate::types::EnvironmentKind;

/// Runs the entry point after activating a conda environment built from the
/// project's dependency file.
pub struct CondaEnvironment {
    ctx: RunContext,
    env_file: PathBuf,
    manager: Arc<dyn CondaEnvManager>,
    env_name: Option<String>,
}

impl CondaEnvironment {
    pub fn new(ctx: RunContext, env_file: PathBuf, manager: Arc<dyn CondaEnvManager>) -> Self {
        Self {
            ctx,
            env_file,
            manager,
            env_name: None,
        }
    }

    /// Environment name, once resolved.
    pub fn env_name(&self) -> Option<&str> {
        self.env_name.as_deref()
    }
}

impl ExecutionEnvironment for CondaEnvironment {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Conda
    }

    fn context(&self) -> &RunContext {
        &self.ctx
    }

    // Tool lookup happens when the environment is resolved.
    fn validate_installation(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn validate_environment(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let manager = Arc::clone(&self.manager);
            let env_file = self.env_file.clone();
            let name = tokio::task::spawn_blocking(move || manager.resolve_or_create(&env_file))
                .await
                .map_err(|e| ProjrunError::Execution(format!("conda resolution task: {e}")))??;

            info!(env = %name, file = %self.env_file.display(), "using conda environment");
            self.env_name = Some(name);
            Ok(())
        })
    }

    fn prepare_environment(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn command(&self) -> Result<Vec<String>> {
        let name = self.env_name.as_deref().ok_or_else(|| {
            ProjrunError::Execution(
                "conda environment requested before it was resolved".to_string(),
            )
        })?;
        Ok(self.manager.activate_command(name))
    }

    fn command_separator(&self) -> &'static str {
        " && "
    }
}
