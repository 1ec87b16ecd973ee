// src/environment/singularity.rs

//! Singularity/Apptainer backend: runs the entry point with `exec` against
//! a `.sif` image pulled or built from the declared base image.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tracing::info;

use super::build_context::check_generated_name;
use super::container::{
    CONTAINER_TRACKING_DIR, CONTAINER_WORKDIR, HostEnv, merge_env, resolve_volume, tracking_mount,
};
use super::{BoxFuture, ExecutionEnvironment, RunContext, TRACKING_URI_ENV_VAR, tool_responds};
use crate::config::{ContainerArgs, container_args_to_cli, container_args_to_relaunch};
use crate::errors::{ProjrunError, Result};
use crate::external::TrackingStore;
use crate::project::ContainerEnv;
use crate::types::EnvironmentKind;

pub const GENERATED_RECIPE_NAME: &str = "Singularity.projrun-autogenerated";
pub const SINGULARITY_IMAGE_URI_TAG: &str = "projrun.singularity.image.uri";

/// Executables tried in order.
const PROGRAMS: [&str; 2] = ["singularity", "apptainer"];
const SINGULARITY_INSTALL_HINT: &str =
    "https://apptainer.org/docs/admin/main/installation.html";

const REMOTE_PREFIXES: [&str; 3] = ["library://", "shub://", "docker://"];

/// Where the base image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseImage {
    /// `library://`, `shub://` or `docker://` reference, pulled as-is.
    Remote(String),
    /// Image file inside the project working directory.
    Local(PathBuf),
}

impl BaseImage {
    pub fn parse(image: &str, work_dir: &Path) -> Self {
        if REMOTE_PREFIXES.iter().any(|p| image.starts_with(p)) {
            BaseImage::Remote(image.to_string())
        } else {
            BaseImage::Local(work_dir.join(image))
        }
    }
}

/// Recipe that bootstraps from a local image file.
pub fn generated_recipe(base: &Path) -> String {
    format!(
        "Bootstrap: localimage\nFrom: {}\n\n%post\n    mkdir -p {CONTAINER_WORKDIR}\n",
        base.display()
    )
}

pub struct SingularityEnvironment {
    ctx: RunContext,
    project_name: Option<String>,
    env: ContainerEnv,
    args: ContainerArgs,
    tracking: Arc<dyn TrackingStore>,
    host: HostEnv,
    program: String,
    image: Option<PathBuf>,
}

impl SingularityEnvironment {
    pub fn new(
        ctx: RunContext,
        project_name: Option<String>,
        env: ContainerEnv,
        args: ContainerArgs,
        tracking: Arc<dyn TrackingStore>,
    ) -> Self {
        Self {
            ctx,
            project_name,
            env,
            args,
            tracking,
            host: HostEnv::system(),
            program: PROGRAMS[0].to_string(),
            image: None,
        }
    }

    pub fn with_host_env(mut self, host: HostEnv) -> Self {
        self.host = host;
        self
    }

    /// Use an existing image file instead of pulling or building one.
    pub fn with_image(mut self, image: impl Into<PathBuf>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// `<work dir>/<build_dir or .>/<project name>.sif`.
    pub fn final_image_path(&self) -> PathBuf {
        let name = self.project_name.as_deref().unwrap_or("singularity-project");
        let build_dir = self.env.build_dir.as_deref().unwrap_or(".");
        super::container::normalize(
            &self.ctx.work_dir.join(build_dir).join(format!("{name}.sif")),
        )
    }

    /// The `exec` invocation as an explicit argument vector.
    pub fn argv(&self) -> Result<Vec<String>> {
        let image = self.image.as_ref().ok_or_else(|| {
            ProjrunError::Execution("singularity image requested before it was prepared".to_string())
        })?;

        let mut argv = vec![self.program.clone(), "exec".to_string()];
        argv.extend(container_args_to_cli(&self.args));

        for volume in &self.env.volumes {
            argv.push("--bind".to_string());
            argv.push(resolve_volume(volume, &self.ctx.work_dir, &self.host));
        }
        argv.push("--bind".to_string());
        argv.push(format!("{}:{CONTAINER_WORKDIR}", self.ctx.work_dir.display()));

        let mut tracking_env = BTreeMap::new();
        if let Some((host_dir, container_uri)) = tracking_mount(&self.ctx.tracking_uri)? {
            argv.push("--bind".to_string());
            argv.push(format!("{}:{CONTAINER_TRACKING_DIR}", host_dir.display()));
            tracking_env.insert(TRACKING_URI_ENV_VAR.to_string(), container_uri);
        }

        let env = merge_env(
            &[&self.ctx.base_env_vars(), &tracking_env],
            &self.env.environment,
            &self.host,
        )?;
        for (key, value) in &env {
            argv.push("--env".to_string());
            argv.push(format!("{key}={value}"));
        }

        argv.push("--pwd".to_string());
        argv.push(CONTAINER_WORKDIR.to_string());
        argv.push(image.display().to_string());
        Ok(argv)
    }

    async fn run_tool(&self, args: &[&str], cwd: Option<&Path>) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().await.map_err(|e| {
            ProjrunError::ImageBuild(format!("starting {} {}: {e}", self.program, args[0]))
        })?;
        if !output.status.success() {
            return Err(ProjrunError::ImageBuild(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn build_from_local(&self, base: &Path, final_image: &Path) -> Result<()> {
        check_generated_name(&self.ctx.work_dir, GENERATED_RECIPE_NAME)?;

        let scratch = tempfile::Builder::new()
            .prefix("projrun-recipe-")
            .tempdir()
            .map_err(|e| ProjrunError::BuildContext(format!("creating recipe directory: {e}")))?;
        let recipe = scratch.path().join(GENERATED_RECIPE_NAME);
        tokio::fs::write(&recipe, generated_recipe(base))
            .await
            .map_err(|e| ProjrunError::BuildContext(format!("writing recipe: {e}")))?;

        let final_str = final_image.to_string_lossy();
        let recipe_str = recipe.to_string_lossy();
        let built = self
            .run_tool(&["build", &*final_str, &*recipe_str], Some(&self.ctx.work_dir))
            .await;

        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "could not remove temporary recipe directory");
        }
        built
    }
}

impl ExecutionEnvironment for SingularityEnvironment {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Singularity
    }

    fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn validate_installation(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for program in PROGRAMS {
                if tool_responds(program, &["--version"]).await {
                    self.program = program.to_string();
                    return Ok(());
                }
            }
            Err(ProjrunError::ToolingNotFound(format!(
                "could not find a Singularity or Apptainer executable; install one as per the \
                 instructions at {SINGULARITY_INSTALL_HINT}"
            )))
        })
    }

    fn validate_environment(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async {
            if self.project_name.as_deref().is_none_or(|n| n.trim().is_empty()) {
                return Err(ProjrunError::InvalidProjectSpec(
                    "project name must be specified when using singularity, it names the image \
                     file"
                        .to_string(),
                ));
            }
            if self.env.image.trim().is_empty() {
                return Err(ProjrunError::InvalidProjectSpec(
                    "project with singularity environment must specify the image to use via an \
                     'image' field under the 'singularity_env' field"
                        .to_string(),
                ));
            }
            Ok(())
        })
    }

    fn prepare_environment(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let base = BaseImage::parse(&self.env.image, &self.ctx.work_dir);
            if let BaseImage::Local(path) = &base
                && !path.exists()
            {
                return Err(ProjrunError::ImageBuild(format!(
                    "base image in project working directory not found: {}",
                    self.env.image
                )));
            }

            let final_image = self.final_image_path();
            if final_image.exists() {
                info!(image = %final_image.display(), "final image already exists, reusing");
            } else {
                if let Some(dir) = final_image.parent() {
                    tokio::fs::create_dir_all(dir).await?;
                }
                match &base {
                    BaseImage::Remote(reference) => {
                        info!(base = %reference, image = %final_image.display(), "pulling image");
                        let final_str = final_image.to_string_lossy();
                        self.run_tool(&["pull", &*final_str, reference.as_str()], None).await?;
                    }
                    BaseImage::Local(path) => {
                        info!(base = %path.display(), image = %final_image.display(), "building image");
                        self.build_from_local(path, &final_image).await?;
                    }
                }
            }

            self.tracking.set_tag(
                &self.ctx.run.run_id,
                SINGULARITY_IMAGE_URI_TAG,
                &final_image.display().to_string(),
            )?;
            self.image = Some(final_image);
            Ok(())
        })
    }

    fn command(&self) -> Result<Vec<String>> {
        Ok(vec![shell_words::join(self.argv()?)])
    }

    fn relaunch_args(&self) -> Vec<String> {
        container_args_to_relaunch(&self.args)
            .into_iter()
            .flat_map(|arg| ["--singularity-args".to_string(), arg])
            .collect()
    }
}
