// src/environment/docker.rs

//! Docker backend: bakes the project into an image on top of the declared
//! base image and runs the entry point in a throwaway container.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::artifact_storage::storage_access;
use super::build_context::BuildContext;
use super::container::{
    CONTAINER_TRACKING_DIR, CONTAINER_WORKDIR, HostEnv, merge_env, resolve_volume, tracking_mount,
};
use super::{BoxFuture, ExecutionEnvironment, RunContext, TRACKING_URI_ENV_VAR, tool_responds};
use crate::config::{ContainerArgs, container_args_to_cli, container_args_to_relaunch};
use crate::errors::{ProjrunError, Result};
use crate::external::{GitMetadata, TrackingStore};
use crate::project::ContainerEnv;
use crate::types::EnvironmentKind;

pub const GENERATED_DOCKERFILE_NAME: &str = "Dockerfile.projrun-autogenerated";
pub const BUILD_CONTEXT_PREFIX: &str = "projrun-project-docker-build-context";

pub const DOCKER_IMAGE_URI_TAG: &str = "projrun.docker.image.uri";
pub const DOCKER_IMAGE_ID_TAG: &str = "projrun.docker.image.id";

const DOCKER_PROGRAM: &str = "docker";
const DOCKER_INSTALL_HINT: &str = "https://docs.docker.com/get-docker/";

/// Dockerfile that copies the build context onto `base_image`.
pub fn generated_dockerfile(base_image: &str) -> String {
    format!(
        "FROM {base_image}\n\
         COPY {BUILD_CONTEXT_PREFIX}/ {CONTAINER_WORKDIR}\n\
         WORKDIR {CONTAINER_WORKDIR}\n"
    )
}

pub struct DockerEnvironment {
    ctx: RunContext,
    project_name: Option<String>,
    env: ContainerEnv,
    args: ContainerArgs,
    tracking: Arc<dyn TrackingStore>,
    git: Arc<dyn GitMetadata>,
    host: HostEnv,
    image: Option<String>,
}

impl DockerEnvironment {
    pub fn new(
        ctx: RunContext,
        project_name: Option<String>,
        env: ContainerEnv,
        args: ContainerArgs,
        tracking: Arc<dyn TrackingStore>,
        git: Arc<dyn GitMetadata>,
    ) -> Self {
        Self {
            ctx,
            project_name,
            env,
            args,
            tracking,
            git,
            host: HostEnv::system(),
            image: None,
        }
    }

    pub fn with_host_env(mut self, host: HostEnv) -> Self {
        self.host = host;
        self
    }

    /// Use an already built image instead of building one.
    pub fn with_image(mut self, tag: impl Into<String>) -> Self {
        self.image = Some(tag.into());
        self
    }

    /// `<project name>[:<first 7 chars of the commit>]`.
    pub fn image_tag(&self) -> String {
        let repository = self.project_name.as_deref().unwrap_or("docker-project");
        match self.git.commit_hash(&self.ctx.work_dir) {
            Some(commit) => {
                let short: String = commit.chars().take(7).collect();
                format!("{repository}:{short}")
            }
            None => repository.to_string(),
        }
    }

    /// The `docker run` invocation as an explicit argument vector.
    pub fn argv(&self) -> Result<Vec<String>> {
        let image = self.image.as_deref().ok_or_else(|| {
            ProjrunError::Execution("docker image requested before it was built".to_string())
        })?;

        let mut argv = vec![
            DOCKER_PROGRAM.to_string(),
            "run".to_string(),
            "--rm".to_string(),
        ];
        argv.extend(container_args_to_cli(&self.args));

        let mut tracking_env = BTreeMap::new();
        if let Some((host_dir, container_uri)) = tracking_mount(&self.ctx.tracking_uri)? {
            argv.push("-v".to_string());
            argv.push(format!("{}:{CONTAINER_TRACKING_DIR}", host_dir.display()));
            tracking_env.insert(TRACKING_URI_ENV_VAR.to_string(), container_uri);
        }

        let storage = storage_access(&self.ctx.run.artifact_uri, &self.host)?;
        argv.extend(storage.args.iter().cloned());

        let env = merge_env(
            &[&self.ctx.base_env_vars(), &tracking_env, &storage.env],
            &self.env.environment,
            &self.host,
        )?;

        for volume in &self.env.volumes {
            argv.push("-v".to_string());
            argv.push(resolve_volume(volume, &self.ctx.work_dir, &self.host));
        }

        for (key, value) in &env {
            argv.push("-e".to_string());
            argv.push(format!("{key}={value}"));
        }

        argv.push(image.to_string());
        Ok(argv)
    }

    async fn build_image(&self, tag: &str, archive: &Path) -> Result<()> {
        let dockerfile = format!("{BUILD_CONTEXT_PREFIX}/{GENERATED_DOCKERFILE_NAME}");
        let mut child = Command::new(DOCKER_PROGRAM)
            .args(["build", "--force-rm", "-t", tag, "-f", dockerfile.as_str(), "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProjrunError::ImageBuild(format!("starting docker build: {e}")))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("docker build: {}", line);
                }
            });
        }
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut collected = Vec::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("docker build: {}", line);
                    collected.push(line);
                }
                collected
            })
        });

        if let Some(mut stdin) = child.stdin.take() {
            let mut archive_file = tokio::fs::File::open(archive).await?;
            tokio::io::copy(&mut archive_file, &mut stdin)
                .await
                .map_err(|e| ProjrunError::ImageBuild(format!("sending build context: {e}")))?;
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            let tail: Vec<&str> = stderr.iter().rev().take(20).rev().map(String::as_str).collect();
            return Err(ProjrunError::ImageBuild(format!(
                "docker build of {tag} exited with {status}:\n{}",
                tail.join("\n")
            )));
        }
        Ok(())
    }

    async fn image_id(&self, tag: &str) -> Result<String> {
        let output = Command::new(DOCKER_PROGRAM)
            .args(["image", "inspect", "--format", "{{.Id}}", tag])
            .output()
            .await?;
        if !output.status.success() {
            return Err(ProjrunError::ImageBuild(format!(
                "could not inspect image {tag}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ExecutionEnvironment for DockerEnvironment {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Docker
    }

    fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn validate_installation(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async {
            if tool_responds(DOCKER_PROGRAM, &["--help"]).await {
                Ok(())
            } else {
                Err(ProjrunError::ToolingNotFound(format!(
                    "could not find Docker executable; ensure Docker is installed as per the \
                     instructions at {DOCKER_INSTALL_HINT}"
                )))
            }
        })
    }

    fn validate_environment(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async {
            if self.project_name.as_deref().is_none_or(|n| n.trim().is_empty()) {
                return Err(ProjrunError::InvalidProjectSpec(
                    "project name must be specified when using docker, it is used to tag the image"
                        .to_string(),
                ));
            }
            if self.env.image.trim().is_empty() {
                return Err(ProjrunError::InvalidProjectSpec(
                    "project with docker environment must specify the docker image to use via \
                     an 'image' field under the 'docker_env' field"
                        .to_string(),
                ));
            }
            Ok(())
        })
    }

    fn prepare_environment(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let tag = self.image_tag();
            let work_dir = self.ctx.work_dir.clone();
            let dockerfile = generated_dockerfile(&self.env.image);

            let (context, archive) = tokio::task::spawn_blocking(move || -> Result<(BuildContext, PathBuf)> {
                let context =
                    BuildContext::stage(&work_dir, GENERATED_DOCKERFILE_NAME, &dockerfile)?;
                match context.archive(BUILD_CONTEXT_PREFIX) {
                    Ok(archive) => Ok((context, archive)),
                    Err(e) => {
                        context.close();
                        Err(e)
                    }
                }
            })
            .await
            .map_err(|e| ProjrunError::BuildContext(format!("staging task: {e}")))??;

            info!(image = %tag, base = %self.env.image, "building docker image");
            let built = self.build_image(&tag, &archive).await;
            context.close();
            built?;

            let image_id = self.image_id(&tag).await?;
            info!(image = %tag, id = %image_id, "docker image built");

            let run_id = &self.ctx.run.run_id;
            self.tracking.set_tag(run_id, DOCKER_IMAGE_URI_TAG, &tag)?;
            self.tracking.set_tag(run_id, DOCKER_IMAGE_ID_TAG, &image_id)?;

            self.image = Some(tag);
            Ok(())
        })
    }

    fn command(&self) -> Result<Vec<String>> {
        Ok(vec![shell_words::join(self.argv()?)])
    }

    fn relaunch_args(&self) -> Vec<String> {
        container_args_to_relaunch(&self.args)
            .into_iter()
            .flat_map(|arg| ["--docker-args".to_string(), arg])
            .collect()
    }
}
