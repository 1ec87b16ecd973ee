// crates/test-utils/src/builders.rs

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use projrun::config::{BackendConfig, ContainerArgValue};
use tempfile::TempDir;

/// Writes a project tree into a fresh temporary directory.
pub struct ProjectDirBuilder {
    files: Vec<(PathBuf, String)>,
}

impl ProjectDirBuilder {
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Use `yaml` as the `MLproject` descriptor.
    pub fn with_descriptor(self, yaml: &str) -> Self {
        self.with_file("MLproject", yaml)
    }

    pub fn with_file(mut self, rel: &str, contents: &str) -> Self {
        self.files.push((PathBuf::from(rel), contents.to_string()));
        self
    }

    pub fn build(self) -> TempDir {
        let dir = tempfile::tempdir().expect("creating temp project dir");
        for (rel, contents) in self.files {
            let path = dir.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("creating parent dirs");
            }
            fs::write(&path, contents).expect("writing project file");
        }
        dir
    }
}

impl Default for ProjectDirBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `BackendConfig`.
pub struct BackendConfigBuilder {
    config: BackendConfig,
}

impl BackendConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BackendConfig::default(),
        }
    }

    pub fn detached(mut self) -> Self {
        self.config.synchronous = false;
        self
    }

    pub fn no_conda(mut self) -> Self {
        self.config.use_conda = false;
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = Some(dir.into());
        self
    }

    pub fn run_id(mut self, id: &str) -> Self {
        self.config.run_id = Some(id.to_string());
        self
    }

    pub fn docker_arg(mut self, name: &str, value: &str) -> Self {
        self.config
            .docker_args
            .insert(name.to_string(), ContainerArgValue::Value(value.to_string()));
        self
    }

    pub fn docker_flag(mut self, name: &str) -> Self {
        self.config
            .docker_args
            .insert(name.to_string(), ContainerArgValue::Flag(true));
        self
    }

    pub fn singularity_flag(mut self, name: &str) -> Self {
        self.config
            .singularity_args
            .insert(name.to_string(), ContainerArgValue::Flag(true));
        self
    }

    pub fn relaunch_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.relaunch_program = Some(program.into());
        self
    }

    pub fn build(self) -> BackendConfig {
        self.config
    }
}

impl Default for BackendConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
