// src/project/model.rs

//! Data model for the project descriptor.
//!
//! [`RawProjectFile`] is a direct serde mapping of the YAML file:
//!
//! ```yaml
//! name: tutorial
//! conda_env: conda.yaml
//! entry_points:
//!   main:
//!     parameters:
//!       alpha: {type: float, default: 0.5}
//!       data_file: path
//!     command: "python train.py {alpha} {data_file}"
//! ```
//!
//! The container sections are kept as untyped YAML so that validation can
//! report precisely which shape was wrong; [`Project`] is the validated form.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::project::entry_point::EntryPoint;
use crate::types::EnvironmentKind;

/// Top-level descriptor as read from YAML. Every key is optional.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawProjectFile {
    #[serde(default)]
    pub name: Option<String>,

    /// Entry points keyed by name, in declaration order.
    #[serde(default)]
    pub entry_points: IndexMap<String, RawEntryPoint>,

    /// Path to a conda environment file, relative to the project directory.
    #[serde(default)]
    pub conda_env: Option<String>,

    #[serde(default)]
    pub docker_env: Option<serde_yaml::Value>,

    #[serde(default)]
    pub singularity_env: Option<serde_yaml::Value>,
}

/// `entry_points.<name>` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEntryPoint {
    #[serde(default)]
    pub parameters: IndexMap<String, RawParameter>,

    #[serde(default)]
    pub command: Option<String>,
}

/// A parameter declaration: either a bare type (`alpha: float`) or a
/// mapping with optional `type` and `default`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawParameter {
    Type(String),
    Spec {
        #[serde(default, rename = "type")]
        kind: Option<String>,
        #[serde(default)]
        default: Option<serde_yaml::Value>,
    },
}

/// One `environment` entry of a container section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvEntry {
    /// Copy the named variable from the host environment.
    CopyFromHost(String),
    /// Set the variable to an explicit value.
    Set(String, String),
}

/// Validated `docker_env` / `singularity_env` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEnv {
    pub image: String,
    pub volumes: Vec<String>,
    pub environment: Vec<EnvEntry>,
    /// Only meaningful for singularity: where the `.sif` image lives.
    pub build_dir: Option<String>,
}

impl ContainerEnv {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            volumes: Vec::new(),
            environment: Vec::new(),
            build_dir: None,
        }
    }
}

/// The single execution environment a project asks for.
///
/// Validation rejects descriptors that configure more than one, so the
/// conflicting state is not representable past loading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProjectEnvironment {
    /// Run directly in the host environment.
    #[default]
    System,
    /// Absolute path of the conda environment file.
    Conda(PathBuf),
    Docker(ContainerEnv),
    Singularity(ContainerEnv),
}

impl ProjectEnvironment {
    /// The backend this environment needs, `None` for the host environment.
    pub fn kind(&self) -> Option<EnvironmentKind> {
        match self {
            ProjectEnvironment::System => None,
            ProjectEnvironment::Conda(_) => Some(EnvironmentKind::Conda),
            ProjectEnvironment::Docker(_) => Some(EnvironmentKind::Docker),
            ProjectEnvironment::Singularity(_) => Some(EnvironmentKind::Singularity),
        }
    }
}

/// A parsed and validated project.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: Option<String>,
    pub(crate) entry_points: IndexMap<String, EntryPoint>,
    pub environment: ProjectEnvironment,
}

impl Project {
    pub fn new(
        name: Option<String>,
        entry_points: IndexMap<String, EntryPoint>,
        environment: ProjectEnvironment,
    ) -> Self {
        Self {
            name,
            entry_points,
            environment,
        }
    }

    /// Names of the declared entry points, in declaration order.
    pub fn entry_point_names(&self) -> impl Iterator<Item = &str> {
        self.entry_points.keys().map(|s| s.as_str())
    }

    pub fn conda_env_path(&self) -> Option<&Path> {
        match &self.environment {
            ProjectEnvironment::Conda(path) => Some(path),
            _ => None,
        }
    }

    pub fn docker_env(&self) -> Option<&ContainerEnv> {
        match &self.environment {
            ProjectEnvironment::Docker(env) => Some(env),
            _ => None,
        }
    }

    pub fn singularity_env(&self) -> Option<&ContainerEnv> {
        match &self.environment {
            ProjectEnvironment::Singularity(env) => Some(env),
            _ => None,
        }
    }
}
