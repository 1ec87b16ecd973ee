// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Every validation failure aborts a run before any process is spawned, so
//! each variant carries a message that names the offending field or the
//! missing tool.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjrunError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project configuration (MLproject file) was invalid: {0}")]
    InvalidProjectSpec(String),

    #[error("{0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported entry point: {0}")]
    UnsupportedEntryPoint(String),

    #[error("Failed to render entry point command: {0}")]
    TemplateRender(String),

    #[error("Tooling not found: {0}")]
    ToolingNotFound(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Image build failed: {0}")]
    ImageBuild(String),

    #[error("Build context error: {0}")]
    BuildContext(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Backend configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ProjrunError>;
