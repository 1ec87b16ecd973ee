// src/external/mod.rs

//! Collaborators the runner talks to through narrow interfaces.
//!
//! Each trait has a default local implementation:
//! - [`ProjectFetcher`] -> [`fetch::LocalProjectFetcher`]
//! - [`ArtifactFetcher`] -> [`artifacts::HttpArtifactFetcher`]
//! - [`TrackingStore`] -> [`tracking::FileTrackingStore`]
//! - [`GitMetadata`] -> [`git::GitCli`]
//! - [`CondaEnvManager`] -> [`conda::CondaCli`]
//!
//! Tests swap in the fakes from `projrun-test-utils`.

pub mod artifacts;
pub mod conda;
pub mod fetch;
pub mod git;
pub mod tracking;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RunSettings;
use crate::errors::Result;
use crate::types::RunStatus;

/// Materialise a project URI (optionally at a version) as a local path.
pub trait ProjectFetcher: Send + Sync {
    fn fetch(&self, uri: &str, version: Option<&str>) -> Result<PathBuf>;
}

/// Download an artifact URI into `dest_dir`, returning the local path.
pub trait ArtifactFetcher: Send + Sync {
    fn download(&self, uri: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Tracking-server bookkeeping for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    pub artifact_uri: String,
    pub status: RunStatus,
}

pub trait TrackingStore: Send + Sync {
    /// Create a new run record in `experiment_id` with initial `tags`.
    fn create_run(&self, experiment_id: &str, tags: &BTreeMap<String, String>)
        -> Result<RunInfo>;
    fn get_run(&self, run_id: &str) -> Result<RunInfo>;
    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()>;
    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()>;
    fn set_terminated(&self, run_id: &str, status: RunStatus) -> Result<()>;
}

/// Source-control metadata for a working directory.
pub trait GitMetadata: Send + Sync {
    fn commit_hash(&self, work_dir: &Path) -> Option<String>;
}

/// Conda environment management.
pub trait CondaEnvManager: Send + Sync {
    /// Return the name of an environment built from `env_file`, creating it
    /// when it does not exist yet.
    fn resolve_or_create(&self, env_file: &Path) -> Result<String>;

    /// Shell snippet(s) that activate `env_name` in the current shell.
    fn activate_command(&self, env_name: &str) -> Vec<String>;
}

/// The full set of collaborators a runner uses.
#[derive(Clone)]
pub struct Services {
    pub projects: Arc<dyn ProjectFetcher>,
    pub artifacts: Arc<dyn ArtifactFetcher>,
    pub tracking: Arc<dyn TrackingStore>,
    pub git: Arc<dyn GitMetadata>,
    pub conda: Arc<dyn CondaEnvManager>,
}

impl Services {
    /// Default local collaborators; the tracking store lives at the
    /// (local) tracking URI in `settings`.
    pub fn local(settings: &RunSettings) -> Result<Self> {
        Ok(Self {
            projects: Arc::new(fetch::LocalProjectFetcher),
            artifacts: Arc::new(artifacts::HttpArtifactFetcher),
            tracking: Arc::new(tracking::FileTrackingStore::from_uri(&settings.tracking_uri)?),
            git: Arc::new(git::GitCli),
            conda: Arc::new(conda::CondaCli::from_env()),
        })
    }
}
