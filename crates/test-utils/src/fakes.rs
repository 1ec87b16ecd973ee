// crates/test-utils/src/fakes.rs

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use projrun::errors::{ProjrunError, Result};
use projrun::external::fetch::LocalProjectFetcher;
use projrun::external::{
    ArtifactFetcher, CondaEnvManager, GitMetadata, RunInfo, Services, TrackingStore,
};
use projrun::types::RunStatus;

/// Everything the fake tracking store knows about one run.
#[derive(Debug, Clone)]
pub struct FakeRun {
    pub info: RunInfo,
    pub tags: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
}

/// In-memory tracking store.
#[derive(Debug, Default)]
pub struct FakeTrackingStore {
    runs: Mutex<BTreeMap<String, FakeRun>>,
    artifact_root: Option<PathBuf>,
}

impl FakeTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give runs a `file://` artifact URI below `root`.
    pub fn with_artifact_root(root: impl Into<PathBuf>) -> Self {
        Self {
            runs: Mutex::new(BTreeMap::new()),
            artifact_root: Some(root.into()),
        }
    }

    pub fn run(&self, run_id: &str) -> Option<FakeRun> {
        self.runs.lock().unwrap().get(run_id).cloned()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.runs.lock().unwrap().keys().cloned().collect()
    }

    pub fn tag(&self, run_id: &str, key: &str) -> Option<String> {
        self.run(run_id).and_then(|r| r.tags.get(key).cloned())
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.run(run_id).map(|r| r.info.status)
    }

    fn with_run<T>(&self, run_id: &str, f: impl FnOnce(&mut FakeRun) -> T) -> Result<T> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| ProjrunError::Execution(format!("no run {run_id}")))?;
        Ok(f(run))
    }
}

impl TrackingStore for FakeTrackingStore {
    fn create_run(&self, experiment_id: &str, tags: &BTreeMap<String, String>) -> Result<RunInfo> {
        let mut runs = self.runs.lock().unwrap();
        let run_id = format!("run-{}", runs.len() + 1);
        let artifact_uri = match &self.artifact_root {
            Some(root) => format!("file://{}", root.join(&run_id).display()),
            None => format!("s3://fake-bucket/{run_id}/artifacts"),
        };
        let info = RunInfo {
            run_id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            artifact_uri,
            status: RunStatus::Running,
        };
        runs.insert(
            run_id,
            FakeRun {
                info: info.clone(),
                tags: tags.clone(),
                params: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        self.with_run(run_id, |r| r.info.clone())
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_run(run_id, |r| {
            r.tags.insert(key.to_string(), value.to_string());
        })
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_run(run_id, |r| {
            r.params.insert(key.to_string(), value.to_string());
        })
    }

    fn set_terminated(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.with_run(run_id, |r| r.info.status = status)
    }
}

/// Records downloads and writes a marker file instead of fetching.
#[derive(Debug, Default)]
pub struct FakeArtifactFetcher {
    calls: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeArtifactFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ArtifactFetcher for FakeArtifactFetcher {
    fn download(&self, uri: &str, dest_dir: &Path) -> Result<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .push((uri.to_string(), dest_dir.to_path_buf()));
        let path = dest_dir.join("artifact");
        std::fs::write(&path, uri)?;
        Ok(path)
    }
}

/// Reports a fixed commit (or none).
#[derive(Debug, Default, Clone)]
pub struct FakeGit {
    pub commit: Option<String>,
}

impl FakeGit {
    pub fn with_commit(commit: &str) -> Self {
        Self {
            commit: Some(commit.to_string()),
        }
    }
}

impl GitMetadata for FakeGit {
    fn commit_hash(&self, _work_dir: &Path) -> Option<String> {
        self.commit.clone()
    }
}

/// Resolves every file to one environment; activation exports its name.
#[derive(Debug, Default)]
pub struct FakeCondaManager {
    resolved: Mutex<Vec<PathBuf>>,
}

impl FakeCondaManager {
    pub const ENV_NAME: &'static str = "projrun-fake-env";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved(&self) -> Vec<PathBuf> {
        self.resolved.lock().unwrap().clone()
    }
}

impl CondaEnvManager for FakeCondaManager {
    fn resolve_or_create(&self, env_file: &Path) -> Result<String> {
        self.resolved.lock().unwrap().push(env_file.to_path_buf());
        Ok(Self::ENV_NAME.to_string())
    }

    fn activate_command(&self, env_name: &str) -> Vec<String> {
        vec![format!("export FAKE_CONDA_ENV={env_name}")]
    }
}

/// Fakes plus handles to inspect them.
pub struct FakeServices {
    pub services: Services,
    pub tracking: Arc<FakeTrackingStore>,
    pub artifacts: Arc<FakeArtifactFetcher>,
    pub conda: Arc<FakeCondaManager>,
}

impl FakeServices {
    /// Local project fetching with every other collaborator faked.
    pub fn new() -> Self {
        Self::with_tracking(FakeTrackingStore::new())
    }

    pub fn with_tracking(tracking: FakeTrackingStore) -> Self {
        let tracking = Arc::new(tracking);
        let artifacts = Arc::new(FakeArtifactFetcher::new());
        let conda = Arc::new(FakeCondaManager::new());
        let services = Services {
            projects: Arc::new(LocalProjectFetcher),
            artifacts: artifacts.clone(),
            tracking: tracking.clone(),
            git: Arc::new(FakeGit::default()),
            conda: conda.clone(),
        };
        Self {
            services,
            tracking,
            artifacts,
            conda,
        }
    }
}

impl Default for FakeServices {
    fn default() -> Self {
        Self::new()
    }
}
