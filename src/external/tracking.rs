// src/external/tracking.rs

//! A tracking store that keeps one JSON document per run on local disk.
//!
//! Layout:
//!
//! ```text
//! <root>/<experiment_id>/<run_id>/meta.json
//! <root>/<experiment_id>/<run_id>/artifacts/
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RunInfo, TrackingStore};
use crate::errors::{ProjrunError, Result};
use crate::project::parameter::local_path_or_none;
use crate::types::RunStatus;

const META_FILE_NAME: &str = "meta.json";

/// On-disk form of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment_id: String,
    pub artifact_uri: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl RunRecord {
    fn info(&self) -> RunInfo {
        RunInfo {
            run_id: self.run_id.clone(),
            experiment_id: self.experiment_id.clone(),
            artifact_uri: self.artifact_uri.clone(),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileTrackingStore {
    root: PathBuf,
}

impl FileTrackingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the store for a local tracking URI (plain path or `file://`).
    pub fn from_uri(uri: &str) -> Result<Self> {
        let root = local_path_or_none(uri).ok_or_else(|| {
            ProjrunError::Config(format!(
                "tracking URI '{uri}' is not a local path; only file-based tracking is supported"
            ))
        })?;
        Ok(Self::new(std::path::absolute(root)?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the full record of a run.
    pub fn read_record(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.find_run_dir(run_id)?.join(META_FILE_NAME);
        let contents = fs::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|e| {
            ProjrunError::Execution(format!("corrupt run record {}: {e}", path.display()))
        })
    }

    fn run_dir(&self, experiment_id: &str, run_id: &str) -> PathBuf {
        self.root.join(experiment_id).join(run_id)
    }

    fn find_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if self.root.is_dir() {
            for entry in fs::read_dir(&self.root)? {
                let candidate = entry?.path().join(run_id);
                if candidate.join(META_FILE_NAME).is_file() {
                    return Ok(candidate);
                }
            }
        }
        Err(ProjrunError::Execution(format!(
            "run '{run_id}' not found in tracking store {}",
            self.root.display()
        )))
    }

    fn write_record(&self, record: &RunRecord) -> Result<()> {
        let dir = self.run_dir(&record.experiment_id, &record.run_id);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| ProjrunError::Execution(format!("serializing run record: {e}")))?;

        // Write-then-rename so readers never see a half-written file.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(dir.join(META_FILE_NAME))
            .map_err(|e| ProjrunError::Io(e.error))?;
        Ok(())
    }

    fn update(&self, run_id: &str, apply: impl FnOnce(&mut RunRecord)) -> Result<()> {
        let mut record = self.read_record(run_id)?;
        apply(&mut record);
        self.write_record(&record)
    }
}

impl TrackingStore for FileTrackingStore {
    fn create_run(
        &self,
        experiment_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<RunInfo> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.run_dir(experiment_id, &run_id);
        let artifacts = dir.join("artifacts");
        fs::create_dir_all(&artifacts)?;

        let record = RunRecord {
            run_id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            artifact_uri: format!("file://{}", artifacts.display()),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            tags: tags.clone(),
            params: BTreeMap::new(),
        };
        self.write_record(&record)?;

        debug!(run_id = %run_id, experiment_id, "created run record");
        Ok(record.info())
    }

    fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        Ok(self.read_record(run_id)?.info())
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.update(run_id, |r| {
            r.tags.insert(key.to_string(), value.to_string());
        })
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.update(run_id, |r| {
            r.params.insert(key.to_string(), value.to_string());
        })
    }

    fn set_terminated(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.update(run_id, |r| {
            r.status = status;
            r.end_time = Some(Utc::now());
        })
    }
}
