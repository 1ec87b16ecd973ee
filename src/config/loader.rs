// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::BackendConfig;
use crate::errors::{ProjrunError, Result};
use crate::project::parameter::local_path_or_none;

/// Environment variable naming the default tracking URI.
pub const TRACKING_URI_ENV_VAR: &str = "PROJRUN_TRACKING_URI";

/// Tracking directory used when nothing else is configured.
pub const DEFAULT_TRACKING_DIR: &str = "mlruns";

/// Load a backend configuration file (TOML).
///
/// Every key is optional; missing keys take their defaults.
pub fn load_backend_config(path: impl AsRef<Path>) -> Result<BackendConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        ProjrunError::Config(format!(
            "reading backend config {}: {e}",
            path.display()
        ))
    })?;
    let config: BackendConfig = toml::from_str(&contents)?;
    validate_backend_config(&config)?;
    Ok(config)
}

fn validate_backend_config(config: &BackendConfig) -> Result<()> {
    for (section, args) in [
        ("docker_args", &config.docker_args),
        ("singularity_args", &config.singularity_args),
    ] {
        if let Some(name) = args.keys().find(|k| k.trim().is_empty()) {
            return Err(ProjrunError::Config(format!(
                "[{section}] contains an empty option name ({name:?})"
            )));
        }
    }
    if config.run_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return Err(ProjrunError::Config("run_id must not be empty".to_string()));
    }
    Ok(())
}

/// Pick the tracking URI: explicit value, then `PROJRUN_TRACKING_URI`, then
/// `./mlruns`. Relative local paths are made absolute so that child
/// processes and containers agree on the location.
pub fn resolve_tracking_uri(explicit: Option<&str>) -> Result<String> {
    let raw = explicit
        .map(str::to_string)
        .or_else(|| std::env::var(TRACKING_URI_ENV_VAR).ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TRACKING_DIR.to_string());

    match local_path_or_none(&raw) {
        Some(path) if path.is_relative() => {
            let abs: PathBuf = std::path::absolute(&path)?;
            Ok(abs.to_string_lossy().into_owned())
        }
        _ => Ok(raw),
    }
}
