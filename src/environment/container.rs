// src/environment/container.rs

//! Pieces shared by the docker and singularity backends: host environment
//! lookup, volume resolution, tracking mounts and environment merging.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};

use crate::errors::{ProjrunError, Result};
use crate::project::EnvEntry;
use crate::project::parameter::local_path_or_none;

/// Project code location inside a container.
pub const CONTAINER_WORKDIR: &str = "/projrun/projects/code";

/// Where a local tracking directory is mounted inside a container.
pub const CONTAINER_TRACKING_DIR: &str = "/projrun/tmp/runs";

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex is valid")
});

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Read access to the host's environment variables.
///
/// Backends read the host environment only through this, so tests can
/// supply a fixed map instead of mutating the process environment.
#[derive(Clone)]
pub struct HostEnv(Arc<Lookup>);

impl HostEnv {
    /// The real process environment.
    pub fn system() -> Self {
        Self(Arc::new(|name| std::env::var(name).ok()))
    }

    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(Arc::new(move |name| map.get(name).cloned()))
    }

    pub fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    /// The user's home directory.
    pub fn home_dir(&self) -> Option<PathBuf> {
        self.get("HOME")
            .or_else(|| self.get("USERPROFILE"))
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
    }
}

impl Default for HostEnv {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for HostEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostEnv")
    }
}

/// Expand `$VAR` and `${VAR}` from `host`. Unset variables are left as
/// written.
pub fn expand_vars(value: &str, host: &HostEnv) -> String {
    ENV_REFERENCE
        .replace_all(value, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            host.get(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Resolve a `host:container[:options]` volume spec.
///
/// Variables in the host part are expanded and a relative host path is
/// made absolute against `work_dir`.
pub fn resolve_volume(volume: &str, work_dir: &Path, host: &HostEnv) -> String {
    let (host_part, rest) = match volume.split_once(':') {
        Some((h, r)) => (h, Some(r)),
        None => (volume, None),
    };

    let expanded = expand_vars(host_part, host);
    let host_path = Path::new(&expanded);
    let host_path = if host_path.is_relative() {
        normalize(&work_dir.join(host_path))
    } else {
        host_path.to_path_buf()
    };

    match rest {
        Some(rest) => format!("{}:{rest}", host_path.display()),
        None => host_path.display().to_string(),
    }
}

/// Lexically drop `.` components and resolve `..` against earlier ones.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// For a local tracking URI, the absolute host directory to mount and the
/// tracking URI the containerised process should use instead.
pub fn tracking_mount(tracking_uri: &str) -> Result<Option<(PathBuf, String)>> {
    match local_path_or_none(tracking_uri) {
        Some(path) => {
            let abs = std::path::absolute(path)?;
            Ok(Some((abs, format!("file://{CONTAINER_TRACKING_DIR}"))))
        }
        None => Ok(None),
    }
}

/// Merge environment layers in order (later layers win), then apply the
/// project's declared entries.
///
/// Copy-from-host entries must be set on the host; the error names every
/// variable the project expects.
pub fn merge_env(
    layers: &[&BTreeMap<String, String>],
    declared: &[EnvEntry],
    host: &HostEnv,
) -> Result<BTreeMap<String, String>> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    for entry in declared {
        match entry {
            EnvEntry::Set(name, value) => {
                merged.insert(name.clone(), value.clone());
            }
            EnvEntry::CopyFromHost(name) => {
                let value = host.get(name).ok_or_else(|| {
                    let expected: Vec<&str> = declared
                        .iter()
                        .map(|e| match e {
                            EnvEntry::Set(n, _) | EnvEntry::CopyFromHost(n) => n.as_str(),
                        })
                        .collect();
                    ProjrunError::MissingEnvironmentVariable(format!(
                        "this project expects the {} environment variables to be set on the \
                         machine running the project, but {name} was not set",
                        expected.join(", ")
                    ))
                })?;
                merged.insert(name.clone(), value);
            }
        }
    }

    Ok(merged)
}
