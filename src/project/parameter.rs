// src/project/parameter.rs

//! Typed entry-point parameters and their value resolution.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::errors::{ProjrunError, Result};
use crate::external::ArtifactFetcher;

/// A scheme needs at least two characters so that `C:\data` stays a path.
static URI_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]+):").expect("static regex is valid")
});

/// Return the URI scheme of `value`, if it has one.
pub fn uri_scheme(value: &str) -> Option<&str> {
    URI_SCHEME
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Whether `value` looks like a URI (has a recognisable scheme).
pub fn is_uri(value: &str) -> bool {
    uri_scheme(value).is_some()
}

/// Interpret `value` as a local filesystem path, if it is one.
///
/// Plain paths and `file:` URIs are local; anything with another scheme is
/// a remote reference and yields `None`.
pub fn local_path_or_none(value: &str) -> Option<PathBuf> {
    match uri_scheme(value) {
        None => Some(PathBuf::from(value)),
        Some(scheme) if scheme.eq_ignore_ascii_case("file") => {
            let rest = &value[scheme.len() + 1..];
            let rest = rest.strip_prefix("//").unwrap_or(rest);
            Some(PathBuf::from(rest))
        }
        Some(_) => None,
    }
}

/// Declared type of a parameter; governs how its value is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterType {
    #[default]
    String,
    Float,
    Path,
    Uri,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParameterType::String => "string",
            ParameterType::Float => "float",
            ParameterType::Path => "path",
            ParameterType::Uri => "uri",
        };
        f.write_str(s)
    }
}

impl FromStr for ParameterType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" | "str" => Ok(ParameterType::String),
            "float" | "number" => Ok(ParameterType::Float),
            "path" => Ok(ParameterType::Path),
            "uri" => Ok(ParameterType::Uri),
            other => Err(format!(
                "unsupported parameter type '{other}' (expected string, float, path or uri)"
            )),
        }
    }
}

/// A parameter in an entry point. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterType,
    pub default: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParameterType, default: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
        }
    }

    /// Resolve a raw value for this parameter.
    ///
    /// `position` is the parameter's declaration index; it names the scratch
    /// subdirectory for downloaded `path` values so that two parameters never
    /// share one. With `storage_dir = None`, `path` values are reported
    /// verbatim and nothing is downloaded.
    pub fn resolve(
        &self,
        value: &str,
        storage_dir: Option<&Path>,
        position: usize,
        fetcher: &dyn ArtifactFetcher,
    ) -> Result<String> {
        match (self.kind, storage_dir) {
            (ParameterType::Path, Some(dir)) => self.resolve_path(value, dir, position, fetcher),
            (ParameterType::Uri, _) => self.resolve_uri(value),
            (ParameterType::Float, _) => self.resolve_float(value),
            _ => Ok(value.to_string()),
        }
    }

    fn resolve_uri(&self, value: &str) -> Result<String> {
        if !is_uri(value) {
            return Err(ProjrunError::InvalidParameter(format!(
                "expected URI for parameter '{}' but got '{}'",
                self.name, value
            )));
        }
        Ok(value.to_string())
    }

    fn resolve_float(&self, value: &str) -> Result<String> {
        value.trim().parse::<f64>().map_err(|_| {
            ProjrunError::InvalidParameter(format!(
                "expected a number for parameter '{}' but got '{}'",
                self.name, value
            ))
        })?;
        Ok(value.to_string())
    }

    fn resolve_path(
        &self,
        value: &str,
        storage_dir: &Path,
        position: usize,
        fetcher: &dyn ArtifactFetcher,
    ) -> Result<String> {
        if let Some(local) = local_path_or_none(value) {
            if !local.exists() {
                return Err(ProjrunError::InvalidParameter(format!(
                    "got value '{}' for parameter '{}', but no such file or directory was found",
                    value, self.name
                )));
            }
            let abs = std::path::absolute(&local)?;
            return Ok(abs.to_string_lossy().into_owned());
        }

        let download_dir = storage_dir.join(format!("param_{position}"));
        std::fs::create_dir(&download_dir).map_err(|e| {
            ProjrunError::Execution(format!(
                "creating download directory {} for parameter '{}': {e}",
                download_dir.display(),
                self.name
            ))
        })?;
        debug!(
            parameter = %self.name,
            uri = %value,
            dest = %download_dir.display(),
            "downloading path parameter"
        );
        let local = fetcher.download(value, &download_dir)?;
        Ok(local.to_string_lossy().into_owned())
    }
}
