// src/project/entry_point.rs

//! Entry points: a named command template plus its declared parameters.

use std::path::Path;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::errors::{ProjrunError, Result};
use crate::external::ArtifactFetcher;
use crate::project::parameter::Parameter;
use crate::project::template;

/// Undeclared parameters become `--name value`, so names stay shell-inert.
static EXTRA_PARAMETER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static regex is valid"));

/// User-supplied parameter values, in the order they were given.
pub type UserParams = IndexMap<String, String>;

/// Parameter values ready to be placed on a shell command line.
///
/// Both maps hold individually shell-escaped values and never share a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedParameters {
    /// Values for parameters declared by the entry point.
    pub declared: IndexMap<String, String>,
    /// User-supplied values with no matching declaration.
    pub extra: IndexMap<String, String>,
}

/// An entry point in a project descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    /// Declared parameters in declaration order. The order fixes each
    /// parameter's scratch subdirectory, so it must stay stable.
    pub parameters: IndexMap<String, Parameter>,
    pub command: String,
}

impl EntryPoint {
    pub fn new(
        name: impl Into<String>,
        parameters: IndexMap<String, Parameter>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            command: command.into(),
        }
    }

    /// Check that every declared parameter without a default was supplied
    /// and that undeclared parameter names are plain words.
    ///
    /// All missing names are reported together.
    pub fn validate_parameters(&self, user_params: &UserParams) -> Result<()> {
        if let Some(bad) = user_params
            .keys()
            .filter(|name| !self.parameters.contains_key(*name))
            .find(|name| !EXTRA_PARAMETER_NAME.is_match(name))
        {
            return Err(ProjrunError::InvalidParameter(format!(
                "parameter name '{bad}' may only contain letters, digits, '_', '.' and '-'"
            )));
        }

        let missing: Vec<String> = self
            .parameters
            .values()
            .filter(|p| p.default.is_none() && !user_params.contains_key(&p.name))
            .map(|p| format!("'{}'", p.name))
            .collect();

        if !missing.is_empty() {
            return Err(ProjrunError::MissingParameter(format!(
                "No value given for missing parameters: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Resolve declared and extra parameter values.
    ///
    /// Resolving can be heavy: a remote URI given for a `path` parameter is
    /// downloaded below `storage_dir`. With `storage_dir = None` path values
    /// are reported as given.
    pub fn compute_parameters(
        &self,
        user_params: &UserParams,
        storage_dir: Option<&Path>,
        fetcher: &dyn ArtifactFetcher,
    ) -> Result<ResolvedParameters> {
        self.validate_parameters(user_params)?;

        let mut resolved = ResolvedParameters::default();

        for (position, (name, param)) in self.parameters.iter().enumerate() {
            let raw = match user_params.get(name).or(param.default.as_ref()) {
                Some(v) => v,
                // validate_parameters guarantees a value or a default.
                None => continue,
            };
            let value = param.resolve(raw, storage_dir, position, fetcher)?;
            resolved.declared.insert(name.clone(), shell_escape(&value));
        }

        for (name, value) in user_params {
            if !self.parameters.contains_key(name) {
                resolved.extra.insert(name.clone(), shell_escape(value));
            }
        }

        Ok(resolved)
    }

    /// Render the final shell command for this entry point.
    ///
    /// Declared values are substituted into the template; each extra value
    /// is appended as `--name value`.
    pub fn compute_command(
        &self,
        user_params: &UserParams,
        storage_dir: Option<&Path>,
        fetcher: &dyn ArtifactFetcher,
    ) -> Result<String> {
        let params = self.compute_parameters(user_params, storage_dir, fetcher)?;
        let mut parts = vec![template::render(&self.command, &params.declared)?];
        parts.extend(
            params
                .extra
                .iter()
                .map(|(name, value)| format!("--{name} {value}")),
        );
        Ok(parts.join(" "))
    }
}

/// Quote a single value for POSIX shells.
pub fn shell_escape(value: &str) -> String {
    shell_words::quote(value).into_owned()
}
