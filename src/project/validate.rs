// src/project/validate.rs

//! Turn a [`RawProjectFile`] into a validated [`Project`].

use std::path::Path;

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::errors::{ProjrunError, Result};
use crate::fs::FileSystem;
use crate::project::entry_point::EntryPoint;
use crate::project::model::{
    ContainerEnv, EnvEntry, Project, ProjectEnvironment, RawEntryPoint, RawParameter,
    RawProjectFile,
};
use crate::project::parameter::{Parameter, ParameterType};

/// Default dependency file picked up next to the descriptor.
pub const DEFAULT_CONDA_FILE_NAME: &str = "conda.yaml";

fn invalid(msg: impl Into<String>) -> ProjrunError {
    ProjrunError::InvalidProjectSpec(msg.into())
}

/// Validate `raw` (read from a descriptor in `directory`) into a [`Project`].
pub fn validate_project(
    raw: RawProjectFile,
    directory: &Path,
    fs: &dyn FileSystem,
) -> Result<Project> {
    let docker = parse_container_env("Docker", raw.docker_env.as_ref())?;
    let singularity = parse_container_env("Singularity", raw.singularity_env.as_ref())?;
    let conda = raw.conda_env.as_deref().filter(|s| !s.trim().is_empty());

    let configured = [conda.is_some(), docker.is_some(), singularity.is_some()]
        .iter()
        .filter(|set| **set)
        .count();
    if configured > 1 {
        return Err(invalid(
            "project can only contain a single container or conda environment",
        ));
    }

    let entry_points = raw
        .entry_points
        .into_iter()
        .map(|(name, ep)| parse_entry_point(&name, ep).map(|ep| (name, ep)))
        .collect::<Result<IndexMap<_, _>>>()?;

    let environment = if let Some(env) = docker {
        ProjectEnvironment::Docker(env)
    } else if let Some(env) = singularity {
        ProjectEnvironment::Singularity(env)
    } else if let Some(conda_path) = conda {
        let path = directory.join(conda_path);
        if !fs.exists(&path) {
            return Err(invalid(format!(
                "project specified conda environment file {}, but no such file was found",
                path.display()
            )));
        }
        ProjectEnvironment::Conda(path)
    } else {
        let default_path = directory.join(DEFAULT_CONDA_FILE_NAME);
        if fs.is_file(&default_path) {
            ProjectEnvironment::Conda(default_path)
        } else {
            ProjectEnvironment::System
        }
    };

    Ok(Project::new(raw.name, entry_points, environment))
}

fn parse_entry_point(name: &str, raw: RawEntryPoint) -> Result<EntryPoint> {
    let command = raw
        .command
        .ok_or_else(|| invalid(format!("entry point '{name}' does not declare a command")))?;

    let mut parameters = IndexMap::new();
    for (param_name, raw_param) in raw.parameters {
        let param = parse_parameter(name, &param_name, raw_param)?;
        parameters.insert(param_name, param);
    }

    Ok(EntryPoint::new(name, parameters, command))
}

fn parse_parameter(entry_point: &str, name: &str, raw: RawParameter) -> Result<Parameter> {
    let (kind, default) = match raw {
        RawParameter::Type(kind) => (Some(kind), None),
        RawParameter::Spec { kind, default } => (kind, default),
    };

    let kind = match kind {
        Some(k) => k.parse::<ParameterType>().map_err(|e| {
            invalid(format!(
                "parameter '{name}' of entry point '{entry_point}': {e}"
            ))
        })?,
        None => ParameterType::String,
    };

    let default = match default {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(_) => {
            return Err(invalid(format!(
                "default of parameter '{name}' in entry point '{entry_point}' must be a scalar"
            )));
        }
    };

    Ok(Parameter::new(name, kind, default))
}

fn parse_container_env(env_type: &str, value: Option<&Value>) -> Result<Option<ContainerEnv>> {
    let section = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Mapping(m)) if m.is_empty() => return Ok(None),
        Some(Value::Mapping(m)) => m,
        Some(_) => {
            return Err(invalid(format!(
                "{env_type} environment must be a mapping with at least an 'image' field"
            )));
        }
    };

    let image = match section.get("image") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => {
            return Err(invalid(format!(
                "{env_type} environment specified but no image attribute found"
            )));
        }
    };

    let volumes = match section.get("volumes") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| volumes_error(env_type))?,
        Some(_) => return Err(volumes_error(env_type)),
    };

    let environment = match section.get("environment") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(parse_env_entry)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| environment_error(env_type))?,
        Some(_) => return Err(environment_error(env_type)),
    };

    let build_dir = match section.get("build_dir") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(invalid(format!(
                "{env_type} environment build_dir must be a string"
            )));
        }
    };

    Ok(Some(ContainerEnv {
        image,
        volumes,
        environment,
        build_dir,
    }))
}

fn parse_env_entry(value: &Value) -> Option<EnvEntry> {
    match value {
        Value::String(name) => Some(EnvEntry::CopyFromHost(name.clone())),
        Value::Sequence(pair) if pair.len() == 2 => {
            let name = pair[0].as_str()?;
            let val = pair[1].as_str()?;
            Some(EnvEntry::Set(name.to_string(), val.to_string()))
        }
        _ => None,
    }
}

fn volumes_error(env_type: &str) -> ProjrunError {
    invalid(format!(
        "{env_type} volumes must be a list of strings, e.g.: '[\"/path1/:/path1\", \"/path2/:/path2\"]'"
    ))
}

fn environment_error(env_type: &str) -> ProjrunError {
    invalid(format!(
        "{env_type} environment must be a list containing either strings (to copy environment \
         variables from the host system) or pairs of strings (to define new environment \
         variables), e.g.: '[[\"NEW_VAR\", \"new_value\"], \"VAR_TO_COPY_FROM_HOST\"]'"
    ))
}
