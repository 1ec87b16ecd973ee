// src/project/mod.rs

//! Project descriptors and entry points.
//!
//! - [`model`] maps the YAML descriptor and holds the validated [`Project`].
//! - [`loader`] finds and parses the descriptor.
//! - [`validate`] checks environment sections and builds entry points.
//! - [`entry_point`] validates and resolves parameters and renders commands.
//! - [`parameter`] resolves one typed value (string/float/path/uri).
//! - [`template`] substitutes `{name}` placeholders.

pub mod entry_point;
pub mod loader;
pub mod model;
pub mod parameter;
pub mod template;
pub mod validate;

use std::path::Path;

use indexmap::IndexMap;

use crate::errors::{ProjrunError, Result};

pub use entry_point::{EntryPoint, ResolvedParameters, UserParams, shell_escape};
pub use loader::{DESCRIPTOR_FILE_NAME, load_project, load_project_with_fs};
pub use model::{ContainerEnv, EnvEntry, Project, ProjectEnvironment};
pub use parameter::{Parameter, ParameterType};

/// Script extensions that can be run without a declared entry point.
pub const SUPPORTED_SCRIPT_EXTENSIONS: [&str; 3] = [".py", ".sh", ".R"];

impl Project {
    /// Look up `name`, or synthesize a zero-parameter entry point when it
    /// names a runnable script.
    pub fn get_entry_point(&self, name: &str) -> Result<EntryPoint> {
        if let Some(ep) = self.entry_points.get(name) {
            return Ok(ep.clone());
        }

        let quoted = shell_escape(name);
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let command = match extension {
            "py" => format!("python {quoted}"),
            "sh" => {
                let shell = std::env::var("SHELL").unwrap_or_else(|_| "bash".to_string());
                format!("{shell} {quoted}")
            }
            "R" => format!("Rscript -e \"source('{quoted}')\" --args"),
            _ => {
                let declared: Vec<&str> = self.entry_point_names().collect();
                return Err(ProjrunError::UnsupportedEntryPoint(format!(
                    "could not find '{name}' among entry points {declared:?} or interpret it \
                     as a runnable script; supported script file extensions: {:?}",
                    SUPPORTED_SCRIPT_EXTENSIONS
                )));
            }
        };

        Ok(EntryPoint::new(name, IndexMap::new(), command))
    }
}
