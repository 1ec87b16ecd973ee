// src/environment/artifact_storage.rs

//! Mounts and credentials a container needs to reach the run's artifact
//! store, chosen by the artifact URI scheme.

use std::collections::BTreeMap;
use std::path::Path;

use crate::environment::container::{CONTAINER_WORKDIR, HostEnv, normalize};
use crate::errors::Result;
use crate::project::parameter::{local_path_or_none, uri_scheme};

/// Container runtime arguments plus environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageAccess {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl StorageAccess {
    fn mount(&mut self, host: &str, container: &str) {
        self.args.push("-v".to_string());
        self.args.push(format!("{host}:{container}"));
    }

    fn forward(&mut self, host: &HostEnv, names: &[&str]) {
        for name in names {
            if let Some(value) = host.get(name) {
                self.env.insert((*name).to_string(), value);
            }
        }
    }
}

pub fn storage_access(artifact_uri: &str, host: &HostEnv) -> Result<StorageAccess> {
    let mut access = StorageAccess::default();

    if let Some(dir) = local_path_or_none(artifact_uri) {
        let container_path = if dir.is_absolute() {
            dir.clone()
        } else {
            normalize(&Path::new(CONTAINER_WORKDIR).join(&dir))
        };
        let abs = std::path::absolute(&dir)?;
        access.mount(
            &abs.display().to_string(),
            &container_path.display().to_string(),
        );
        return Ok(access);
    }

    match uri_scheme(artifact_uri).map(str::to_ascii_lowercase).as_deref() {
        Some("s3") => {
            if let Some(aws) = host.home_dir().map(|h| h.join(".aws"))
                && aws.exists()
            {
                access.mount(&aws.display().to_string(), "/.aws");
            }
            access.forward(
                host,
                &[
                    "AWS_SECRET_ACCESS_KEY",
                    "AWS_ACCESS_KEY_ID",
                    "MLFLOW_S3_ENDPOINT_URL",
                    "MLFLOW_S3_IGNORE_TLS",
                ],
            );
        }
        Some("wasbs") | Some("abfss") => {
            access.forward(
                host,
                &["AZURE_STORAGE_CONNECTION_STRING", "AZURE_STORAGE_ACCESS_KEY"],
            );
        }
        Some("gs") => {
            if let Some(credentials) = host.get("GOOGLE_APPLICATION_CREDENTIALS") {
                access.mount(&credentials, "/.gcs");
                access
                    .env
                    .insert("GOOGLE_APPLICATION_CREDENTIALS".to_string(), "/.gcs".to_string());
            }
        }
        Some("hdfs") | Some("viewfs") => {
            access.forward(
                host,
                &[
                    "MLFLOW_KERBEROS_TICKET_CACHE",
                    "MLFLOW_KERBEROS_USER",
                    "MLFLOW_PYARROW_EXTRA_CONF",
                ],
            );
            if let Some(cache) = access.env.get("MLFLOW_KERBEROS_TICKET_CACHE").cloned() {
                access.mount(&cache, &cache);
            }
        }
        _ => {}
    }

    Ok(access)
}
