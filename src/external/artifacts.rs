// src/external/artifacts.rs

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::ArtifactFetcher;
use crate::errors::{ProjrunError, Result};
use crate::project::parameter::uri_scheme;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// File name used when the URL path has no last segment.
const FALLBACK_FILE_NAME: &str = "artifact";

/// Downloads `http://` and `https://` artifacts.
///
/// Local paths and `file:` URIs never reach a fetcher; they are resolved in
/// place. Any other scheme is rejected. Downloads block; callers inside the
/// async runtime run them on a blocking thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpArtifactFetcher;

fn client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| ProjrunError::Execution(format!("building HTTP client: {e}")))
}

/// Last non-empty path segment of `url`.
fn file_name_for(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

impl ArtifactFetcher for HttpArtifactFetcher {
    fn download(&self, uri: &str, dest_dir: &Path) -> Result<PathBuf> {
        let scheme = uri_scheme(uri).map(str::to_ascii_lowercase);
        if !matches!(scheme.as_deref(), Some("http") | Some("https")) {
            return Err(ProjrunError::InvalidParameter(format!(
                "no artifact repository available for scheme '{}' (uri '{uri}')",
                scheme.unwrap_or_default()
            )));
        }

        let url = reqwest::Url::parse(uri)
            .map_err(|e| ProjrunError::InvalidParameter(format!("invalid URI '{uri}': {e}")))?;
        let target = dest_dir.join(file_name_for(&url));

        let mut response = client()?
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProjrunError::InvalidParameter(format!("downloading '{uri}': {e}")))?;

        let mut file = File::create(&target)?;
        let bytes = response
            .copy_to(&mut file)
            .map_err(|e| ProjrunError::InvalidParameter(format!("downloading '{uri}': {e}")))?;

        debug!(uri, bytes, target = %target.display(), "downloaded artifact");
        Ok(target)
    }
}
