//! Startup: make sure the reference index artifact exists, then load it.

use std::path::Path;

use crate::brain::ReferenceIndex;
use crate::config::IndexConfig;
use crate::error::{Result, SightError};

/// Loads the configured index, fetching it first when it is missing and a
/// remote URL is configured. Any failure here is fatal for the caller.
pub fn load_index(config: &IndexConfig) -> Result<ReferenceIndex> {
    ensure_artifact(&config.path, config.remote_url.as_deref())?;
    ReferenceIndex::load(&config.path)
}

pub fn ensure_artifact(path: &Path, remote_url: Option<&str>) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    match remote_url {
        Some(url) => fetch_artifact(url, path),
        None => Err(SightError::MissingArtifact(path.to_path_buf())),
    }
}

#[cfg(feature = "remote")]
fn fetch_artifact(url: &str, path: &Path) -> Result<()> {
    use std::io::Write;

    let fetch_err = |reason: String| SightError::Fetch {
        url: url.to_string(),
        reason,
    };
    tracing::info!(url, path = %path.display(), "reference index missing, downloading");

    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| fetch_err(e.to_string()))?;
    let bytes = response.bytes().map_err(|e| fetch_err(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SightError::io(parent, e))?;
    }
    // download beside the target, then rename, so a partial file is never
    // mistaken for a valid artifact
    let tmp = path.with_extension("part");
    let mut file = std::fs::File::create(&tmp).map_err(|e| SightError::io(&tmp, e))?;
    file.write_all(&bytes).map_err(|e| SightError::io(&tmp, e))?;
    file.sync_all().map_err(|e| SightError::io(&tmp, e))?;
    drop(file);
    std::fs::rename(&tmp, path).map_err(|e| SightError::io(path, e))?;

    tracing::info!(bytes = bytes.len(), "reference index downloaded");
    Ok(())
}

#[cfg(not(feature = "remote"))]
fn fetch_artifact(url: &str, path: &Path) -> Result<()> {
    tracing::warn!(url, "remote bootstrap requested but built without the `remote` feature");
    Err(SightError::MissingArtifact(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_without_url_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig {
            path: dir.path().join("brain.bin"),
            remote_url: None,
        };
        assert!(matches!(load_index(&config), Err(SightError::MissingArtifact(_))));
    }

    #[test]
    fn existing_artifact_needs_no_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain.bin");
        std::fs::write(&path, b"x").unwrap();
        assert!(ensure_artifact(&path, Some("http://127.0.0.1:9/brain.bin")).is_ok());
    }
}
