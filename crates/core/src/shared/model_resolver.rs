use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::shared::constants::APP_DIR_NAME;

/// A model file known by name, with an optional download location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelArtifact {
    pub file_name: &'static str,
    pub url: Option<&'static str>,
}

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("model {name} not found (searched: {})", display_paths(.searched))]
    NotFound { name: String, searched: Vec<PathBuf> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Resolve a model file, checking local locations before downloading.
///
/// Resolution order:
/// 1. Explicit models directory (when configured)
/// 2. User cache directory (platform-specific)
/// 3. Download from the artifact's URL into the cache
pub fn resolve(
    artifact: &ModelArtifact,
    models_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let cache_dir = model_cache_dir()?;
    resolve_in(artifact, models_dir, &cache_dir, progress)
}

fn resolve_in(
    artifact: &ModelArtifact,
    models_dir: Option<&Path>,
    cache_dir: &Path,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let mut searched = Vec::new();

    if let Some(dir) = models_dir {
        let local = dir.join(artifact.file_name);
        if local.exists() {
            return Ok(local);
        }
        searched.push(local);
    }

    let cached_path = cache_dir.join(artifact.file_name);
    if cached_path.exists() {
        return Ok(cached_path);
    }
    searched.push(cached_path.clone());

    let Some(url) = artifact.url else {
        return Err(ModelResolveError::NotFound {
            name: artifact.file_name.to_string(),
            searched,
        });
    };

    log::info!("Downloading {} from {url}", artifact.file_name);
    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    download(url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/MoodLens/models/`
/// - Linux: `$XDG_CACHE_HOME/MoodLens/models/` or `~/.cache/MoodLens/models/`
/// - Windows: `%LOCALAPPDATA%/MoodLens/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR_NAME).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

/// Progress callback that logs each quarter of a download for `name`.
pub fn logged_progress(name: &'static str) -> ProgressFn {
    let last_quarter = AtomicU64::new(0);
    Box::new(move |downloaded, total| {
        if total == 0 {
            return;
        }
        let quarter = downloaded * 4 / total;
        if quarter > last_quarter.swap(quarter, Ordering::Relaxed) {
            log::info!("Downloading {name}: {}%", quarter * 25);
        }
    })
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let download_err = |e| ModelResolveError::Download {
        url: url.to_string(),
        source: e,
    };
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(download_err)?;

    let total = response.content_length().unwrap_or(0);
    let bytes = response.bytes().map_err(download_err)?;

    // Written next to the destination and renamed once complete
    let temp_path = dest.with_extension("part");
    let write_err = |path: &Path, e| ModelResolveError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = fs::File::create(&temp_path).map_err(|e| write_err(&temp_path, e))?;

    let mut downloaded: u64 = 0;
    for chunk in bytes.chunks(1024 * 1024) {
        file.write_all(chunk).map_err(|e| write_err(&temp_path, e))?;
        downloaded += chunk.len() as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }
    file.flush().map_err(|e| write_err(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, dest).map_err(|e| write_err(dest, e))
}
