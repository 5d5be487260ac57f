//! Download handlers for model files and other notebook assets
//!
//! Supports Google Drive share links, files on a mounted Drive
//! (`/content/drive/MyDrive/...`), Hugging Face and plain HTTP (both through
//! aria2c), and raw files from GitHub repositories.

pub mod aria2;
mod google_drive;
pub mod http;

pub use google_drive::{file_id_from_url, GoogleDriveDownloader};

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::util::{batch_progress, format_elapsed};

/// Model file extensions recognised by [`model_name`]
pub const SUPPORTED_EXTENSIONS: [&str; 4] = [".ckpt", ".safetensors", ".pt", ".pth"];

/// Whether `name` ends in one of [`SUPPORTED_EXTENSIONS`]
pub fn is_model_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Where a download comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    GoogleDrive { id: String },
    /// Drive folder links; not downloadable as a single file
    GoogleDriveFolder { url: String },
    /// File on a locally mounted Google Drive
    MountedDrive { path: PathBuf },
    /// Hugging Face URL, rewritten from `/blob/` to `/resolve/`
    HuggingFace { url: String },
    Http { url: String },
}

impl DownloadSource {
    /// Classify a URL or mounted path
    pub fn classify(url: &str) -> Result<Self> {
        if url.contains("drive.google.com") {
            if url.contains("/drive/folders/") {
                return Ok(DownloadSource::GoogleDriveFolder { url: url.to_string() });
            }
            let id = file_id_from_url(url)
                .with_context(|| format!("No Google Drive file id in URL: {}", url))?;
            return Ok(DownloadSource::GoogleDrive { id });
        }

        if url.contains("drive/MyDrive") {
            return Ok(DownloadSource::MountedDrive {
                path: PathBuf::from(url),
            });
        }

        if url.contains("huggingface.co") {
            return Ok(DownloadSource::HuggingFace {
                url: url.replace("/blob/", "/resolve/"),
            });
        }

        Ok(DownloadSource::Http { url: url.to_string() })
    }

    /// Get a human-readable description
    pub fn description(&self) -> String {
        match self {
            DownloadSource::GoogleDrive { id } => format!("Google Drive: {}", id),
            DownloadSource::GoogleDriveFolder { url } => format!("Google Drive folder: {}", url),
            DownloadSource::MountedDrive { path } => format!("Mounted Drive: {}", path.display()),
            DownloadSource::HuggingFace { url } => format!("Hugging Face: {}", url),
            DownloadSource::Http { url } => format!("HTTP: {}", url),
        }
    }
}

/// Model filename for `url`, or `None` if it is not a supported model file.
///
/// Mounted paths and URLs already ending in a model extension are named
/// after their basename. Anything else is probed with a HEAD request.
pub fn model_name(url: &str, header: Option<&str>) -> Result<Option<String>> {
    let name = if url.contains("drive/MyDrive") || is_model_file(url) {
        http::filename_from_url(url)
    } else {
        http::remote_filename(url, header)?
    };

    if is_model_file(&name) {
        debug!("Model name: {}", name);
        Ok(Some(name))
    } else {
        debug!("Not a model file: {}", name);
        Ok(None)
    }
}

/// A single download job
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub dst: PathBuf,
    /// Output name; derived from the source when absent
    pub filename: Option<String>,
    /// `Authorization` header, only sent to Hugging Face
    pub header: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, dst: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dst: dst.into(),
            filename: None,
            header: None,
        }
    }
}

/// Download one file. Returns the path that was written.
pub fn download(request: &DownloadRequest) -> Result<PathBuf> {
    let source = DownloadSource::classify(&request.url)?;
    debug!("Downloading {}", source.description());

    match source {
        DownloadSource::GoogleDriveFolder { url } => {
            bail!("Google Drive folders are not supported: {}", url)
        }
        DownloadSource::GoogleDrive { id } => GoogleDriveDownloader::new()?.download_to_dir(
            &id,
            &request.dst,
            request.filename.as_deref(),
        ),
        DownloadSource::MountedDrive { path } => copy_mounted(&path, request),
        DownloadSource::HuggingFace { url } => {
            fetch_with_aria2(&url, request, request.header.as_deref())
        }
        DownloadSource::Http { url } => fetch_with_aria2(&url, request, None),
    }
}

fn copy_mounted(path: &Path, request: &DownloadRequest) -> Result<PathBuf> {
    let name = match &request.filename {
        Some(name) => name.clone(),
        None => http::filename_from_url(&path.to_string_lossy()),
    };
    if name.is_empty() {
        bail!("Could not determine a filename for {}", path.display());
    }
    std::fs::create_dir_all(&request.dst)
        .with_context(|| format!("Failed to create directory: {}", request.dst.display()))?;
    let target = request.dst.join(&name);

    let start = Instant::now();
    std::fs::copy(path, &target)
        .with_context(|| format!("Failed to copy {} to {}", path.display(), target.display()))?;
    info!("Copied '{}' in {}", name, format_elapsed(start.elapsed()));
    Ok(target)
}

fn fetch_with_aria2(url: &str, request: &DownloadRequest, header: Option<&str>) -> Result<PathBuf> {
    let filename = match &request.filename {
        Some(name) => Some(name.clone()),
        None => model_name(url, header).unwrap_or_else(|e| {
            warn!("Could not determine model name for {}: {:#}", url, e);
            None
        }),
    };

    std::fs::create_dir_all(&request.dst)
        .with_context(|| format!("Failed to create directory: {}", request.dst.display()))?;
    aria2::download(&request.dst, filename.as_deref(), url, header)?;

    match filename {
        Some(name) => Ok(request.dst.join(name)),
        None => most_recent_file(&request.dst)?
            .with_context(|| format!("Download produced no file in {}", request.dst.display())),
    }
}

/// Download every URL into `dst` in parallel.
///
/// Results come back in input order; failures are reported per URL.
pub fn batch_download(
    urls: &[String],
    dst: &Path,
    header: Option<&str>,
    show_progress: bool,
) -> Vec<(String, Result<PathBuf>)> {
    let pb = batch_progress(urls.len(), show_progress);
    pb.set_message("Downloading...");

    let results: Vec<_> = urls
        .par_iter()
        .map(|url| {
            let request = DownloadRequest {
                header: header.map(str::to_string),
                ..DownloadRequest::new(url.clone(), dst)
            };
            let result = download(&request);
            if let Err(e) = &result {
                warn!("Download failed for {}: {:#}", url, e);
            }
            pb.inc(1);
            (url.clone(), result)
        })
        .collect();

    pb.finish_and_clear();
    results
}

/// URL of `filename` on the `master` branch of a GitHub repository
pub fn github_raw_url(repo: &str, filename: &str) -> String {
    format!("https://raw.githubusercontent.com/{}/master/{}", repo, filename)
}

/// Fetch one file from a GitHub repository into `dst`.
pub fn download_from_github(repo: &str, filename: &str, dst: &Path) -> Result<PathBuf> {
    let url = github_raw_url(repo, filename);
    let target = dst.join(filename);

    http::download_to_file(&url, &target, None)
        .with_context(|| format!("Failed to fetch {} from {}", filename, repo))?;
    info!("Fetched {} from {} to {}", filename, repo, dst.display());
    Ok(target)
}

/// Most recently created (or modified) file in `dir`
pub fn most_recent_file(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let newest = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let stamp = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Some((stamp, e.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path);

    Ok(newest)
}

/// Where the model downloaded from `url` into `dst` lives.
///
/// Uses the model name when it can be determined, otherwise the newest
/// file in `dst`.
pub fn resolve_model_path(url: &str, dst: &Path) -> Result<PathBuf> {
    if let Some(name) = model_name(url, None).unwrap_or(None) {
        return Ok(dst.join(name));
    }
    most_recent_file(dst)?.with_context(|| format!("No files in {}", dst.display()))
}
