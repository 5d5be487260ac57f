//! aria2c invocation.
//!
//! Options are kept as an ordered key/value list and rendered to argv:
//! keys starting with `_` are positional, `true` becomes `--key`, `false`
//! and unset values are dropped, anything else becomes `--key=value`.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;
use std::time::Instant;
use tracing::{debug, info};

use crate::util::format_elapsed;

/// One aria2c option value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Switch(bool),
    Text(String),
    Unset,
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Switch(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<u32> for OptionValue {
    fn from(value: u32) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl<T: Into<OptionValue>> From<Option<T>> for OptionValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(OptionValue::Unset, Into::into)
    }
}

/// Render an ordered option list to command-line arguments
pub fn render_args(options: &[(&str, OptionValue)]) -> Vec<String> {
    options
        .iter()
        .filter_map(|(key, value)| match value {
            OptionValue::Text(v) if key.starts_with('_') => Some(v.clone()),
            OptionValue::Text(v) => Some(format!("--{}={}", key, v)),
            OptionValue::Switch(true) => Some(format!("--{}", key)),
            OptionValue::Switch(false) | OptionValue::Unset => None,
        })
        .collect()
}

/// Arguments for a segmented, resumable download of `url` into `dir`
///
/// `header` is only forwarded for Hugging Face URLs.
pub fn download_args(dir: &Path, filename: Option<&str>, url: &str, header: Option<&str>) -> Vec<String> {
    let header = header.filter(|_| url.contains("huggingface.co"));

    render_args(&[
        ("console-log-level", "error".into()),
        ("summary-interval", 10u32.into()),
        ("header", header.into()),
        ("continue", true.into()),
        ("max-connection-per-server", 16u32.into()),
        ("min-split-size", "1M".into()),
        ("split", 16u32.into()),
        ("dir", OptionValue::Text(dir.to_string_lossy().into_owned())),
        ("out", filename.into()),
        ("_url", url.into()),
    ])
}

/// Download `url` with aria2c.
pub fn download(dir: &Path, filename: Option<&str>, url: &str, header: Option<&str>) -> Result<()> {
    let aria2c = which::which("aria2c").context("aria2c not found in PATH")?;
    let args = download_args(dir, filename, url, header);
    let label = filename.unwrap_or(url);

    info!("Downloading {}...", label);
    debug!("aria2c {}", args.join(" "));
    let start = Instant::now();

    let status = Command::new(aria2c)
        .args(&args)
        .status()
        .context("Failed to run aria2c")?;

    if !status.success() {
        bail!("aria2c failed for {} ({})", url, status);
    }

    info!("Downloaded {} in {}", label, format_elapsed(start.elapsed()));
    Ok(())
}
