//! Small formatting helpers shared by the CLI and the download/git reports.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

const SIZE_UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Format bytes into a human-readable string (`0B`, `1.0 KB`, `1.5 MB`, `2.25 GB`)
///
/// Values are rounded to two decimals; whole numbers keep one decimal.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }

    let mut exponent = 0;
    let mut remaining = bytes;
    while remaining >= 1024 && exponent < SIZE_UNITS.len() - 1 {
        remaining /= 1024;
        exponent += 1;
    }
    let scaled = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (scaled * 100.0).round() / 100.0;

    if rounded.fract() == 0.0 {
        format!("{:.1} {}", rounded, SIZE_UNITS[exponent])
    } else {
        format!("{} {}", rounded, SIZE_UNITS[exponent])
    }
}

/// Format an elapsed duration as `N sec` or `M min S sec`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{} sec", secs)
    } else {
        format!("{} min {} sec", secs / 60, secs % 60)
    }
}

/// Human-readable size of a file on disk
pub fn file_size(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("File not found: {}", path.display()))?;
    Ok(format_size(meta.len()))
}

/// Overall progress bar for a batch of `len` jobs (hidden when `visible` is false)
pub fn batch_progress(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} | {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(2_415_919_104), "2.25 GB");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(30)), "30 sec");
        assert_eq!(format_elapsed(Duration::from_secs(120)), "2 min 0 sec");
        assert_eq!(format_elapsed(Duration::from_millis(61_900)), "1 min 1 sec");
    }

    #[test]
    fn test_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();
        assert_eq!(file_size(&path).unwrap(), "2.0 KB");
        assert!(file_size(&dir.path().join("missing")).is_err());
    }
}
