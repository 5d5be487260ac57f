//! System dependency bundles and union mounts.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::extract_rerooted;
use crate::downloaders::http;

/// Platform a dependency bundle targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DepsPlatform {
    /// `.deb` packages installed with `dpkg -i`
    Ubuntu,
    /// `.msi` / `.exe` installers run with `start /wait`
    Windows,
}

impl DepsPlatform {
    /// Platform of the running host
    pub fn current() -> Self {
        if cfg!(windows) {
            DepsPlatform::Windows
        } else {
            DepsPlatform::Ubuntu
        }
    }

    /// Whether `path` is an installer for this platform
    pub fn is_installer(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match self {
            DepsPlatform::Ubuntu => ext == "deb",
            DepsPlatform::Windows => ext == "msi" || ext == "exe",
        }
    }

    fn install_command(&self, installer: &Path) -> Command {
        match self {
            DepsPlatform::Ubuntu => {
                let mut cmd = Command::new("dpkg");
                cmd.arg("-i").arg(installer);
                cmd
            }
            DepsPlatform::Windows => {
                let mut cmd = Command::new("cmd");
                cmd.args(["/C", "start", "/wait", ""]).arg(installer);
                cmd
            }
        }
    }
}

fn run_installer(platform: DepsPlatform, installer: &Path) -> Result<()> {
    debug!("Installing {}", installer.display());
    let output = platform
        .install_command(installer)
        .output()
        .with_context(|| format!("Failed to run installer for {}", installer.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("Installing {} failed: {}", installer.display(), stderr.trim());
    }
    Ok(())
}

/// Installers inside `dir`, sorted by path
fn find_installers(dir: &Path, platform: DepsPlatform) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && platform.is_installer(e.path()))
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found
}

/// Install a downloaded bundle with `install`, then remove the bundle and
/// the staging directory.
///
/// ZIP bundles are extracted into `staging` first; a bare installer is run
/// directly. Returns the installers that ran, in order.
fn install_bundle<F>(
    bundle: &Path,
    staging: &Path,
    platform: DepsPlatform,
    mut install: F,
) -> Result<Vec<PathBuf>>
where
    F: FnMut(&Path) -> Result<()>,
{
    let is_zip = bundle
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));

    let installed = if is_zip {
        extract_rerooted(bundle, staging)
            .with_context(|| format!("Failed to extract {}", bundle.display()))?;
        let installers = find_installers(staging, platform);
        for installer in &installers {
            install(installer)?;
        }
        std::fs::remove_dir_all(staging)
            .with_context(|| format!("Failed to remove {}", staging.display()))?;
        installers
    } else if platform.is_installer(bundle) {
        install(bundle)?;
        vec![bundle.to_path_buf()]
    } else {
        bail!("Unsupported dependency bundle: {}", bundle.display());
    };

    std::fs::remove_file(bundle)
        .with_context(|| format!("Failed to remove {}", bundle.display()))?;
    Ok(installed)
}

/// Download a dependency bundle from `url` into `dst` and install it.
pub fn install_deps(url: &str, dst: &Path, platform: DepsPlatform) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create directory: {}", dst.display()))?;

    let filename = http::remote_filename(url, None)?;
    if filename.is_empty() {
        bail!("Could not determine a filename for {}", url);
    }
    let bundle = dst.join(&filename);
    http::download_to_file(url, &bundle, None)?;

    let staging = dst.join(format!("{}.staging", filename));
    let installed = install_bundle(&bundle, &staging, platform, |installer| {
        run_installer(platform, installer)
    })?;

    info!("Installed {} packages from {}", installed.len(), filename);
    Ok(installed)
}

/// Arguments for `unionfs-fuse`
pub fn union_mount_args(lower_ro: &Path, upper_rw: &Path, mountpoint: &Path) -> Vec<String> {
    vec![
        "-o".to_string(),
        "cow,allow_other,auto_unmount".to_string(),
        format!("{}=RW:{}=RO", upper_rw.display(), lower_ro.display()),
        mountpoint.to_string_lossy().into_owned(),
    ]
}

/// Mount `upper_rw` over `lower_ro` at `mountpoint` with copy-on-write.
pub fn union_mount(lower_ro: &Path, upper_rw: &Path, mountpoint: &Path) -> Result<()> {
    for dir in [lower_ro, upper_rw, mountpoint] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let unionfs = which::which("unionfs-fuse").context("unionfs-fuse not found in PATH")?;
    let output = Command::new(unionfs)
        .args(union_mount_args(lower_ro, upper_rw, mountpoint))
        .output()
        .context("Failed to run unionfs-fuse")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("unionfs-fuse mount failed: {}", stderr.trim());
    }

    info!("Mounted {} over {} at {}", upper_rw.display(), lower_ro.display(), mountpoint.display());
    Ok(())
}
