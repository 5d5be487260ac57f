//! Git repository helpers.
//!
//! Thin wrappers over the `git` binary: clone, checkout, reset, update
//! (fetch + pull), apply patches and inspect a working tree. Each operation
//! returns a typed outcome so callers never have to parse git's output.

mod batch;

pub use batch::{batch_clone, batch_update, discover_repos};

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::downloaders::http;

/// Git operation errors
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git executable not found in PATH")]
    GitNotFound,

    #[error("Failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: io::Error,
    },

    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Could not derive a repository name from '{0}'")]
    InvalidUrl(String),

    #[error("Failed to prepare patch {source_name}: {reason}")]
    Patch { source_name: String, reason: String },
}

/// Run git with `args` in `dir`, returning trimmed stdout.
fn run_git<I, S>(dir: Option<&Path>, args: I) -> Result<String, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let args_display = args
        .iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");

    let mut cmd = Command::new("git");
    cmd.args(&args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    debug!("git {}", args_display);

    let output = cmd.output().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound if dir.map_or(true, |d| d.is_dir()) => GitError::GitNotFound,
        _ => GitError::Spawn {
            args: args_display.clone(),
            source: e,
        },
    })?;

    if !output.status.success() {
        return Err(GitError::Command {
            args: args_display,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Repository directory name for a clone URL
///
/// `https://github.com/user/repo.git` -> `repo`
pub fn repo_name_from_url(url: &str) -> Result<String, GitError> {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);

    if name.is_empty() {
        return Err(GitError::InvalidUrl(url.to_string()));
    }
    Ok(name.to_string())
}

/// `owner/repo` for a remote URL (HTTPS or scp-style)
pub fn repo_slug(remote_url: &str) -> Result<String, GitError> {
    let trimmed = remote_url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let mut parts = trimmed.rsplit(['/', ':']).filter(|p| !p.is_empty());

    match (parts.next(), parts.next()) {
        (Some(repo), Some(owner)) => Ok(format!("{}/{}", owner, repo)),
        _ => Err(GitError::InvalidUrl(remote_url.to_string())),
    }
}

/// Options for [`clone`]
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Repository URL
    pub url: String,
    /// Directory the clone is created in (defaults to the process cwd)
    pub cwd: Option<PathBuf>,
    /// Target directory name (defaults to the repository name)
    pub directory: Option<PathBuf>,
    /// Branch to check out
    pub branch: Option<String>,
    /// Commit to check out after cloning
    pub commit: Option<String>,
    /// Clone submodules recursively
    pub recursive: bool,
    /// Pass `--quiet` to git
    pub quiet: bool,
}

impl CloneOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Where the working tree ends up
    pub fn target_dir(&self) -> Result<PathBuf, GitError> {
        let dir = match &self.directory {
            Some(dir) => dir.clone(),
            None => PathBuf::from(repo_name_from_url(&self.url)?),
        };
        Ok(match &self.cwd {
            Some(cwd) => cwd.join(dir),
            None => dir,
        })
    }

    fn clone_args(&self, target: &Path) -> Vec<String> {
        let mut args = vec!["clone".to_string()];
        if let Some(branch) = &self.branch {
            args.push("--branch".to_string());
            args.push(branch.clone());
        }
        if self.recursive {
            args.push("--recursive".to_string());
        }
        if self.quiet {
            args.push("--quiet".to_string());
        }
        args.push(self.url.clone());
        args.push(target.to_string_lossy().into_owned());
        args
    }
}

/// Result of a clone request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneOutcome {
    Cloned(PathBuf),
    /// Target directory was already present; git was not invoked
    AlreadyExists(PathBuf),
}

/// Clone a repository unless the target directory already exists.
pub fn clone(opts: &CloneOptions) -> Result<CloneOutcome, GitError> {
    let target = opts.target_dir()?;

    if target.exists() {
        debug!("Clone target already exists: {}", target.display());
        return Ok(CloneOutcome::AlreadyExists(target));
    }

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| GitError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    run_git(None, opts.clone_args(&target))?;
    info!("Cloned {} into {}", opts.url, target.display());

    if let Some(commit) = &opts.commit {
        checkout(&target, commit, false)?;
    }

    Ok(CloneOutcome::Cloned(target))
}

/// Check out a branch or commit, optionally creating the branch.
pub fn checkout(dir: &Path, reference: &str, create: bool) -> Result<(), GitError> {
    let mut args = vec!["-c", "advice.detachedHead=false", "checkout"];
    if create {
        args.push("-b");
    }
    args.push(reference);

    run_git(Some(dir), args)?;
    info!("Checked out '{}' in {}", reference, dir.display());
    Ok(())
}

/// Reset HEAD to `commit`.
pub fn reset(dir: &Path, commit: &str, hard: bool) -> Result<(), GitError> {
    let mut args = vec!["reset"];
    if hard {
        args.push("--hard");
    }
    args.push(commit);

    run_git(Some(dir), args)?;
    info!("Reset {} to {}", dir.display(), commit);
    Ok(())
}

/// Options for [`update`]
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Run `git fetch` first
    pub fetch: bool,
    /// Run `git pull`
    pub pull: bool,
    /// Remote used for fetch
    pub remote: Option<String>,
    /// Extra arguments appended to `git pull`
    pub pull_args: Vec<String>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            fetch: false,
            pull: true,
            remote: None,
            pull_args: Vec::new(),
        }
    }
}

/// Result of an update request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// HEAD moved from the first commit to the second
    Updated { from: String, to: String },
    UpToDate,
}

/// Fetch and/or pull the repository in `dir`.
///
/// Whether anything changed is decided by comparing HEAD before and after.
pub fn update(dir: &Path, opts: &UpdateOptions) -> Result<UpdateOutcome, GitError> {
    ensure_repo(dir)?;
    let before = head_commit(dir)?;

    if opts.fetch {
        let mut args = vec!["fetch".to_string()];
        args.extend(opts.remote.clone());
        run_git(Some(dir), args)?;
    }

    if opts.pull {
        let mut args = vec!["pull".to_string()];
        args.extend(opts.pull_args.iter().cloned());
        run_git(Some(dir), args)?;
    }

    let after = head_commit(dir)?;
    if before == after {
        Ok(UpdateOutcome::UpToDate)
    } else {
        info!("Updated {} ({} -> {})", dir.display(), short(&before), short(&after));
        Ok(UpdateOutcome::Updated {
            from: before,
            to: after,
        })
    }
}

/// Abbreviated commit hash (first 7 characters)
pub fn short(commit: &str) -> &str {
    &commit[..commit.len().min(7)]
}

/// Where a patch comes from
#[derive(Debug, Clone)]
pub enum PatchSource {
    /// Downloaded into the patch directory first
    Url(String),
    File(PathBuf),
}

/// Options for [`apply_patch`]
#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub source: PatchSource,
    /// Where downloaded patches are stored
    pub patch_dir: PathBuf,
    /// Repository the patch is applied to
    pub repo_dir: PathBuf,
    /// Pass `--whitespace=fix`
    pub whitespace_fix: bool,
    /// Extra arguments for `git apply`
    pub args: Vec<String>,
}

/// Apply a patch with `git apply`, downloading it first if needed.
///
/// Returns the path of the applied patch file.
pub fn apply_patch(opts: &PatchOptions) -> Result<PathBuf, GitError> {
    let patch_path = match &opts.source {
        PatchSource::File(path) => path.clone(),
        PatchSource::Url(url) => {
            let name = repo_name_from_url(url)?;
            std::fs::create_dir_all(&opts.patch_dir).map_err(|e| GitError::Patch {
                source_name: url.clone(),
                reason: e.to_string(),
            })?;
            let path = opts.patch_dir.join(name);
            http::download_to_file(url, &path, None).map_err(|e| GitError::Patch {
                source_name: url.clone(),
                reason: format!("{:#}", e),
            })?;
            path
        }
    };

    if !patch_path.is_file() {
        return Err(GitError::Patch {
            source_name: patch_path.display().to_string(),
            reason: "patch file does not exist".to_string(),
        });
    }

    let mut args = vec!["apply".to_string()];
    if opts.whitespace_fix {
        args.push("--whitespace=fix".to_string());
    }
    args.extend(opts.args.iter().cloned());
    args.push(
        std::path::absolute(&patch_path)
            .unwrap_or_else(|_| patch_path.clone())
            .to_string_lossy()
            .into_owned(),
    );

    run_git(Some(&opts.repo_dir), args)?;
    info!("Applied {} to {}", patch_path.display(), opts.repo_dir.display());
    Ok(patch_path)
}

/// Identity of a working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    /// `owner/repo` from `remote.origin.url`
    pub name: String,
    pub commit: String,
    pub branch: String,
}

fn head_commit(dir: &Path) -> Result<String, GitError> {
    run_git(Some(dir), ["rev-parse", "HEAD"])
}

fn ensure_repo(dir: &Path) -> Result<(), GitError> {
    if !dir.is_dir() {
        return Err(GitError::NotARepository(dir.to_path_buf()));
    }
    match run_git(Some(dir), ["rev-parse", "--is-inside-work-tree"]) {
        Ok(out) if out == "true" => {}
        Ok(_) | Err(GitError::Command { .. }) => {
            return Err(GitError::NotARepository(dir.to_path_buf()))
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Read name, HEAD commit and current branch of the repository in `dir`.
pub fn inspect(dir: &Path) -> Result<RepoInfo, GitError> {
    ensure_repo(dir)?;

    let commit = head_commit(dir)?;
    let branch = run_git(Some(dir), ["rev-parse", "--abbrev-ref", "HEAD"])?;
    let remote = run_git(Some(dir), ["config", "--get", "remote.origin.url"])
        .map_err(|_| GitError::InvalidUrl(format!("{} has no origin remote", dir.display())))?;

    Ok(RepoInfo {
        name: repo_slug(&remote)?,
        commit,
        branch,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::process::Command;

    pub fn git_available() -> bool {
        which::which("git").is_ok()
    }

    pub fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?} failed: {:?}", args, status);
    }

    /// Create a repository with one commit at `dir`
    pub fn init_repo(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        git(dir, &["init", "--quiet"]);
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "--quiet", "-m", "initial"]);
    }
}
