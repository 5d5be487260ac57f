//! Parallel clone and update over many repositories.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::warn;

use super::{clone, update, CloneOptions, CloneOutcome, GitError, UpdateOptions, UpdateOutcome};
use crate::util::batch_progress;

/// Clone every URL using `template` for the shared options.
///
/// Results come back in input order. One failure does not stop the others.
pub fn batch_clone(
    urls: &[String],
    template: &CloneOptions,
    show_progress: bool,
) -> Vec<(String, Result<CloneOutcome, GitError>)> {
    let pb = batch_progress(urls.len(), show_progress);
    pb.set_message("Cloning...");

    let results: Vec<_> = urls
        .par_iter()
        .map(|url| {
            let opts = CloneOptions {
                url: url.clone(),
                directory: None,
                ..template.clone()
            };
            let result = clone(&opts);
            if let Err(e) = &result {
                warn!("Clone of {} failed: {}", url, e);
            }
            pb.inc(1);
            (url.clone(), result)
        })
        .collect();

    pb.finish_and_clear();
    results
}

/// Update every repository in `repos`.
pub fn batch_update(
    repos: &[PathBuf],
    opts: &UpdateOptions,
    show_progress: bool,
) -> Vec<(PathBuf, Result<UpdateOutcome, GitError>)> {
    let pb = batch_progress(repos.len(), show_progress);
    pb.set_message("Updating...");

    let results: Vec<_> = repos
        .par_iter()
        .map(|repo| {
            let result = update(repo, opts);
            if let Err(e) = &result {
                warn!("Update of {} failed: {}", repo.display(), e);
            }
            pb.inc(1);
            (repo.clone(), result)
        })
        .collect();

    pb.finish_and_clear();
    results
}

/// Git working trees directly under `parent`, sorted by path.
pub fn discover_repos(parent: &Path) -> Result<Vec<PathBuf>, GitError> {
    let entries = std::fs::read_dir(parent).map_err(|e| GitError::Io {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let mut repos: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.join(".git").exists())
        .collect();
    repos.sort();
    Ok(repos)
}
