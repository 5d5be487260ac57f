//! Wrapper-directory detection for archive extraction.
//!
//! Archives are often packed with one or more directories wrapped around the
//! real payload (`project-v1.2/...`, `release/project/...`). Extracting such
//! an archive verbatim produces useless nesting at the destination.
//!
//! The [`PrefixIndex`] records, for every directory prefix seen in the member
//! list, which members live below it. A prefix that holds *every* member of
//! the archive carries no information and is stripped. The number of such
//! leading prefixes for a member is its keep point:
//!
//! ```text
//! a/b/c/file1.txt     keep point 3 -> file1.txt
//! a/b/c/d/file2.txt   keep point 3 -> d/file2.txt
//! ```
//!
//! With two or more distinct top-level entries nothing is stripped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Split a normalized member path into its segments.
fn segments(member: &str) -> Vec<&str> {
    member.split('/').collect()
}

/// Directory prefix -> members at or below it.
#[derive(Debug, Default, Clone)]
pub struct PrefixIndex {
    prefixes: BTreeMap<String, BTreeSet<String>>,
    members: BTreeSet<String>,
}

impl PrefixIndex {
    /// Build the index from normalized, slash-separated member paths.
    ///
    /// Duplicate member paths collapse into one entry.
    pub fn build<'a, I>(members: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = Self::default();

        for member in members {
            let parts = segments(member);
            for i in 1..parts.len() {
                index
                    .prefixes
                    .entry(parts[..i].join("/"))
                    .or_default()
                    .insert(member.to_string());
            }
            index.members.insert(member.to_string());
        }

        index
    }

    /// Number of distinct members in the archive.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members registered under a directory prefix (0 for unknown prefixes).
    pub fn members_under(&self, prefix: &str) -> usize {
        self.prefixes.get(prefix).map(|m| m.len()).unwrap_or(0)
    }

    /// Top-level directory that wraps the whole archive, if there is one.
    pub fn top_level_wrapper(&self) -> Option<&str> {
        let total = self.member_count();
        if total == 0 {
            return None;
        }

        self.prefixes
            .iter()
            .filter(|(prefix, _)| !prefix.contains('/'))
            .find(|(_, members)| members.len() == total)
            .map(|(prefix, _)| prefix.as_str())
    }

    /// Number of leading segments of `member` that are superfluous wrapping.
    ///
    /// The leaf segment is never counted, so at least the file name survives.
    pub fn keep_point(&self, member: &str) -> usize {
        let total = self.member_count();
        let parts = segments(member);

        let mut keep = 0;
        for i in 1..parts.len() {
            if self.members_under(&parts[..i].join("/")) != total {
                break;
            }
            keep = i;
        }
        keep
    }

    /// Relative output path for `member` after stripping its wrapper prefixes.
    pub fn target(&self, member: &str) -> PathBuf {
        let keep = self.keep_point(member);
        let mut path = PathBuf::new();
        for part in segments(member).into_iter().skip(keep) {
            path.push(part);
        }
        path
    }
}

/// Planned output location for every member of an archive.
#[derive(Debug, Clone)]
pub struct RerootPlan {
    index: PrefixIndex,
}

impl RerootPlan {
    pub fn new<'a, I>(members: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            index: PrefixIndex::build(members),
        }
    }

    pub fn index(&self) -> &PrefixIndex {
        &self.index
    }

    /// Absolute output path of `member` under `destination`.
    pub fn destination_for(&self, destination: &Path, member: &str) -> PathBuf {
        destination.join(self.index.target(member))
    }
}
