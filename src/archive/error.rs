//! Extraction errors

use std::io;
use std::path::{Path, PathBuf};

/// Failure while reading an archive or writing its members.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Archive not found: {0}")]
    NotFound(PathBuf),

    #[error("Permission denied writing {path}{}", member_suffix(.member))]
    PermissionDenied {
        path: PathBuf,
        member: Option<String>,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt archive {archive}{}: {reason}", member_suffix(.member))]
    CorruptArchive {
        archive: PathBuf,
        member: Option<String>,
        reason: String,
    },

    #[error("I/O error on {path}{}: {source}", member_suffix(.member))]
    Io {
        path: PathBuf,
        member: Option<String>,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Refusing to extract unsafe member path '{member}'")]
    UnsafeMember { member: String },
}

fn member_suffix(member: &Option<String>) -> String {
    match member {
        Some(m) => format!(" (member '{}')", m),
        None => String::new(),
    }
}

impl ExtractError {
    /// Classify an I/O failure on `path`.
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::classify_io(path, None, source)
    }

    /// Classify an I/O failure on `path` while writing archive `member`.
    pub(crate) fn member_io(path: &Path, member: &str, source: io::Error) -> Self {
        Self::classify_io(path, Some(member), source)
    }

    fn classify_io(path: &Path, member: Option<&str>, source: io::Error) -> Self {
        let path = path.to_path_buf();
        let member = member.map(str::to_string);
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path,
                member,
                source,
            },
            _ => Self::Io {
                path,
                member,
                source,
            },
        }
    }

    pub(crate) fn corrupt(archive: &Path, member: Option<&str>, reason: impl ToString) -> Self {
        Self::CorruptArchive {
            archive: archive.to_path_buf(),
            member: member.map(str::to_string),
            reason: reason.to_string(),
        }
    }

    /// The archive member involved in the failure, when known.
    pub fn member(&self) -> Option<&str> {
        match self {
            Self::CorruptArchive { member, .. }
            | Self::PermissionDenied { member, .. }
            | Self::Io { member, .. } => member.as_deref(),
            Self::UnsafeMember { member } => Some(member),
            _ => None,
        }
    }
}
