//! Archive extraction to a destination directory.
//!
//! Two layouts are supported:
//! - [`extract_rerooted`] strips wrapper directories (see [`super::reroot`])
//! - [`extract_package`] keeps member paths as they are in the archive
//!
//! Extraction is sequential and not transactional: files written before an
//! error stay on disk. Re-running is safe, directory creation is idempotent
//! and files are overwritten.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::error::ExtractError;
use super::reader::ArchiveReader;
use super::reroot::RerootPlan;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Extraction statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractStats {
    /// Files written to the destination
    pub written: usize,
    /// Files left alone because they already existed
    pub skipped: usize,
    /// Total bytes written
    pub bytes: u64,
}

/// How member paths map onto the destination.
enum Layout {
    Preserve,
    Reroot(RerootPlan),
}

impl Layout {
    fn target(&self, destination: &Path, member: &str) -> PathBuf {
        match self {
            Layout::Preserve => destination.join(member),
            Layout::Reroot(plan) => plan.destination_for(destination, member),
        }
    }
}

/// Extract `archive` into `destination`, stripping superfluous wrapper
/// directories.
///
/// A missing archive fails with [`ExtractError::NotFound`] before the
/// destination is touched. Existing files are overwritten.
pub fn extract_rerooted(archive: &Path, destination: &Path) -> Result<ExtractStats, ExtractError> {
    let reader = ArchiveReader::open(archive)?;
    let members = reader.file_paths()?;
    let plan = RerootPlan::new(members.iter().map(String::as_str));

    if let Some(wrapper) = plan.index().top_level_wrapper() {
        debug!("Stripping wrapper directory '{}' from {}", wrapper, archive.display());
    }

    let stats = unpack(&reader, destination, &Layout::Reroot(plan), true)?;
    info!(
        "Extracted {} files ({} bytes) from {} to {}",
        stats.written,
        stats.bytes,
        archive.display(),
        destination.display()
    );
    Ok(stats)
}

/// Extract `archive` into `destination` keeping member paths verbatim.
///
/// With `overwrite = false`, files that already exist are skipped.
pub fn extract_package(
    archive: &Path,
    destination: &Path,
    overwrite: bool,
) -> Result<ExtractStats, ExtractError> {
    let reader = ArchiveReader::open(archive)?;
    let stats = unpack(&reader, destination, &Layout::Preserve, overwrite)?;
    info!(
        "Extracted {} files ({} skipped) from {} to {}",
        stats.written,
        stats.skipped,
        archive.display(),
        destination.display()
    );
    Ok(stats)
}

fn unpack(
    reader: &ArchiveReader,
    destination: &Path,
    layout: &Layout,
    overwrite: bool,
) -> Result<ExtractStats, ExtractError> {
    fs::create_dir_all(destination).map_err(|e| ExtractError::io(destination, e))?;

    let mut stats = ExtractStats::default();

    reader.for_each_file(|member, data| {
        let target = layout.target(destination, &member.path);

        if !overwrite && target.exists() {
            debug!("Keeping existing file: {}", target.display());
            stats.skipped += 1;
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ExtractError::member_io(parent, &member.path, e))?;
        }

        let file =
            File::create(&target).map_err(|e| ExtractError::member_io(&target, &member.path, e))?;
        let mut writer = BufWriter::new(file);
        let bytes = copy_member(reader.path(), &member.path, data, &mut writer, &target)?;
        writer
            .flush()
            .map_err(|e| ExtractError::member_io(&target, &member.path, e))?;

        stats.written += 1;
        stats.bytes += bytes;
        Ok(())
    })?;

    Ok(stats)
}

/// Copy one member's bytes, blaming read failures on the archive and write
/// failures on the target file.
fn copy_member(
    archive: &Path,
    member: &str,
    source: &mut dyn Read,
    sink: &mut impl Write,
    target: &Path,
) -> Result<u64, ExtractError> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ExtractError::corrupt(archive, Some(member), e)),
        };
        sink.write_all(&buf[..n])
            .map_err(|e| ExtractError::member_io(target, member, e))?;
        total += n as u64;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use walkdir::WalkDir;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    /// Relative file paths under `root`, sorted, with forward slashes.
    fn files_under(root: &Path) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_wrapper_directory_is_stripped() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("proj.zip");
        write_zip(
            &archive,
            &[("proj-1.0/README.md", "readme"), ("proj-1.0/src/main.py", "print()")],
        );
        let out = dir.path().join("out");

        let stats = extract_rerooted(&archive, &out).unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(files_under(&out), vec!["README.md", "src/main.py"]);
        assert_eq!(fs::read_to_string(out.join("README.md")).unwrap(), "readme");
    }

    #[test]
    fn test_nested_single_child_chain() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("nested.zip");
        write_zip(
            &archive,
            &[("a/b/c/file1.txt", "1"), ("a/b/c/d/file2.txt", "2")],
        );
        let out = dir.path().join("out");

        extract_rerooted(&archive, &out).unwrap();

        assert_eq!(files_under(&out), vec!["d/file2.txt", "file1.txt"]);
    }

    #[test]
    fn test_multiple_top_level_entries_preserved() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("multi.zip");
        write_zip(&archive, &[("x/one.txt", "1"), ("y/two.txt", "2")]);
        let out = dir.path().join("out");

        extract_rerooted(&archive, &out).unwrap();

        assert_eq!(files_under(&out), vec!["x/one.txt", "y/two.txt"]);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.zip");
        write_zip(&archive, &[("w/a.txt", "alpha"), ("w/b/c.txt", "gamma")]);
        let out = dir.path().join("out");

        extract_rerooted(&archive, &out).unwrap();
        fs::write(out.join("a.txt"), "modified").unwrap();
        let second = extract_rerooted(&archive, &out).unwrap();

        assert_eq!(second.written, 2);
        assert_eq!(files_under(&out), vec!["a.txt", "b/c.txt"]);
        assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "alpha");
    }

    #[test]
    fn test_missing_archive_creates_nothing() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");

        let err = extract_rerooted(&dir.path().join("missing.zip"), &out).unwrap_err();

        assert!(matches!(err, ExtractError::NotFound(_)));
        assert!(!out.exists());
    }

    #[test]
    fn test_unsafe_member_rejected_before_writing() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("ok.txt", "fine"), ("../escape.txt", "nope")]);
        let out = dir.path().join("out");

        let err = extract_rerooted(&archive, &out).unwrap_err();

        assert!(matches!(err, ExtractError::UnsafeMember { .. }));
        assert!(!dir.path().join("escape.txt").exists());
        assert!(!out.join("ok.txt").exists());
    }

    #[test]
    fn test_extract_package_preserves_paths() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("deps.zip");
        write_zip(&archive, &[("deps/a.deb", "a"), ("deps/b.deb", "b")]);
        let out = dir.path().join("out");

        let stats = extract_package(&archive, &out, true).unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(files_under(&out), vec!["deps/a.deb", "deps/b.deb"]);
    }

    #[test]
    fn test_extract_package_without_overwrite_skips_existing() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("cfg.zip");
        write_zip(&archive, &[("config.json", "{\"new\":true}"), ("extra.txt", "x")]);
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("config.json"), "{\"old\":true}").unwrap();

        let stats = extract_package(&archive, &out, false).unwrap();

        assert_eq!(stats.written, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(
            fs::read_to_string(out.join("config.json")).unwrap(),
            "{\"old\":true}"
        );
    }

    #[test]
    fn test_tar_rerooted() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("release.tar");
        {
            let file = File::create(&archive).unwrap();
            let mut builder = tar::Builder::new(file);
            for (name, data) in [("release/bin/tool", "bin"), ("release/share/doc.txt", "doc")] {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, data.as_bytes()).unwrap();
            }
            builder.finish().unwrap();
        }
        let out = dir.path().join("out");

        extract_rerooted(&archive, &out).unwrap();

        assert_eq!(files_under(&out), vec!["bin/tool", "share/doc.txt"]);
    }

    #[test]
    fn test_rar_rerooted() {
        let dir = tempdir().unwrap();
        let archive = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/wrapped.rar");
        let out = dir.path().join("out");

        let stats = extract_rerooted(&archive, &out).unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(stats.bytes, 16);
        assert_eq!(files_under(&out), vec!["bin/tool.sh", "readme.txt"]);
        assert_eq!(fs::read_to_string(out.join("bin/tool.sh")).unwrap(), "echo hi\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_denied_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let archive = dir.path().join("p.zip");
        write_zip(&archive, &[("a.txt", "a"), ("b.txt", "b")]);
        let out = dir.path().join("locked");
        fs::create_dir_all(&out).unwrap();
        fs::set_permissions(&out, fs::Permissions::from_mode(0o555)).unwrap();

        // Root ignores directory permissions
        let probe = File::create(out.join(".probe"));
        if probe.is_ok() {
            return;
        }

        let err = extract_rerooted(&archive, &out).unwrap_err();
        fs::set_permissions(&out, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(err, ExtractError::PermissionDenied { .. }));
        assert_eq!(err.member(), Some("a.txt"));
    }
}
