//! Archive readers for the supported formats.
//!
//! Every format exposes the same two capabilities: list the members and
//! stream the bytes of each file member in archive order. The format is
//! resolved once when the reader is opened.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use lz4_flex::frame::FrameDecoder;
use tracing::debug;

use super::error::ExtractError;

/// Archive formats we can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// ZIP archive (PK signature)
    Zip,
    /// RAR archive (Rar! signature)
    Rar,
    /// Uncompressed tarball
    Tar,
    /// Gzip-compressed tarball
    TarGz,
    /// LZ4-framed tarball
    TarLz4,
}

impl ArchiveKind {
    /// Resolve the kind from the file name suffix.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.lz4") {
            Some(Self::TarLz4)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".rar") {
            Some(Self::Rar)
        } else {
            None
        }
    }

    /// Resolve the kind by reading magic bytes.
    ///
    /// Used as a fallback for downloads saved without a meaningful suffix.
    pub fn from_magic(path: &Path) -> std::io::Result<Option<Self>> {
        let mut file = File::open(path)?;
        let mut header = [0u8; 512];
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let header = &header[..filled];

        if header.len() < 4 {
            return Ok(None);
        }
        // ZIP: PK\x03\x04 or PK\x05\x06 (empty)
        if header[0..2] == [0x50, 0x4B] {
            return Ok(Some(Self::Zip));
        }
        // RAR4 and RAR5 share the Rar! prefix
        if header[0..4] == *b"Rar!" {
            return Ok(Some(Self::Rar));
        }
        // Gzip: assume a tarball inside
        if header[0..2] == [0x1F, 0x8B] {
            return Ok(Some(Self::TarGz));
        }
        // LZ4 frame: assume a tarball inside
        if header[0..4] == [0x04, 0x22, 0x4D, 0x18] {
            return Ok(Some(Self::TarLz4));
        }
        // POSIX tar: "ustar" at offset 257
        if header.len() >= 262 && &header[257..262] == b"ustar" {
            return Ok(Some(Self::Tar));
        }

        Ok(None)
    }
}

/// One entry inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Normalized path within the archive (forward slashes, no `.` segments)
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Whether this is a directory entry
    pub is_dir: bool,
}

/// Normalize a raw member name to a relative, slash-separated path.
///
/// Returns `Ok(None)` for names that reduce to nothing (e.g. `./`).
/// Absolute names and names escaping the root with `..` are rejected.
pub fn normalize_member(raw: &str) -> Result<Option<String>, ExtractError> {
    let unified = raw.replace('\\', "/");
    let unsafe_member = || ExtractError::UnsafeMember {
        member: raw.to_string(),
    };

    if unified.starts_with('/') {
        return Err(unsafe_member());
    }

    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(unsafe_member()),
            _ => parts.push(part),
        }
    }

    // Windows drive prefix such as `C:`
    if parts.first().is_some_and(|p| p.len() == 2 && p.ends_with(':')) {
        return Err(unsafe_member());
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

/// An opened archive of a known kind.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    path: PathBuf,
    kind: ArchiveKind,
}

impl ArchiveReader {
    /// Open an archive, resolving its kind from the suffix, then magic bytes.
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        if !path.is_file() {
            return Err(ExtractError::NotFound(path.to_path_buf()));
        }

        let kind = match ArchiveKind::from_extension(path) {
            Some(kind) => kind,
            None => ArchiveKind::from_magic(path)
                .map_err(|e| ExtractError::io(path, e))?
                .ok_or_else(|| ExtractError::UnsupportedFormat(path.to_path_buf()))?,
        };

        debug!("Opened {:?} archive: {}", kind, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            kind,
        })
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// List every member, directories included.
    pub fn members(&self) -> Result<Vec<ArchiveMember>, ExtractError> {
        match self.kind {
            ArchiveKind::Zip => self.zip_members(),
            ArchiveKind::Rar => self.rar_members(),
            ArchiveKind::Tar | ArchiveKind::TarGz | ArchiveKind::TarLz4 => self.tar_members(),
        }
    }

    /// Normalized paths of the file members only.
    pub fn file_paths(&self) -> Result<Vec<String>, ExtractError> {
        Ok(self
            .members()?
            .into_iter()
            .filter(|m| !m.is_dir)
            .map(|m| m.path)
            .collect())
    }

    /// Stream every file member, in archive order, into `visit`.
    ///
    /// Stops at the first error returned by the reader or by `visit`.
    pub fn for_each_file<F>(&self, visit: F) -> Result<(), ExtractError>
    where
        F: FnMut(&ArchiveMember, &mut dyn Read) -> Result<(), ExtractError>,
    {
        match self.kind {
            ArchiveKind::Zip => self.zip_for_each(visit),
            ArchiveKind::Rar => self.rar_for_each(visit),
            ArchiveKind::Tar | ArchiveKind::TarGz | ArchiveKind::TarLz4 => {
                self.tar_for_each(visit)
            }
        }
    }

    fn corrupt(&self, member: Option<&str>, reason: impl ToString) -> ExtractError {
        ExtractError::corrupt(&self.path, member, reason)
    }

    fn open_file(&self) -> Result<BufReader<File>, ExtractError> {
        File::open(&self.path)
            .map(BufReader::new)
            .map_err(|e| ExtractError::io(&self.path, e))
    }

    // ZIP

    fn zip_error(&self, member: Option<&str>, err: zip::result::ZipError) -> ExtractError {
        match err {
            zip::result::ZipError::Io(e) => ExtractError::io(&self.path, e),
            other => self.corrupt(member, other),
        }
    }

    fn open_zip(&self) -> Result<zip::ZipArchive<BufReader<File>>, ExtractError> {
        zip::ZipArchive::new(self.open_file()?).map_err(|e| self.zip_error(None, e))
    }

    fn zip_members(&self) -> Result<Vec<ArchiveMember>, ExtractError> {
        let mut archive = self.open_zip()?;
        let mut members = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(|e| self.zip_error(None, e))?;
            if let Some(path) = normalize_member(entry.name())? {
                members.push(ArchiveMember {
                    path,
                    size: entry.size(),
                    is_dir: entry.is_dir(),
                });
            }
        }

        Ok(members)
    }

    fn zip_for_each<F>(&self, mut visit: F) -> Result<(), ExtractError>
    where
        F: FnMut(&ArchiveMember, &mut dyn Read) -> Result<(), ExtractError>,
    {
        let mut archive = self.open_zip()?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| self.zip_error(None, e))?;
            if entry.is_dir() {
                continue;
            }
            let Some(path) = normalize_member(entry.name())? else {
                continue;
            };
            let member = ArchiveMember {
                path,
                size: entry.size(),
                is_dir: false,
            };
            visit(&member, &mut entry)?;
        }

        Ok(())
    }

    // TAR / TAR.GZ / TAR.LZ4

    fn open_tar(&self) -> Result<tar::Archive<Box<dyn Read>>, ExtractError> {
        let file = self.open_file()?;
        let reader: Box<dyn Read> = match self.kind {
            ArchiveKind::TarGz => Box::new(GzDecoder::new(file)),
            ArchiveKind::TarLz4 => Box::new(FrameDecoder::new(file)),
            _ => Box::new(file),
        };
        Ok(tar::Archive::new(reader))
    }

    fn tar_members(&self) -> Result<Vec<ArchiveMember>, ExtractError> {
        let mut archive = self.open_tar()?;
        let mut members = Vec::new();

        let entries = archive.entries().map_err(|e| self.corrupt(None, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| self.corrupt(None, e))?;
            let entry_type = entry.header().entry_type();
            if !entry_type.is_file() && !entry_type.is_dir() {
                continue;
            }
            let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            if let Some(path) = normalize_member(&raw)? {
                members.push(ArchiveMember {
                    path,
                    size: entry.size(),
                    is_dir: entry_type.is_dir(),
                });
            }
        }

        Ok(members)
    }

    fn tar_for_each<F>(&self, mut visit: F) -> Result<(), ExtractError>
    where
        F: FnMut(&ArchiveMember, &mut dyn Read) -> Result<(), ExtractError>,
    {
        let mut archive = self.open_tar()?;

        let entries = archive.entries().map_err(|e| self.corrupt(None, e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| self.corrupt(None, e))?;
            let entry_type = entry.header().entry_type();
            let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

            if !entry_type.is_file() {
                if !entry_type.is_dir() {
                    debug!("Skipping non-regular tar entry: {}", raw);
                }
                continue;
            }

            let Some(path) = normalize_member(&raw)? else {
                continue;
            };
            let member = ArchiveMember {
                path,
                size: entry.size(),
                is_dir: false,
            };
            visit(&member, &mut entry)?;
        }

        Ok(())
    }

    // RAR

    fn rar_members(&self) -> Result<Vec<ArchiveMember>, ExtractError> {
        let archive = unrar::Archive::new(&self.path)
            .open_for_listing()
            .map_err(|e| self.corrupt(None, e))?;

        let mut members = Vec::new();
        for header in archive {
            let header = header.map_err(|e| self.corrupt(None, e))?;
            let raw = header.filename.to_string_lossy().into_owned();
            if let Some(path) = normalize_member(&raw)? {
                members.push(ArchiveMember {
                    path,
                    size: header.unpacked_size,
                    is_dir: header.is_directory(),
                });
            }
        }

        Ok(members)
    }

    fn rar_for_each<F>(&self, mut visit: F) -> Result<(), ExtractError>
    where
        F: FnMut(&ArchiveMember, &mut dyn Read) -> Result<(), ExtractError>,
    {
        let archive = unrar::Archive::new(&self.path)
            .open_for_processing()
            .map_err(|e| self.corrupt(None, e))?;

        // unrar walks entries through a typestate cursor
        let mut cursor = Some(archive);

        while let Some(archive) = cursor.take() {
            let Some(entry) = archive.read_header().map_err(|e| self.corrupt(None, e))? else {
                break;
            };

            let header = entry.entry();
            let raw = header.filename.to_string_lossy().into_owned();
            let size = header.unpacked_size;

            if !header.is_file() {
                cursor = Some(entry.skip().map_err(|e| self.corrupt(Some(&raw), e))?);
                continue;
            }

            let Some(path) = normalize_member(&raw)? else {
                cursor = Some(entry.skip().map_err(|e| self.corrupt(Some(&raw), e))?);
                continue;
            };

            let (data, next) = entry.read().map_err(|e| self.corrupt(Some(&raw), e))?;
            let member = ArchiveMember {
                path,
                size,
                is_dir: false,
            };
            visit(&member, &mut Cursor::new(data))?;
            cursor = Some(next);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in files {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(ArchiveKind::from_extension(Path::new("a.ZIP")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_extension(Path::new("a.rar")), Some(ArchiveKind::Rar));
        assert_eq!(ArchiveKind::from_extension(Path::new("a.tar")), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::from_extension(Path::new("a.tar.gz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_extension(Path::new("a.tgz")), Some(ArchiveKind::TarGz));
        assert_eq!(
            ArchiveKind::from_extension(Path::new("venv.TAR.LZ4")),
            Some(ArchiveKind::TarLz4)
        );
        assert_eq!(ArchiveKind::from_extension(Path::new("a.safetensors")), None);
    }

    #[test]
    fn test_kind_from_magic() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("download.bin");
        write_zip(&zip_path, &[("a.txt", b"a")]);
        assert_eq!(ArchiveKind::from_magic(&zip_path).unwrap(), Some(ArchiveKind::Zip));

        let rar_path = dir.path().join("rar.bin");
        std::fs::write(&rar_path, b"Rar!\x1a\x07\x01\x00").unwrap();
        assert_eq!(ArchiveKind::from_magic(&rar_path).unwrap(), Some(ArchiveKind::Rar));

        let junk = dir.path().join("junk.bin");
        std::fs::write(&junk, b"hello world").unwrap();
        assert_eq!(ArchiveKind::from_magic(&junk).unwrap(), None);
    }

    #[test]
    fn test_normalize_member() {
        assert_eq!(normalize_member("a/b.txt").unwrap().as_deref(), Some("a/b.txt"));
        assert_eq!(normalize_member("a\\b.txt").unwrap().as_deref(), Some("a/b.txt"));
        assert_eq!(normalize_member("./a//b/").unwrap().as_deref(), Some("a/b"));
        assert_eq!(normalize_member("./").unwrap(), None);
        assert!(normalize_member("../evil").is_err());
        assert!(normalize_member("a/../../evil").is_err());
        assert!(normalize_member("/etc/passwd").is_err());
        assert!(normalize_member("C:\\Windows\\x.dll").is_err());
    }

    #[test]
    fn test_open_missing_archive() {
        let dir = tempdir().unwrap();
        let err = ArchiveReader::open(&dir.path().join("nope.zip")).unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }

    #[test]
    fn test_open_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"plain text, not an archive").unwrap();
        let err = ArchiveReader::open(&path).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_zip_members_and_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.zip");
        write_zip(
            &path,
            &[("pkg/", b""), ("pkg/a.txt", b"alpha"), ("pkg/sub/b.txt", b"beta")],
        );

        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.kind(), ArchiveKind::Zip);

        let members = reader.members().unwrap();
        assert_eq!(members.len(), 3);
        assert!(members[0].is_dir);
        assert_eq!(reader.file_paths().unwrap(), vec!["pkg/a.txt", "pkg/sub/b.txt"]);

        let mut seen = Vec::new();
        reader
            .for_each_file(|member, data| {
                let mut buf = String::new();
                data.read_to_string(&mut buf).unwrap();
                seen.push((member.path.clone(), buf));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                ("pkg/a.txt".to_string(), "alpha".to_string()),
                ("pkg/sub/b.txt".to_string(), "beta".to_string()),
            ]
        );
    }

    #[test]
    fn test_tar_gz_members() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bundle.tar.gz");
        {
            let file = File::create(&path).unwrap();
            let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(enc);
            let data = b"hello";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "root/hello.txt", &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.kind(), ArchiveKind::TarGz);
        assert_eq!(reader.file_paths().unwrap(), vec!["root/hello.txt"]);
    }

    #[test]
    fn test_tar_lz4_members_and_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("venv.tar.lz4");
        {
            let file = File::create(&path).unwrap();
            let enc = lz4_flex::frame::FrameEncoder::new(file);
            let mut builder = tar::Builder::new(enc);
            for (name, data) in [("venv/bin/python", "#!"), ("venv/lib/site.py", "import os")] {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, data.as_bytes()).unwrap();
            }
            builder.into_inner().unwrap().finish().unwrap();
        }

        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.kind(), ArchiveKind::TarLz4);
        assert_eq!(
            reader.file_paths().unwrap(),
            vec!["venv/bin/python", "venv/lib/site.py"]
        );

        let mut contents = Vec::new();
        reader
            .for_each_file(|_, data| {
                let mut buf = String::new();
                data.read_to_string(&mut buf).unwrap();
                contents.push(buf);
                Ok(())
            })
            .unwrap();
        assert_eq!(contents, vec!["#!", "import os"]);

        // Saved without a suffix: found by the frame magic
        let renamed = dir.path().join("download.bin");
        std::fs::rename(&path, &renamed).unwrap();
        assert_eq!(ArchiveKind::from_magic(&renamed).unwrap(), Some(ArchiveKind::TarLz4));
    }

    fn rar_fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/wrapped.rar")
    }

    #[test]
    fn test_rar_members() {
        let reader = ArchiveReader::open(&rar_fixture()).unwrap();
        assert_eq!(reader.kind(), ArchiveKind::Rar);

        let members = reader.members().unwrap();
        let dirs: Vec<&str> = members
            .iter()
            .filter(|m| m.is_dir)
            .map(|m| m.path.as_str())
            .collect();
        assert_eq!(dirs, vec!["pack", "pack/bin"]);
        assert_eq!(
            reader.file_paths().unwrap(),
            vec!["pack/readme.txt", "pack/bin/tool.sh"]
        );
        assert!(members.iter().any(|m| m.path == "pack/readme.txt" && m.size == 8));
    }

    #[test]
    fn test_rar_stream_skips_directories() {
        let reader = ArchiveReader::open(&rar_fixture()).unwrap();

        let mut seen = Vec::new();
        reader
            .for_each_file(|member, data| {
                let mut buf = String::new();
                data.read_to_string(&mut buf).unwrap();
                seen.push((member.path.clone(), buf));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                ("pack/readme.txt".to_string(), "read me\n".to_string()),
                ("pack/bin/tool.sh".to_string(), "echo hi\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_rar_detected_by_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("download");
        std::fs::copy(rar_fixture(), &path).unwrap();
        assert_eq!(ArchiveReader::open(&path).unwrap().kind(), ArchiveKind::Rar);
    }

    #[test]
    fn test_corrupt_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"PK\x03\x04 definitely not a zip").unwrap();
        let reader = ArchiveReader::open(&path).unwrap();
        assert!(matches!(
            reader.members().unwrap_err(),
            ExtractError::CorruptArchive { .. }
        ));
    }
}
