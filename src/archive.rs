//! Settings archives: `.zip`, `.tar`, `.tar.gz` and `.tgz`.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::TempDir;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    /// Plain or gzip-compressed tarball; compression is detected on read.
    Tar,
}

/// Archive kind by file name, `None` for anything else.
pub fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::Tar)
    } else {
        None
    }
}

/// Unpacks an archive into a fresh temporary directory. The directory is
/// removed when the returned handle drops.
pub fn extract(path: &Path) -> Result<TempDir> {
    let kind = archive_kind(path)
        .ok_or_else(|| Error::format(path.display().to_string(), "not a settings archive"))?;
    let target = tempfile::Builder::new()
        .prefix("stb-settings-")
        .tempdir()
        .map_err(|e| Error::io(std::env::temp_dir(), e))?;
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    match kind {
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(file)?;
            archive.extract(target.path())?;
        }
        ArchiveKind::Tar => {
            let mut reader = BufReader::new(file);
            let mut magic = [0u8; 2];
            let gzip = reader.read_exact(&mut magic).is_ok() && magic == [0x1f, 0x8b];
            reader
                .seek(SeekFrom::Start(0))
                .map_err(|e| Error::io(path, e))?;
            let unpacked = if gzip {
                tar::Archive::new(GzDecoder::new(reader)).unpack(target.path())
            } else {
                tar::Archive::new(reader).unpack(target.path())
            };
            unpacked.map_err(|e| Error::io(path, e))?;
        }
    }
    log::debug!("{} extracted to {}", path.display(), target.path().display());
    Ok(target)
}

/// Directory holding the settings: `dir` itself, or its only entry when
/// that is a folder.
pub fn settings_root(dir: &Path) -> PathBuf {
    let Ok(entries) = fs::read_dir(dir) else {
        return dir.to_path_buf();
    };
    let entries: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    match entries.as_slice() {
        [only] if only.is_dir() => only.clone(),
        _ => dir.to_path_buf(),
    }
}
