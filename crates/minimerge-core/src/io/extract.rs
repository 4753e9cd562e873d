//! Source archive unpacking.
//!
//! Handles `.tar`, `.tar.gz`/`.tgz`, `.tar.zst`/`.tzst` and `.zip`.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

/// Errors raised while unpacking an archive.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The file name matches no known archive format.
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Corrupt archive, or an entry leading out of the destination.
    #[error("Archive error: {0}")]
    Archive(String),
}

/// Archive formats [`unpack`] understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.tar`
    Tar,
    /// `.tar.gz`, `.tgz`
    TarGz,
    /// `.tar.zst`, `.tzst`
    TarZst,
    /// `.zip`
    Zip,
}

/// Detect the archive format from the file extension.
pub fn detect_format(path: &Path) -> Option<ArchiveFormat> {
    let name = path.to_string_lossy().to_lowercase();

    if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        Some(ArchiveFormat::TarZst)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else if name.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else {
        None
    }
}

/// Unpack `archive` into `dest`, returning the paths written relative to
/// `dest`.
///
/// # Errors
///
/// Returns [`ExtractError::UnsupportedFormat`] for unknown extensions and
/// [`ExtractError::Archive`] for corrupt archives or entries that would land
/// outside of `dest`.
pub fn unpack(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let format = detect_format(archive)
        .ok_or_else(|| ExtractError::UnsupportedFormat(archive.display().to_string()))?;
    debug!("Unpacking {} ({format:?}) into {}", archive.display(), dest.display());

    let reader = BufReader::new(File::open(archive)?);
    match format {
        ArchiveFormat::Tar => unpack_tar(reader, dest),
        ArchiveFormat::TarGz => unpack_tar(flate2::read::GzDecoder::new(reader), dest),
        ArchiveFormat::TarZst => unpack_tar(ZstdDecoder::new(reader)?, dest),
        ArchiveFormat::Zip => unpack_zip(archive, dest),
    }
}

/// `relative` with `.` components removed, or `None` if it is absolute or
/// climbs out with `..`.
fn contained(relative: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

/// `path` with `.` and `..` resolved lexically, or `None` if it is absolute
/// or climbs above its root.
fn resolve_within(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

fn escapes(entry: &Path) -> ExtractError {
    ExtractError::Archive(format!("Invalid path in archive: {}", entry.display()))
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    fs::create_dir_all(dest)?;

    let mut archive = tar::Archive::new(reader);
    let mut written = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let relative = contained(&entry_path).ok_or_else(|| escapes(&entry_path))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let link = entry
                .link_name()?
                .ok_or_else(|| escapes(&entry_path))?
                .into_owned();
            // Symlinks are relative to their directory, hard links to the root
            let resolved = if kind.is_symlink() {
                relative.parent().unwrap_or_else(|| Path::new("")).join(&link)
            } else {
                link
            };
            if resolve_within(&resolved).is_none() {
                return Err(ExtractError::Archive(format!(
                    "Link {} points outside of the archive",
                    entry_path.display()
                )));
            }
        }

        // unpack_in refuses to write through links leading out of dest
        if !entry.unpack_in(dest)? {
            return Err(escapes(&entry_path));
        }
        if !kind.is_dir() {
            written.push(relative);
        }
    }

    Ok(written)
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest)?;
    let mut written = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(relative) = file.enclosed_name() else {
            return Err(ExtractError::Archive(format!(
                "Invalid path in archive: {}",
                file.name()
            )));
        };

        let target = dest.join(&relative);
        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut outfile = File::create(&target)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        }

        written.push(relative);
    }

    Ok(written)
}
