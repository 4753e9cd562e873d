use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::{debug, info};

use super::{FetchError, FetchOptions, Fetcher};
use crate::io::copy_tree;
use crate::io::extract::{self, detect_format};
use crate::paths::filename_from_url;

/// Downloads a single file, checks it and unpacks it over the destination.
///
/// The download is kept under `<dest>/.download/` so that a file whose
/// md5 still matches is not fetched twice.
#[derive(Debug, Clone)]
pub struct StaticFetcher {
    client: reqwest::blocking::Client,
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticFetcher {
    /// A fetcher with its own HTTP client.
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { client }
    }

    fn download(&self, uri: &str, target: &Path, dest: &Path) -> Result<(), FetchError> {
        let fetch_err = |reason: String| FetchError::Fetch {
            uri: uri.to_string(),
            dest: dest.to_path_buf(),
            reason,
        };

        if let Some(local) = local_path(uri) {
            debug!("Copying {} to {}", local.display(), target.display());
            fs::copy(&local, target)
                .map_err(|e| fetch_err(format!("cannot copy {}: {e}", local.display())))?;
            return Ok(());
        }

        info!("Downloading {uri}");
        let http_err = |source| FetchError::Http {
            uri: uri.to_string(),
            source,
        };
        let mut response = self
            .client
            .get(uri)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(http_err)?;
        let mut file = fs::File::create(target)?;
        response.copy_to(&mut file).map_err(http_err)?;
        Ok(())
    }
}

/// `file://` uris and plain absolute paths.
fn local_path(uri: &str) -> Option<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    let path = Path::new(uri);
    path.is_absolute().then(|| path.to_path_buf())
}

fn md5_hex(path: &Path) -> Result<String, FetchError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Unpack `archive` into `dest`. A single top-level directory is flattened.
fn unpack_into(archive: &Path, dest: &Path) -> Result<(), FetchError> {
    let tmp = tempfile::Builder::new()
        .prefix(".minitage.download.tmp")
        .tempdir_in(dest)?;
    extract::unpack(archive, tmp.path())?;

    let top: Vec<PathBuf> = fs::read_dir(tmp.path())?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| !n.to_string_lossy().starts_with('.'))
        })
        .collect();
    let root = match top.as_slice() {
        [single] if single.is_dir() => single.clone(),
        _ => tmp.path().to_path_buf(),
    };
    Ok(copy_tree(&root, dest)?)
}

impl Fetcher for StaticFetcher {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self, dest: &Path, uri: &str, opts: &FetchOptions) -> Result<(), FetchError> {
        fs::create_dir_all(dest)?;

        if let Some(local) = local_path(uri).filter(|p| p.is_dir()) {
            return Ok(copy_tree(&local, dest)?);
        }

        let filename = filename_from_url(uri);
        if filename.is_empty() {
            return Err(FetchError::Fetch {
                uri: uri.to_string(),
                dest: dest.to_path_buf(),
                reason: "cannot derive a file name".to_string(),
            });
        }
        let download_dir = dest.join(".download");
        fs::create_dir_all(&download_dir)?;
        let target = download_dir.join(filename);

        let cached = match (&opts.md5, target.is_file()) {
            (Some(expected), true) => md5_hex(&target)?.eq_ignore_ascii_case(expected),
            _ => false,
        };

        if cached {
            debug!("{} is up to date, skipping download", target.display());
        } else {
            self.download(uri, &target, dest)?;

            let actual = md5_hex(&target)?;
            if let Some(expected) = &opts.md5 {
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(FetchError::Checksum {
                        file: target,
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
            let mut md5_file = target.clone().into_os_string();
            md5_file.push(".md5");
            fs::write(md5_file, &actual)?;
        }

        if detect_format(&target).is_some() {
            unpack_into(&target, dest)
        } else {
            fs::copy(&target, dest.join(filename))?;
            Ok(())
        }
    }

    fn update(&self, dest: &Path, uri: &str, opts: &FetchOptions) -> Result<(), FetchError> {
        self.fetch(dest, uri, opts)
    }

    fn has_uri_changed(&self, _dest: &Path, _uri: &str) -> Result<bool, FetchError> {
        Ok(false)
    }
}
