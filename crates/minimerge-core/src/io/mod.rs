//! Archive handling and tree copies for fetched sources.

pub mod extract;

use std::path::Path;

/// Copy the content of `from` into `to`, overwriting existing files.
pub(crate) fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    let options = fs_extra::dir::CopyOptions::new().overwrite(true).content_only(true);
    fs_extra::dir::copy(from, to, &options)
        .map(|_| ())
        .map_err(|e| std::io::Error::other(e.to_string()))
}
