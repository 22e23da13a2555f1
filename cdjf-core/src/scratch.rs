use std::fs;
use std::path::{Path, PathBuf};

/// A sample file on the device under test, deleted when dropped.
///
/// Holding one of these across a measurement guarantees the sample is cleaned
/// up on every exit path, early returns and cancellations included.
pub(crate) struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Claims `path`, removing anything left behind by an earlier run.
    pub(crate) fn claim(path: &Path) -> Self {
        let _ = fs::remove_file(path);
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl AsRef<Path> for ScratchFile {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}
