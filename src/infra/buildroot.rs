//! Isolated build roots
//!
//! Each build gets a fresh directory under `chroot/` holding a copy of the
//! base's build description with the operator's PKGBUILD patches applied.
//! The directory, including any partial artifacts, is removed when the
//! [`BuildRoot`] is dropped.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::core::package::is_package_file;
use crate::core::patch::{PkgbuildPatch, PKGBUILD};
use crate::infra::filesystem;

/// Temporary working directory of one build
#[derive(Debug)]
pub struct BuildRoot {
    dir: TempDir,
}

impl BuildRoot {
    /// Create a build root for `base` under `chroot`
    ///
    /// The contents of `sources` are copied in when it exists, then the
    /// patches applying to `base` are appended to its PKGBUILD in order.
    pub fn create(chroot: &Path, base: &str, sources: &Path, patches: &[PkgbuildPatch]) -> io::Result<Self> {
        filesystem::create_dir_all(chroot)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{base}."))
            .tempdir_in(chroot)?;
        if sources.is_dir() {
            filesystem::copy_dir_all(sources, dir.path())?;
        }
        let pkgbuild = dir.path().join(PKGBUILD);
        for patch in patches.iter().filter(|patch| patch.applies_to(base)) {
            tracing::info!("Applying PKGBUILD patch {} for {}", patch.key, base);
            patch.write(&pkgbuild)?;
        }
        tracing::debug!("Prepared build root {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Build root directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Package files left in the build root by the build tool
    pub fn artifacts(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(self.path()).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() && is_package_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Remove the build root, reporting failures
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            tracing::warn!("Failed to remove build root {}: {}", path.display(), e);
            e
        })
    }
}
