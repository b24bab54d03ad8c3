//! Filesystem operations
//!
//! Durable writes go through a temporary file in the destination directory,
//! flushed and renamed into place, followed by a sync of the directory.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Remove a file, ignoring a missing one
pub fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Atomically replace `path` with `content`
///
/// Readers see either the old or the new content, never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path)?;
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    sync_dir(dir);
    Ok(())
}

/// Atomically copy `source` to `destination`
pub fn atomic_copy(source: &Path, destination: &Path) -> io::Result<()> {
    let dir = parent_dir(destination)?;
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    let mut input = fs::File::open(source)?;
    io::copy(&mut input, &mut temp)?;
    temp.as_file().sync_all()?;
    temp.persist(destination).map_err(|e| e.error)?;
    sync_dir(dir);
    Ok(())
}

/// Write `content` to `path` only if it differs from the current content
///
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, content: &[u8]) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == content {
            return Ok(false);
        }
    }
    atomic_write(path, content)?;
    Ok(true)
}

/// Recursively copy a directory tree
pub fn copy_dir_all(source: &Path, destination: &Path) -> io::Result<()> {
    copy_dir_excluding(source, destination, &[])
}

/// Recursively copy a directory tree, skipping entries named in `excluded`
pub fn copy_dir_excluding(source: &Path, destination: &Path, excluded: &[&str]) -> io::Result<()> {
    let walker = WalkDir::new(source).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry
                .file_name()
                .to_str()
                .is_some_and(|name| excluded.contains(&name))
    });
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Calculate SHA256 checksum of a file
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Flush directory entries; best effort
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(dir) = fs::File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' has no parent directory", path.display()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/record.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_if_changed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.html");
        assert!(write_if_changed(&path, b"a").unwrap());
        assert!(!write_if_changed(&path, b"a").unwrap());
        assert!(write_if_changed(&path, b"b").unwrap());
    }

    #[test]
    fn test_sha256_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_copy_dir_all() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("PKGBUILD"), "pkgname=foo").unwrap();
        fs::write(source.join("sub/patch"), "diff").unwrap();

        let destination = temp.path().join("dst");
        copy_dir_all(&source, &destination).unwrap();
        assert_eq!(fs::read_to_string(destination.join("PKGBUILD")).unwrap(), "pkgname=foo");
        assert!(destination.join("sub/patch").exists());
    }

    #[test]
    fn test_copy_dir_excluding_skips_named_entries() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        fs::create_dir_all(source.join(".git/objects")).unwrap();
        fs::write(source.join(".git/HEAD"), "ref").unwrap();
        fs::write(source.join("PKGBUILD"), "pkgname=foo").unwrap();

        let destination = temp.path().join("dst");
        copy_dir_excluding(&source, &destination, &[".git"]).unwrap();
        assert!(destination.join("PKGBUILD").exists());
        assert!(!destination.join(".git").exists());
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let temp = TempDir::new().unwrap();
        assert!(remove_file(&temp.path().join("missing")).is_ok());
    }
}
