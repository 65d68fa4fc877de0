//! Read-only filesystem abstraction.
//!
//! The loader never touches the disk directly. Everything goes through a
//! [`FileSystem`], which the surrounding tool supplies:
//!
//! - [`OsFileSystem`]: the host filesystem, read-only
//! - [`MemoryFileSystem`]: an in-memory tree, used by tests

mod memory;
mod os;

pub use memory::MemoryFileSystem;
pub use os::OsFileSystem;

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Lexically normalize a path: drop `.` components and fold `..` into
/// their parent. Symlinks are not resolved.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[derive(Debug, Error)]
pub enum FsError {
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Read-only view of a filesystem.
pub trait FileSystem: Send + Sync {
    /// Whether the path exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Entries of a directory, sorted by name.
    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;

    /// Open a file for reading.
    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError>;

    /// Read a whole file as UTF-8, replacing invalid sequences.
    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        let mut reader = self.open_file(path)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|source| FsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/a/b/")), PathBuf::from("/a/b"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize(Path::new("a/../..")), PathBuf::from(".."));
        assert_eq!(normalize(Path::new(".")), PathBuf::from("."));
    }
}
