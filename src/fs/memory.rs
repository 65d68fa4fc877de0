//! In-memory filesystem.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use super::{DirEntry, FileSystem, FsError};

/// An in-memory file tree.
///
/// Directories are implied by the files placed in them; empty directories
/// are added explicitly with [`MemoryFileSystem::with_dir`].
///
/// ```
/// use pkgloader::fs::{FileSystem, MemoryFileSystem};
/// use std::path::Path;
///
/// let fs = MemoryFileSystem::new().with_file("/src/foo/foo.go", "package foo\n");
/// assert!(fs.is_dir(Path::new("/src/foo")));
/// assert_eq!(fs.read_to_string(Path::new("/src/foo/foo.go")).unwrap(), "package foo\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filesystem pre-populated with `(path, contents)` pairs.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<Path>,
        C: AsRef<[u8]>,
    {
        files
            .into_iter()
            .fold(Self::new(), |fs, (path, contents)| fs.with_file(path, contents))
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Self {
        self.insert_file(path, contents);
        self
    }

    pub fn with_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.insert_dir(path.as_ref());
        self
    }

    pub fn insert_file(&mut self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.insert_dir(parent);
        }
        self.files
            .insert(path.to_path_buf(), contents.as_ref().to_vec());
    }

    fn insert_dir(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() || !self.dirs.insert(ancestor.to_path_buf()) {
                break;
            }
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        if !self.dirs.contains(path) {
            if self.files.contains_key(path) {
                return Err(FsError::NotADirectory(path.to_path_buf()));
            }
            return Err(FsError::NotFound(path.to_path_buf()));
        }

        let children = |p: &PathBuf| {
            (p.parent() == Some(path))
                .then(|| p.file_name())
                .flatten()
                .map(|n| n.to_string_lossy().into_owned())
        };

        let mut entries: Vec<DirEntry> = self
            .dirs
            .iter()
            .filter_map(|d| children(d).map(DirEntry::dir))
            .chain(self.files.keys().filter_map(|f| children(f).map(DirEntry::file)))
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError> {
        self.files
            .get(path)
            .map(|contents| Box::new(Cursor::new(contents.clone())) as Box<dyn Read + Send>)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }
}
