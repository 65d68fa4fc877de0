//! Host filesystem, read-only.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;

use super::{DirEntry, FileSystem, FsError};

/// The native filesystem. Only read operations are exposed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl OsFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FsError {
    if source.kind() == ErrorKind::NotFound {
        FsError::NotFound(path.to_path_buf())
    } else {
        FsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl FileSystem for OsFileSystem {
    fn is_dir(&self, path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| io_error(path, e))? {
            let entry = entry.map_err(|e| io_error(path, e))?;
            // Follow symlinks the way a stat would.
            let is_dir = fs::metadata(entry.path())
                .map(|m| m.is_dir())
                .unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError> {
        let file = fs::File::open(path).map_err(|e| io_error(path, e))?;
        Ok(Box::new(file))
    }
}
