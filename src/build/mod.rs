//! Build metadata for one active configuration.
//!
//! Decides which files of a directory belong to its compilation unit
//! ([`classify_sources`]) and where a dependency reference points
//! ([`resolve::resolve`]).

pub mod constraint;
pub mod header;
pub mod resolve;

pub use resolve::{resolve, ResolveError};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{trace, warn};

use crate::config::BuildConfig;
use crate::fs::{FileSystem, FsError};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("found packages {} in {}", .names.join(", "), .dir.display())]
    MultiplePackages { dir: PathBuf, names: Vec<String> },
}

/// The files of one directory, classified for the active configuration.
///
/// All lists hold bare file names, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSet {
    pub dir: PathBuf,
    /// Package name declared by the regular files.
    pub package: Option<String>,
    pub regular: Vec<String>,
    /// Files importing `"C"`; they need toolchain preprocessing.
    pub foreign: Vec<String>,
    /// `_test.go` files of the same package.
    pub tests: Vec<String>,
    /// `_test.go` files of the `<package>_test` package.
    pub xtests: Vec<String>,
    /// Go files excluded by the configuration.
    pub ignored: Vec<String>,
}

impl SourceSet {
    pub fn empty(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            ..Self::default()
        }
    }

    /// Whether the unit has any non-test source.
    pub fn has_source(&self) -> bool {
        !self.regular.is_empty() || !self.foreign.is_empty()
    }
}

fn is_candidate(name: &str) -> bool {
    name.ends_with(".go") && !name.starts_with('_') && !name.starts_with('.')
}

fn constraints_hold(config: &BuildConfig, header: &header::Header, path: &Path) -> bool {
    if let Some(expr) = &header.go_build {
        return match constraint::eval_expr(config, expr) {
            Ok(value) => value,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "ignoring file with invalid //go:build line");
                false
            }
        };
    }
    header
        .plus_build
        .iter()
        .all(|line| constraint::eval_plus_build(config, line))
}

/// Classify the Go files of `dir` for `config`.
pub fn classify_sources(
    fs: &dyn FileSystem,
    dir: &Path,
    config: &BuildConfig,
) -> Result<SourceSet, MetadataError> {
    let mut set = SourceSet::empty(dir);
    let mut packages: Vec<String> = Vec::new();

    for entry in fs.read_dir(dir)? {
        if entry.is_dir || !is_candidate(&entry.name) {
            continue;
        }
        let name = entry.name;
        let path = dir.join(&name);

        if !constraint::matches_file_name(config, &name) {
            trace!(file = %path.display(), "excluded by file name");
            set.ignored.push(name);
            continue;
        }

        let source = match fs.read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "cannot read source file");
                set.ignored.push(name);
                continue;
            }
        };
        let header = header::scan(&source);

        if !constraints_hold(config, &header, &path) {
            trace!(file = %path.display(), "excluded by build constraint");
            set.ignored.push(name);
            continue;
        }
        if header.imports_c && !config.cgo_enabled {
            trace!(file = %path.display(), "excluded: cgo disabled");
            set.ignored.push(name);
            continue;
        }
        let Some(package) = header.package else {
            warn!(file = %path.display(), "missing package clause");
            set.ignored.push(name);
            continue;
        };

        if name.ends_with("_test.go") {
            if package.ends_with("_test") {
                set.xtests.push(name);
            } else {
                set.tests.push(name);
            }
            continue;
        }

        if !packages.contains(&package) {
            packages.push(package);
        }
        if header.imports_c {
            set.foreign.push(name);
        } else {
            set.regular.push(name);
        }
    }

    if packages.len() > 1 {
        return Err(MetadataError::MultiplePackages {
            dir: dir.to_path_buf(),
            names: packages,
        });
    }
    set.package = packages.pop();
    Ok(set)
}
