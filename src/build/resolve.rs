//! Dependency-path resolution.
//!
//! Maps a reference such as `github.com/acme/widgets` or `./internal/x`
//! to the directory that holds the referenced unit, for the active
//! configuration. Search order for non-relative references:
//!
//! ```text
//! <src>/vendor/<ref>, <src>/../vendor/<ref>, ... up to the root
//! <goroot>/src/<ref>
//! <gopath[i]>/src/<ref>
//! ```

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::BuildConfig;
use crate::fs::{normalize, FileSystem};
use crate::parser::is_pseudo_package;

/// Name of the directory holding vendored dependencies.
pub const VENDOR_DIR: &str = "vendor";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("empty reference")]
    Empty,

    #[error("'{0}' is provided by the toolchain and has no directory")]
    PseudoPackage(String),

    #[error("cannot find '{reference}' in any of:\n\t{}", format_candidates(.searched))]
    NotFound {
        reference: String,
        searched: Vec<PathBuf>,
    },
}

fn format_candidates(searched: &[PathBuf]) -> String {
    searched
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n\t")
}

fn is_relative_reference(reference: &str) -> bool {
    reference == "."
        || reference == ".."
        || reference.starts_with("./")
        || reference.starts_with("../")
}

/// Ordered list of directories a reference may live in.
pub fn candidates(config: &BuildConfig, reference: &str, src_dir: &Path) -> Vec<PathBuf> {
    if is_relative_reference(reference) {
        return vec![normalize(&src_dir.join(reference))];
    }

    let mut dirs: Vec<PathBuf> = src_dir
        .ancestors()
        .filter(|dir| dir.file_name().map_or(true, |name| name != VENDOR_DIR))
        .map(|dir| dir.join(VENDOR_DIR).join(reference))
        .collect();
    if let Some(goroot) = &config.goroot {
        dirs.push(goroot.join("src").join(reference));
    }
    for root in &config.gopath {
        dirs.push(root.join("src").join(reference));
    }
    dirs
}

/// Resolve a reference made from `src_dir` to a directory.
pub fn resolve(
    fs: &dyn FileSystem,
    config: &BuildConfig,
    reference: &str,
    src_dir: &Path,
) -> Result<PathBuf, ResolveError> {
    if reference.is_empty() {
        return Err(ResolveError::Empty);
    }
    if is_pseudo_package(reference) {
        return Err(ResolveError::PseudoPackage(reference.to_string()));
    }

    let searched = candidates(config, reference, src_dir);
    match searched.iter().find(|dir| fs.is_dir(dir)) {
        Some(dir) => Ok(normalize(dir)),
        None => Err(ResolveError::NotFound {
            reference: reference.to_string(),
            searched,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;

    fn config() -> BuildConfig {
        BuildConfig {
            goos: "linux".to_string(),
            goarch: "amd64".to_string(),
            goroot: Some(PathBuf::from("/goroot")),
            gopath: vec![PathBuf::from("/gopath")],
            tags: Vec::new(),
            cgo_enabled: true,
            include_tests: false,
        }
    }

    fn fs() -> MemoryFileSystem {
        MemoryFileSystem::with_files([
            ("/goroot/src/fmt/print.go", "package fmt"),
            ("/gopath/src/example.com/app/main.go", "package main"),
            ("/gopath/src/example.com/app/util/util.go", "package util"),
            ("/gopath/src/example.com/lib/lib.go", "package lib"),
            ("/gopath/src/example.com/app/vendor/example.com/lib/lib.go", "package lib"),
        ])
    }

    #[test]
    fn test_resolve_relative() {
        let dir = resolve(&fs(), &config(), "./util", Path::new("/gopath/src/example.com/app"));
        assert_eq!(dir, Ok(PathBuf::from("/gopath/src/example.com/app/util")));

        let util = Path::new("/gopath/src/example.com/app/util");
        let dir = resolve(&fs(), &config(), "../../app", util);
        assert_eq!(dir, Ok(PathBuf::from("/gopath/src/example.com/app")));
        assert_eq!(resolve(&fs(), &config(), "..", util), dir);

        // `../app` from `app/util` names `app/app`.
        assert!(matches!(
            resolve(&fs(), &config(), "../app", util),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_goroot_and_gopath() {
        let fs = fs();
        let src = Path::new("/gopath/src/example.com/app/util");
        assert_eq!(
            resolve(&fs, &config(), "fmt", src),
            Ok(PathBuf::from("/goroot/src/fmt"))
        );
        assert_eq!(
            resolve(&fs, &config(), "example.com/app", src),
            Ok(PathBuf::from("/gopath/src/example.com/app"))
        );
    }

    #[test]
    fn test_vendor_wins_over_gopath() {
        let dir = resolve(
            &fs(),
            &config(),
            "example.com/lib",
            Path::new("/gopath/src/example.com/app/util"),
        );
        assert_eq!(
            dir,
            Ok(PathBuf::from("/gopath/src/example.com/app/vendor/example.com/lib"))
        );
    }

    #[test]
    fn test_resolve_errors() {
        let fs = fs();
        let src = Path::new("/gopath/src/example.com/app");
        assert_eq!(resolve(&fs, &config(), "", src), Err(ResolveError::Empty));
        assert_eq!(
            resolve(&fs, &config(), "unsafe", src),
            Err(ResolveError::PseudoPackage("unsafe".to_string()))
        );
        assert!(matches!(
            resolve(&fs, &config(), "example.com/missing", src),
            Err(ResolveError::NotFound { .. })
        ));
    }
}
