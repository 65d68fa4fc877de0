//! Foreign-interop preprocessing.
//!
//! Files importing `"C"` are not plain Go: the toolchain rewrites them
//! (`go tool cgo`) into ordinary sources before they can be parsed. The
//! loader only sees this through the [`Preprocessor`] trait, so tests and
//! embedders can swap the toolchain out.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

use crate::config::BuildConfig;

/// Name of the type-definition file produced for a unit.
pub const GOTYPES_FILE: &str = "_cgo_gotypes.go";

/// Display name of [`GOTYPES_FILE`].
pub const GOTYPES_DISPLAY: &str = "C";

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to create working directory: {0}")]
    WorkDir(#[source] std::io::Error),

    #[error("failed to run {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cgo failed ({status}): {stderr}")]
    Failed { status: String, stderr: String },

    #[error("failed to read generated file {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A Go source produced by preprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedFile {
    /// Name the file is registered under, e.g. `foo.cgo1.go`.
    pub name: String,
    /// Name positions are reported under, e.g. `foo.go` or `C`.
    pub display_name: String,
    pub source: String,
}

/// Turns the foreign-interop files of a unit into parseable sources.
pub trait Preprocessor: Send + Sync {
    /// `files` are bare names relative to `unit_dir`.
    fn preprocess(
        &self,
        unit_dir: &Path,
        files: &[String],
        config: &BuildConfig,
    ) -> Result<Vec<SynthesizedFile>, PreprocessError>;
}

/// The Go toolchain on the host.
#[derive(Debug, Clone, Default)]
pub struct GoToolchain {
    binary: Option<PathBuf>,
}

impl GoToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit `go` binary instead of looking one up.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }

    fn program(&self, config: &BuildConfig) -> PathBuf {
        if let Some(binary) = &self.binary {
            return binary.clone();
        }
        config
            .goroot
            .as_ref()
            .map(|root| root.join("bin").join("go"))
            .filter(|go| go.is_file())
            .unwrap_or_else(|| PathBuf::from("go"))
    }
}

/// `foo.go` becomes `foo.cgo1.go`.
fn cgo1_name(file: &str) -> String {
    let stem = file.strip_suffix(".go").unwrap_or(file);
    format!("{}.cgo1.go", stem.replace(|c: char| matches!(c, '/' | '\\' | ':'), "_"))
}

fn read_output(objdir: &Path, name: &str) -> Result<String, PreprocessError> {
    let path = objdir.join(name);
    std::fs::read_to_string(&path).map_err(|source| PreprocessError::Output { path, source })
}

impl Preprocessor for GoToolchain {
    fn preprocess(
        &self,
        unit_dir: &Path,
        files: &[String],
        config: &BuildConfig,
    ) -> Result<Vec<SynthesizedFile>, PreprocessError> {
        let objdir = tempfile::Builder::new()
            .prefix("pkgloader-cgo-")
            .tempdir()
            .map_err(PreprocessError::WorkDir)?;
        let program = self.program(config);

        debug!(unit = %unit_dir.display(), files = files.len(), "running cgo");
        let output = Command::new(&program)
            .args(["tool", "cgo", "-objdir"])
            .arg(objdir.path())
            .arg("--")
            .arg("-I")
            .arg(objdir.path())
            .args(files)
            .current_dir(unit_dir)
            .env("GOOS", &config.goos)
            .env("GOARCH", &config.goarch)
            .env("CGO_ENABLED", "1")
            .output()
            .map_err(|source| PreprocessError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(PreprocessError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut synthesized = vec![SynthesizedFile {
            name: GOTYPES_FILE.to_string(),
            display_name: GOTYPES_DISPLAY.to_string(),
            source: read_output(objdir.path(), GOTYPES_FILE)?,
        }];
        for file in files {
            let name = cgo1_name(file);
            synthesized.push(SynthesizedFile {
                source: read_output(objdir.path(), &name)?,
                name,
                display_name: file.clone(),
            });
        }
        Ok(synthesized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cgo1_name() {
        assert_eq!(cgo1_name("native.go"), "native.cgo1.go");
        assert_eq!(cgo1_name("sub/x.go"), "sub_x.cgo1.go");
    }

    #[test]
    fn test_program_lookup() {
        let config = BuildConfig {
            goroot: Some(PathBuf::from("/nonexistent/goroot")),
            ..BuildConfig::host()
        };
        assert_eq!(GoToolchain::new().program(&config), PathBuf::from("go"));
        assert_eq!(
            GoToolchain::with_binary("/opt/go/bin/go").program(&config),
            PathBuf::from("/opt/go/bin/go")
        );
    }

    #[test]
    fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = GoToolchain::with_binary(dir.path().join("no-such-go"));
        let result = toolchain.preprocess(
            dir.path(),
            &["native.go".to_string()],
            &BuildConfig::host(),
        );
        assert!(matches!(result, Err(PreprocessError::Spawn { .. })));
    }
}
