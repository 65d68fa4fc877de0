//! Loader configuration.
//!
//! A [`LoaderConfig`] is fixed when the loader is built. It can be read from
//! a TOML file:
//!
//! ```toml
//! workers = 4
//! exclude = [".*", "testdata", "generated"]
//! log_level = "verbose"
//!
//! [build]
//! goos = "linux"
//! goarch = "amd64"
//! tags = ["integration"]
//! cgo_enabled = true
//! include_tests = false
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid exclusion pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

/// Verbosity of the diagnostic sink, from quietest to loudest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Verbose,
    Debug,
}

impl LogLevel {
    /// The `tracing` filter directive for this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose => "debug",
            LogLevel::Debug => "trace",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Error
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Verbose => write!(f, "verbose"),
            LogLevel::Debug => write!(f, "debug"),
        }
    }
}

/// The single active build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub goos: String,
    pub goarch: String,
    /// Root of the standard library tree (`$GOROOT`).
    pub goroot: Option<PathBuf>,
    /// Workspace roots searched for non-relative references (`$GOPATH`).
    pub gopath: Vec<PathBuf>,
    /// Extra build tags.
    pub tags: Vec<String>,
    pub cgo_enabled: bool,
    /// Parse `_test.go` files and weakly connect their references.
    pub include_tests: bool,
}

impl BuildConfig {
    /// Configuration of the host platform, with `GOROOT` and `GOPATH` taken
    /// from the environment.
    pub fn host() -> Self {
        let goroot = std::env::var_os("GOROOT").map(PathBuf::from);
        let gopath = std::env::var_os("GOPATH")
            .map(|v| std::env::split_paths(&v).collect())
            .unwrap_or_default();

        Self {
            goos: host_goos().to_string(),
            goarch: host_goarch().to_string(),
            goroot,
            gopath,
            tags: Vec::new(),
            cgo_enabled: true,
            include_tests: false,
        }
    }

    /// Whether a build tag is satisfied by this configuration.
    pub fn matches_tag(&self, tag: &str) -> bool {
        if tag == self.goos || tag == self.goarch {
            return true;
        }
        if tag == "unix" && is_unix_goos(&self.goos) {
            return true;
        }
        if tag == "cgo" {
            return self.cgo_enabled;
        }
        self.tags.iter().any(|t| t == tag)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::host()
    }
}

/// Everything the loader needs to know up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub build: BuildConfig,
    /// Glob patterns (gitignore syntax) of directories to skip.
    pub exclude: Vec<String>,
    /// Worker threads; 0 picks the rayon default.
    pub workers: usize,
    pub log_level: LogLevel,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            build: BuildConfig::default(),
            exclude: default_exclusions(),
            workers: 0,
            log_level: LogLevel::default(),
        }
    }
}

impl LoaderConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

/// Hidden directories and `testdata` are never loaded.
pub fn default_exclusions() -> Vec<String> {
    vec![".*".to_string(), "testdata".to_string()]
}

/// Every goos value that satisfies the `unix` build tag.
const UNIX_GOOS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "hurd", "illumos", "ios", "linux",
    "netbsd", "openbsd", "solaris",
];

pub fn is_unix_goos(goos: &str) -> bool {
    UNIX_GOOS.contains(&goos)
}

pub const KNOWN_GOOS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "hurd", "illumos", "ios", "js",
    "linux", "nacl", "netbsd", "openbsd", "plan9", "solaris", "wasip1", "windows", "zos",
];

pub const KNOWN_GOARCH: &[&str] = &[
    "386", "amd64", "arm", "arm64", "loong64", "mips", "mips64", "mips64le", "mipsle", "ppc64",
    "ppc64le", "riscv64", "s390x", "sparc64", "wasm",
];

fn host_goos() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

fn host_goarch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}
