//! # pkgloader
//!
//! Concurrent, dependency-aware loader for Go package graphs.
//!
//! pkgloader discovers the packages under a directory tree, parses their
//! sources with tree-sitter, resolves their imports into a dependency graph
//! and drives every package through metadata, parsing and declaration-level
//! analysis on a bounded worker pool.
//!
//! ## Key Features
//!
//! - **Concurrent**: packages load in parallel; a package only waits for the
//!   dependencies it actually imports
//! - **Incremental discovery**: imports found while parsing pull their
//!   packages into the same load
//! - **Configuration-aware**: file-name suffixes, `//go:build` lines and cgo
//!   are evaluated for one GOOS/GOARCH/tags combination
//! - **Fault tolerant**: broken files, unresolved imports and import cycles
//!   are logged and skipped
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pkgloader::{Loader, LoaderConfig};
//!
//! let loader = Loader::new(LoaderConfig::default())?;
//! loader.load_directory("./internal/server")?;
//! loader.wait();
//!
//! let fields = loader.struct_fields("./internal/server", "Options")?;
//! // Returns: name + type descriptor of every field, in declaration order
//! # Ok::<(), pkgloader::LoaderError>(())
//! ```

pub mod build;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs;
pub mod graph;
pub mod loader;
pub mod parser;
pub mod toolchain;
pub mod unit;

// Re-exports for convenience
pub use config::{BuildConfig, LoaderConfig, LogLevel};
pub use error::{LoaderError, Result};
pub use loader::{Loader, LoaderBuilder};

// Graph re-exports
pub use graph::{DependencyGraph, EdgeStrength, GraphError, Hash};

// Units and their artifacts
pub use unit::{AnalysisError, CompilationUnit, DeclaredType, FieldDescriptor, LoadState};

// Pluggable collaborators
pub use engine::{PhaseEvent, PhaseObserver};
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use toolchain::{GoToolchain, Preprocessor, SynthesizedFile};
