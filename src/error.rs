//! Error types for pkgloader.
//!
//! Only a handful of conditions are hard errors for the caller; everything
//! that goes wrong while advancing individual units is logged and skipped.

use std::path::PathBuf;

use thiserror::Error;

use crate::build::ResolveError;
use crate::config::ConfigError;
use crate::fs::FsError;
use crate::graph::{GraphError, Hash};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LoaderError>;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("argument '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("could not get absolute path for '{}': {source}", .path.display())]
    AbsolutePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("loader does not have an entry for {} with tags {tags}", .path.display())]
    UnitNotFound { path: PathBuf, tags: String },

    #[error("no unit with hash {0} in the dependency graph")]
    UnknownHash(Hash),

    #[error("failed to find import {reference}: {source}")]
    Resolve {
        reference: String,
        #[source]
        source: ResolveError,
    },

    #[error("package at '{}' imports itself via '{reference}'", .path.display())]
    SelfReference { path: PathBuf, reference: String },

    #[error("failed to locate struct '{type_name}' within package '{package}'")]
    TypeNotFound { package: String, type_name: String },

    #[error("found identifier '{type_name}', underlying type '{descriptor}' is not a struct")]
    NotAStruct {
        type_name: String,
        descriptor: String,
    },

    #[error("package at '{}' has not finished loading", .0.display())]
    NotLoaded(PathBuf),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] std::io::Error),
}
