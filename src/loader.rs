//! The loader: root coordinator of a load.
//!
//! Walks a directory tree, registers one unit per directory, hands every
//! new unit to the engine and signals completion once all of them are
//! done.
//!
//! ```no_run
//! use pkgloader::{Loader, LoaderConfig};
//!
//! let loader = Loader::new(LoaderConfig::default())?;
//! loader.load_directory("./pkg/server")?;
//! loader.wait();
//!
//! for field in loader.struct_fields("./pkg/server", "Options")? {
//!     println!("{} {}", field.name, field.type_descriptor);
//! }
//! # Ok::<(), pkgloader::LoaderError>(())
//! ```

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::build::{self, resolve::VENDOR_DIR};
use crate::config::{BuildConfig, ConfigError, LoaderConfig};
use crate::engine::{self, Engine, PhaseEvent, PhaseObserver};
use crate::error::{LoaderError, Result};
use crate::fs::{normalize, FileSystem, OsFileSystem};
use crate::graph::{DependencyGraph, EdgeStrength, Hash, Keyed};
use crate::toolchain::{GoToolchain, Preprocessor};
use crate::unit::{AnalysisError, CompilationUnit, FieldDescriptor, LoadState};

/// State shared between the loader handle and the engine.
pub(crate) struct LoaderInner {
    pub(crate) config: LoaderConfig,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) preprocessor: Arc<dyn Preprocessor>,
    observer: Option<Arc<dyn PhaseObserver>>,
    pub(crate) graph: DependencyGraph<CompilationUnit>,
    pub(crate) engine: Engine,
    start_dir: Mutex<Option<PathBuf>>,
    /// Every unit this loader drives, true once done.
    participation: Mutex<HashMap<Hash, bool>>,
    completion: Condvar,
}

impl LoaderInner {
    /// Get or create the unit for a normalized directory. A new unit is
    /// added to the participation set and queued.
    pub(crate) fn register(&self, path: PathBuf) -> Arc<CompilationUnit> {
        let hash = Hash::of_path(&path);
        let (unit, created) = self
            .graph
            .ensure(hash, || CompilationUnit::new(path.clone()));
        if created {
            debug!(unit = %path.display(), %hash, "queued");
            self.participation.lock().entry(hash).or_insert(false);
            self.engine.submit(hash);
        }
        unit
    }

    pub(crate) fn mark_done(&self, hash: Hash) {
        let mut participation = self.participation.lock();
        participation.insert(hash, true);
        if participation.values().all(|done| *done) {
            debug!(units = participation.len(), "all units are done");
            self.completion.notify_all();
        }
    }

    pub(crate) fn observe(&self, unit: &Path, event: PhaseEvent) {
        if let Some(observer) = &self.observer {
            observer.on_phase(unit, event);
        }
    }

    /// Directory a reference made by `unit` points to.
    pub(crate) fn find_dependency_path(
        &self,
        unit: &CompilationUnit,
        reference: &str,
    ) -> Result<PathBuf> {
        let path = build::resolve(self.fs.as_ref(), &self.config.build, reference, unit.path())
            .map_err(|source| LoaderError::Resolve {
                reference: reference.to_string(),
                source,
            })?;
        if path == unit.path() {
            return Err(LoaderError::SelfReference {
                path,
                reference: reference.to_string(),
            });
        }
        Ok(path)
    }

    /// Report an analysis error against the unit and file it came from.
    pub(crate) fn handle_analysis_error(&self, err: &AnalysisError) {
        let Some(dir) = err.file.parent() else {
            error!(error = %err, "analysis error without a unit");
            return;
        };
        let Some(unit) = self.graph.find(Hash::of_path(dir)) else {
            error!(error = %err, "analysis error in unknown unit {}", dir.display());
            return;
        };
        match unit.file_for_display(&err.file) {
            Some(file) => error!(
                unit = %dir.display(),
                %file,
                position = %err.position,
                "{}",
                err.message
            ),
            None => error!(unit = %dir.display(), error = %err, "analysis error in unknown file"),
        }
    }

    /// Register every directory under `root`, skipping exclusions. Patterns
    /// are matched relative to `root`.
    fn walk(&self, root: &Path) -> Result<()> {
        let exclusions = compile_exclusions(&self.config.exclude, root)?;
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            self.register(dir.clone());

            let entries = match self.fs.read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };
            // Reversed so subdirectories are visited in name order.
            for entry in entries.into_iter().rev().filter(|e| e.is_dir) {
                let child = dir.join(&entry.name);
                if is_excluded(&exclusions, &child) {
                    debug!(dir = %child.display(), "excluded");
                    continue;
                }
                pending.push(child);
            }
        }
        Ok(())
    }

    fn tags(&self) -> String {
        let build = &self.config.build;
        let goroot = build
            .goroot
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        std::iter::once(goroot)
            .chain([build.goarch.clone(), build.goos.clone()])
            .chain(build.tags.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Builder for a [`Loader`].
pub struct LoaderBuilder {
    config: LoaderConfig,
    fs: Arc<dyn FileSystem>,
    preprocessor: Arc<dyn Preprocessor>,
    observer: Option<Arc<dyn PhaseObserver>>,
}

impl LoaderBuilder {
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
            fs: Arc::new(OsFileSystem::new()),
            preprocessor: Arc::new(GoToolchain::new()),
            observer: None,
        }
    }

    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build_config(mut self, build: BuildConfig) -> Self {
        self.config.build = build;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn filesystem(mut self, fs: impl FileSystem + 'static) -> Self {
        self.fs = Arc::new(fs);
        self
    }

    pub fn preprocessor(mut self, preprocessor: impl Preprocessor + 'static) -> Self {
        self.preprocessor = Arc::new(preprocessor);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PhaseObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Loader> {
        compile_exclusions(&self.config.exclude, Path::new("/"))?;
        let pool = engine::worker_pool(self.config.workers)?;
        let (engine, dispatch) = Engine::channel();

        let inner = Arc::new(LoaderInner {
            config: self.config,
            fs: self.fs,
            preprocessor: self.preprocessor,
            observer: self.observer,
            graph: DependencyGraph::new(),
            engine,
            start_dir: Mutex::new(None),
            participation: Mutex::new(HashMap::new()),
            completion: Condvar::new(),
        });
        inner
            .engine
            .start(dispatch, pool, Arc::downgrade(&inner))?;

        Ok(Loader { inner })
    }
}

impl Default for LoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_exclusions(
    patterns: &[String],
    root: &Path,
) -> std::result::Result<Gitignore, ConfigError> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| ConfigError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
    }
    builder.build().map_err(|e| ConfigError::Pattern {
        pattern: patterns.join(" "),
        message: e.to_string(),
    })
}

fn is_excluded(exclusions: &Gitignore, path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == VENDOR_DIR)
        || exclusions.matched(path, true).is_ignore()
}

/// Loads the Go packages under a directory for one build configuration.
pub struct Loader {
    inner: Arc<LoaderInner>,
}

impl Loader {
    pub fn new(config: LoaderConfig) -> Result<Self> {
        LoaderBuilder::new().config(config).build()
    }

    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::new()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Queue every directory under `path` for loading. Returns once the
    /// walk is done; use [`wait`](Self::wait) for the load itself.
    pub fn load_directory(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.absolute(path.as_ref())?;
        if !self.inner.fs.is_dir(&path) {
            return Err(LoaderError::NotADirectory(path));
        }

        *self.inner.start_dir.lock() = Some(path.clone());
        let parent = path.parent().unwrap_or(&path);
        let around = compile_exclusions(&self.inner.config.exclude, parent)?;
        if is_excluded(&around, &path) {
            info!(dir = %path.display(), "start directory is excluded");
            return Ok(());
        }

        info!(dir = %path.display(), "loading directory");
        self.inner.walk(&path)
    }

    /// Block until every registered unit is done. Units discovered while
    /// waiting are waited for too.
    pub fn wait(&self) {
        let mut participation = self.inner.participation.lock();
        while !participation.values().all(|done| *done) {
            self.inner.completion.wait(&mut participation);
        }
    }

    /// Bounded [`wait`](Self::wait). Returns whether everything finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut participation = self.inner.participation.lock();
        while !participation.values().all(|done| *done) {
            if self
                .inner
                .completion
                .wait_until(&mut participation, deadline)
                .timed_out()
            {
                return participation.values().all(|done| *done);
            }
        }
        true
    }

    /// The unit for a directory.
    pub fn find_unit(&self, path: impl AsRef<Path>) -> Result<Arc<CompilationUnit>> {
        let path = self.absolute(path.as_ref())?;
        self.inner
            .graph
            .find(Hash::of_path(&path))
            .ok_or_else(|| LoaderError::UnitNotFound {
                path,
                tags: self.inner.tags(),
            })
    }

    pub fn find_unit_by_hash(&self, hash: Hash) -> Result<Arc<CompilationUnit>> {
        self.inner
            .graph
            .find(hash)
            .ok_or(LoaderError::UnknownHash(hash))
    }

    /// Resolve a reference made from `unit` to a directory.
    pub fn find_dependency_path(&self, unit: &CompilationUnit, reference: &str) -> Result<PathBuf> {
        self.inner.find_dependency_path(unit, reference)
    }

    /// Log an analysis error against its unit and file.
    pub fn handle_analysis_error(&self, err: &AnalysisError) {
        self.inner.handle_analysis_error(err);
    }

    /// Fields of a struct type declared in the unit at `path`.
    pub fn struct_fields(
        &self,
        path: impl AsRef<Path>,
        type_name: &str,
    ) -> Result<Vec<FieldDescriptor>> {
        let unit = self.find_unit(path)?;
        if unit.load_state() < LoadState::Done {
            return Err(LoaderError::NotLoaded(unit.path().to_path_buf()));
        }
        unit.struct_fields(type_name)
    }

    /// Units `unit` is connected to with the given strength.
    pub fn connected(
        &self,
        unit: &CompilationUnit,
        strength: EdgeStrength,
    ) -> Vec<Arc<CompilationUnit>> {
        self.inner
            .graph
            .dependencies(unit.hash(), strength)
            .into_iter()
            .filter_map(|hash| self.inner.graph.find(hash))
            .collect()
    }

    /// Every unit known to the loader.
    pub fn units(&self) -> Vec<Arc<CompilationUnit>> {
        let mut units = self.inner.graph.elements();
        units.sort_by(|a, b| a.path().cmp(b.path()));
        units
    }

    pub fn start_dir(&self) -> Option<PathBuf> {
        self.inner.start_dir.lock().clone()
    }

    /// Stop the engine. Units not yet done stay where they are.
    pub fn close(&self) {
        self.inner.engine.close();
    }

    fn absolute(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            return Ok(normalize(path));
        }
        let cwd = std::env::current_dir().map_err(|source| LoaderError::AbsolutePath {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(normalize(&cwd.join(path)))
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self
            .start_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        write!(f, "{} [{}]", start, self.inner.tags())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;

    fn config() -> LoaderConfig {
        LoaderConfig {
            build: BuildConfig {
                goos: "linux".to_string(),
                goarch: "amd64".to_string(),
                goroot: Some(PathBuf::from("/goroot")),
                gopath: vec![PathBuf::from("/gopath")],
                tags: vec!["integration".to_string()],
                cgo_enabled: true,
                include_tests: false,
            },
            workers: 2,
            ..LoaderConfig::default()
        }
    }

    fn loader(fs: MemoryFileSystem) -> Loader {
        Loader::builder()
            .config(config())
            .filesystem(fs)
            .build()
            .unwrap()
    }

    #[test]
    fn test_walk_skips_exclusions() {
        let fs = MemoryFileSystem::with_files([
            ("/work/app/main.go", "package main\n"),
            ("/work/app/internal/db/db.go", "package db\n"),
            ("/work/app/.git/config", ""),
            ("/work/app/testdata/bad/bad.go", "package bad\n"),
            ("/work/app/vendor/example.com/x/x.go", "package x\n"),
        ]);
        let loader = loader(fs);
        loader.load_directory("/work/app").unwrap();
        assert!(loader.wait_timeout(Duration::from_secs(10)));

        let paths: Vec<PathBuf> = loader.units().iter().map(|u| u.path().to_path_buf()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/work/app"),
                PathBuf::from("/work/app/internal"),
                PathBuf::from("/work/app/internal/db"),
            ]
        );
    }

    #[test]
    fn test_custom_exclusions() {
        let fs = MemoryFileSystem::with_files([
            ("/work/app/main.go", "package main\n"),
            ("/work/app/generated/gen.go", "package generated\n"),
        ]);
        let loader = Loader::builder()
            .config(LoaderConfig {
                exclude: vec!["generated".to_string()],
                ..config()
            })
            .filesystem(fs)
            .build()
            .unwrap();
        loader.load_directory("/work/app").unwrap();
        assert!(loader.wait_timeout(Duration::from_secs(10)));
        assert!(loader.find_unit("/work/app/generated").is_err());
    }

    #[test]
    fn test_nested_exclusion_is_relative_to_start() {
        let fs = MemoryFileSystem::with_files([
            ("/work/app/main.go", "package main\n"),
            ("/work/app/internal/gen/gen.go", "package gen\n"),
            ("/work/app/internal/db/db.go", "package db\n"),
        ]);
        let loader = Loader::builder()
            .config(LoaderConfig {
                exclude: vec!["internal/gen".to_string()],
                ..config()
            })
            .filesystem(fs)
            .build()
            .unwrap();
        loader.load_directory("/work/app").unwrap();
        assert!(loader.wait_timeout(Duration::from_secs(10)));
        assert!(loader.find_unit("/work/app/internal/db").is_ok());
        assert!(loader.find_unit("/work/app/internal/gen").is_err());
    }

    #[test]
    fn test_excluded_start_directory() {
        let fs = MemoryFileSystem::with_files([
            ("/work/app/testdata/bad.go", "package bad\n"),
            ("/work/app/vendor/x/x.go", "package x\n"),
        ]);
        let loader = loader(fs);
        loader.load_directory("/work/app/testdata").unwrap();
        loader.load_directory("/work/app/vendor").unwrap();
        assert!(loader.wait_timeout(Duration::from_secs(10)));
        assert!(loader.units().is_empty());
    }

    #[test]
    fn test_load_directory_errors() {
        let fs = MemoryFileSystem::with_files([("/work/app/main.go", "package main\n")]);
        let loader = loader(fs);
        assert!(matches!(
            loader.load_directory("/work/app/main.go"),
            Err(LoaderError::NotADirectory(_))
        ));
        assert!(matches!(
            loader.load_directory("/nowhere"),
            Err(LoaderError::NotADirectory(_))
        ));
        assert!(loader.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_find_unit_normalizes() {
        let fs = MemoryFileSystem::with_files([("/work/app/lib/lib.go", "package lib\n")]);
        let loader = loader(fs);
        loader.load_directory("/work/app").unwrap();
        assert!(loader.wait_timeout(Duration::from_secs(10)));

        let unit = loader.find_unit("/work/app/./lib/../lib").unwrap();
        assert_eq!(unit.path(), Path::new("/work/app/lib"));
        assert_eq!(unit.load_state(), LoadState::Done);
        assert!(matches!(
            loader.find_unit("/work/other"),
            Err(LoaderError::UnitNotFound { ref tags, .. }) if tags == "/goroot,amd64,linux,integration"
        ));
    }

    #[test]
    fn test_self_reference() {
        let fs = MemoryFileSystem::with_files([(
            "/gopath/src/example.com/app/main.go",
            "package main\n\nimport \"example.com/app\"\n",
        )]);
        let loader = loader(fs);
        loader.load_directory("/gopath/src/example.com/app").unwrap();
        assert!(loader.wait_timeout(Duration::from_secs(10)));

        let unit = loader.find_unit("/gopath/src/example.com/app").unwrap();
        assert!(unit.dependencies().is_empty());
        assert!(matches!(
            loader.find_dependency_path(&unit, "example.com/app"),
            Err(LoaderError::SelfReference { .. })
        ));
        assert!(matches!(
            loader.find_dependency_path(&unit, "example.com/nope"),
            Err(LoaderError::Resolve { .. })
        ));
    }

    #[test]
    fn test_display() {
        let fs = MemoryFileSystem::new().with_dir("/work/app");
        let loader = loader(fs);
        loader.load_directory("/work/app").unwrap();
        assert_eq!(
            loader.to_string(),
            "/work/app [/goroot,amd64,linux,integration]"
        );
    }

    #[test]
    fn test_invalid_exclusion_pattern() {
        let result = Loader::builder()
            .config(LoaderConfig {
                exclude: vec!["[z-a]".to_string()],
                ..config()
            })
            .filesystem(MemoryFileSystem::new())
            .build();
        assert!(matches!(
            result,
            Err(LoaderError::Config(ConfigError::Pattern { .. }))
        ));
    }
}
