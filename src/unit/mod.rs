//! Compilation units.
//!
//! A [`CompilationUnit`] is one Go package (one directory). It moves
//! through three states, strictly in order:
//!
//! ```text
//! Queued ──metadata──▶ Unloaded ──parse, connect, analyze──▶ Done
//! ```
//!
//! Every transition is broadcast to blocked waiters and fires the
//! continuations registered for it.

pub mod analysis;

pub use analysis::{Analysis, AnalysisError, DeclaredType, Exports, FieldDescriptor};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::build::SourceSet;
use crate::error::{LoaderError, Result};
use crate::graph::{EdgeStrength, Hash, Keyed};
use crate::parser::SourceFile;

/// Load state of a unit. Ordered; a unit only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LoadState {
    /// Discovered, nothing read yet.
    Queued,
    /// Build metadata gathered.
    Unloaded,
    /// Parsed, connected and analyzed.
    Done,
}

impl LoadState {
    fn next(self) -> Option<LoadState> {
        match self {
            LoadState::Queued => Some(LoadState::Unloaded),
            LoadState::Unloaded => Some(LoadState::Done),
            LoadState::Done => None,
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Queued => write!(f, "queued"),
            LoadState::Unloaded => write!(f, "unloaded"),
            LoadState::Done => write!(f, "done"),
        }
    }
}

/// Outcome of [`CompilationUnit::when_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Already there; the continuation was dropped.
    Ready,
    /// The continuation will run on the transition.
    Pending,
}

/// Callback fired once a unit reaches a state.
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// A dependency reference after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// The import path as written.
    pub reference: String,
    pub path: PathBuf,
    pub hash: Hash,
    /// Weak when the reference only occurs in test files.
    pub strength: EdgeStrength,
}

/// Resumable position inside the `Unloaded` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Discover,
    Connect { next: usize },
    AwaitDependencies { next: usize },
    Analyze,
}

struct UnitState {
    load_state: LoadState,
    stage: Stage,
    sources: SourceSet,
    /// Regular and synthesized files, by registered name.
    files: BTreeMap<String, SourceFile>,
    test_files: BTreeMap<String, SourceFile>,
    dependencies: Vec<Dependency>,
    analysis: Option<Analysis>,
    continuations: Vec<(LoadState, Continuation)>,
}

/// One Go package.
pub struct CompilationUnit {
    path: PathBuf,
    hash: Hash,
    state: Mutex<UnitState>,
    changed: Condvar,
}

impl CompilationUnit {
    /// `path` must already be absolute and normalized.
    pub fn new(path: PathBuf) -> Self {
        let hash = Hash::of_path(&path);
        Self {
            state: Mutex::new(UnitState {
                load_state: LoadState::Queued,
                stage: Stage::Discover,
                sources: SourceSet::empty(&path),
                files: BTreeMap::new(),
                test_files: BTreeMap::new(),
                dependencies: Vec::new(),
                analysis: None,
                continuations: Vec::new(),
            }),
            changed: Condvar::new(),
            path,
            hash,
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.state.lock().load_state
    }

    /// Move to the next state, wake waiters and fire the continuations
    /// that became due. Returns the new state.
    pub(crate) fn advance(&self) -> LoadState {
        let (state, due) = {
            let mut state = self.state.lock();
            if let Some(next) = state.load_state.next() {
                state.load_state = next;
            }
            let current = state.load_state;
            let (due, pending): (Vec<_>, Vec<_>) = state
                .continuations
                .drain(..)
                .partition(|(required, _)| *required <= current);
            state.continuations = pending;
            (current, due)
        };

        trace!(unit = %self.path.display(), %state, "advanced");
        self.changed.notify_all();
        for (_, continuation) in due {
            continuation();
        }
        state
    }

    /// Block until the unit is at least in `required`.
    pub fn wait_until_ready(&self, required: LoadState) {
        let mut state = self.state.lock();
        while state.load_state < required {
            self.changed.wait(&mut state);
        }
    }

    /// Bounded [`wait_until_ready`](Self::wait_until_ready). Returns
    /// whether the state was reached.
    pub fn wait_until_ready_timeout(&self, required: LoadState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.load_state < required {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.load_state >= required;
            }
        }
        true
    }

    /// Run `continuation` once the unit is at least in `required`, without
    /// blocking. When the state is already reached the continuation is
    /// dropped and the caller proceeds inline.
    pub fn when_ready<F>(&self, required: LoadState, continuation: F) -> Readiness
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.load_state >= required {
            return Readiness::Ready;
        }
        state
            .continuations
            .push((required, Box::new(continuation)));
        Readiness::Pending
    }

    /// Analyze every file known so far, replacing previous artifacts.
    /// Returns the errors found.
    pub fn analyze(&self, dependencies: &BTreeMap<String, Exports>) -> Vec<AnalysisError> {
        let mut state = self.state.lock();
        let analysis = analysis::check(
            state.sources.package.as_deref(),
            state.files.values(),
            dependencies,
        );
        let errors = analysis.errors.clone();
        state.analysis = Some(analysis);
        errors
    }

    // ─── Accessors ──────────────────────────────────────────────

    pub fn sources(&self) -> SourceSet {
        self.state.lock().sources.clone()
    }

    /// Package name from analysis, or from build metadata before that.
    pub fn package_name(&self) -> Option<String> {
        let state = self.state.lock();
        state
            .analysis
            .as_ref()
            .and_then(|a| a.package_name.clone())
            .or_else(|| state.sources.package.clone())
    }

    /// Registered names of the parsed files, test files included.
    pub fn files(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .files
            .keys()
            .chain(state.test_files.keys())
            .cloned()
            .collect()
    }

    /// Registered name of the file reported under `display_path`.
    pub fn file_for_display(&self, display_path: &Path) -> Option<String> {
        let state = self.state.lock();
        state
            .files
            .values()
            .chain(state.test_files.values())
            .find(|f| f.display_path == display_path)
            .map(|f| f.name.clone())
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        self.state.lock().dependencies.clone()
    }

    /// Import paths referenced by the registered files. Test-only
    /// references are returned separately.
    pub fn references(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        let state = self.state.lock();
        let regular: BTreeSet<String> = state
            .files
            .values()
            .flat_map(|f| f.references())
            .map(str::to_string)
            .collect();
        let tests = state
            .test_files
            .values()
            .flat_map(|f| f.references())
            .filter(|r| !regular.contains(*r))
            .map(str::to_string)
            .collect();
        (regular, tests)
    }

    pub fn analysis_errors(&self) -> Vec<AnalysisError> {
        self.state
            .lock()
            .analysis
            .as_ref()
            .map(|a| a.errors.clone())
            .unwrap_or_default()
    }

    pub fn exports(&self) -> Option<Exports> {
        self.state.lock().analysis.as_ref()?.exports()
    }

    /// The declaration of a named type.
    pub fn find_declaration(&self, type_name: &str) -> Option<DeclaredType> {
        self.state
            .lock()
            .analysis
            .as_ref()?
            .types
            .get(type_name)
            .cloned()
    }

    /// Fields of a struct type, in declaration order.
    pub fn struct_fields(&self, type_name: &str) -> Result<Vec<FieldDescriptor>> {
        let Some(declared) = self.find_declaration(type_name) else {
            return Err(LoaderError::TypeNotFound {
                package: self
                    .package_name()
                    .unwrap_or_else(|| self.path.display().to_string()),
                type_name: type_name.to_string(),
            });
        };
        declared.fields.ok_or(LoaderError::NotAStruct {
            type_name: type_name.to_string(),
            descriptor: declared.descriptor,
        })
    }

    // ─── Pipeline mutators ──────────────────────────────────────

    pub(crate) fn stage(&self) -> Stage {
        self.state.lock().stage
    }

    pub(crate) fn set_stage(&self, stage: Stage) {
        self.state.lock().stage = stage;
    }

    pub(crate) fn set_sources(&self, sources: SourceSet) {
        self.state.lock().sources = sources;
    }

    pub(crate) fn add_file(&self, file: SourceFile) {
        self.state.lock().files.insert(file.name.clone(), file);
    }

    pub(crate) fn add_test_file(&self, file: SourceFile) {
        self.state.lock().test_files.insert(file.name.clone(), file);
    }

    pub(crate) fn set_dependencies(&self, dependencies: Vec<Dependency>) {
        self.state.lock().dependencies = dependencies;
    }
}

impl Keyed for CompilationUnit {
    fn hash(&self) -> Hash {
        self.hash
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationUnit")
            .field("path", &self.path)
            .field("hash", &self.hash)
            .field("state", &self.load_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn unit_with(source: &str) -> CompilationUnit {
        let unit = CompilationUnit::new(PathBuf::from("/src/foo"));
        let file = parse_file("foo.go", Path::new("/src/foo/foo.go"), source).unwrap();
        unit.add_file(file);
        unit
    }

    #[test]
    fn test_states_are_monotonic() {
        let unit = CompilationUnit::new(PathBuf::from("/src/foo"));
        assert_eq!(unit.load_state(), LoadState::Queued);
        assert_eq!(unit.advance(), LoadState::Unloaded);
        assert_eq!(unit.advance(), LoadState::Done);
        assert_eq!(unit.advance(), LoadState::Done);
    }

    #[test]
    fn test_waiter_unblocks_at_unloaded() {
        let unit = CompilationUnit::new(PathBuf::from("/src/foo"));
        let woke = AtomicUsize::new(0);

        std::thread::scope(|s| {
            s.spawn(|| {
                unit.wait_until_ready(LoadState::Unloaded);
                woke.fetch_add(1, Ordering::SeqCst);
            });
            assert!(!unit.wait_until_ready_timeout(
                LoadState::Unloaded,
                Duration::from_millis(20)
            ));
            assert_eq!(woke.load(Ordering::SeqCst), 0);
            unit.advance();
        });

        assert_eq!(woke.load(Ordering::SeqCst), 1);
        assert!(unit.wait_until_ready_timeout(LoadState::Queued, Duration::ZERO));
    }

    #[test]
    fn test_continuations_fire_on_transition() {
        let unit = CompilationUnit::new(PathBuf::from("/src/foo"));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let readiness = unit.when_ready(LoadState::Done, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(readiness, Readiness::Pending);

        unit.advance();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        unit.advance();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert_eq!(unit.when_ready(LoadState::Done, || {}), Readiness::Ready);
    }

    #[test]
    fn test_analyze_twice_is_identical() {
        let unit = unit_with("package foo\n\ntype A struct {\n\tb Missing\n\tc other.T\n}\n");
        let first = unit.analyze(&BTreeMap::new());
        let second = unit.analyze(&BTreeMap::new());
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(unit.analysis_errors(), second);
    }

    #[test]
    fn test_struct_fields() {
        let unit = unit_with("package foo\n\ntype FooOptions struct {\n\ta string\n}\n\ntype ID int\n");
        unit.analyze(&BTreeMap::new());

        let fields = unit.struct_fields("FooOptions").unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "a");
        assert_eq!(fields[0].type_descriptor, "string");

        assert!(matches!(
            unit.struct_fields("Missing"),
            Err(LoaderError::TypeNotFound { ref package, .. }) if package == "foo"
        ));
        assert!(matches!(
            unit.struct_fields("ID"),
            Err(LoaderError::NotAStruct { ref descriptor, .. }) if descriptor == "int"
        ));
        assert_eq!(unit.find_declaration("FooOptions").unwrap().file, "foo.go");
    }

    #[test]
    fn test_references_split_test_only_imports() {
        let unit = unit_with("package foo\n\nimport (\n\t\"fmt\"\n\t\"C\"\n)\n");
        let test = parse_file(
            "foo_test.go",
            Path::new("/src/foo/foo_test.go"),
            "package foo\n\nimport (\n\t\"fmt\"\n\t\"testing\"\n)\n",
        )
        .unwrap();
        unit.add_test_file(test);

        let (regular, tests) = unit.references();
        assert_eq!(regular.into_iter().collect::<Vec<_>>(), vec!["fmt"]);
        assert_eq!(tests.into_iter().collect::<Vec<_>>(), vec!["testing"]);
        assert_eq!(unit.files(), vec!["foo.go", "foo_test.go"]);
        assert_eq!(
            unit.file_for_display(Path::new("/src/foo/foo_test.go")).as_deref(),
            Some("foo_test.go")
        );
    }
}
