//! The staged driver.
//!
//! Units advance through their states in small steps. Each step is an
//! event carrying the unit's hash: a dispatch thread pulls events off a
//! channel and runs each one on a bounded rayon pool. A step that has to
//! wait for a dependency registers a continuation on it and returns, so a
//! waiting unit never holds a worker.
//!
//! ```text
//! Queued    gather build metadata                 -> advance
//! Unloaded  discover -> connect -> await -> analyze -> advance
//! Done      mark complete, maybe signal the loader
//! ```
//!
//! A unit has at most one event in flight: the next one is only sent when
//! the current step finishes or when the continuation it registered fires.

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Weak;
use std::thread::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::build;
use crate::error::{LoaderError, Result};
use crate::graph::{EdgeStrength, Hash, Keyed};
use crate::loader::LoaderInner;
use crate::parser::{self, SourceFile};
use crate::toolchain::SynthesizedFile;
use crate::unit::{CompilationUnit, Dependency, LoadState, Readiness, Stage};

/// Milestones reported to a [`PhaseObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    MetadataGathered,
    AnalysisStarted,
    Done,
}

/// Watches units move through the pipeline.
pub trait PhaseObserver: Send + Sync {
    fn on_phase(&self, unit: &Path, event: PhaseEvent);
}

/// Receiving half of the engine, consumed by [`Engine::start`].
pub(crate) struct Dispatch {
    events: Receiver<Hash>,
    closed: Receiver<()>,
}

pub(crate) struct Engine {
    events: Sender<Hash>,
    closer: Sender<()>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub(crate) fn channel() -> (Engine, Dispatch) {
        let (events, events_rx) = channel::unbounded();
        let (closer, closed) = channel::bounded(1);
        let engine = Engine {
            events,
            closer,
            dispatcher: Mutex::new(None),
        };
        (
            engine,
            Dispatch {
                events: events_rx,
                closed,
            },
        )
    }

    /// Spawn the dispatch thread. It holds the loader weakly and stops on
    /// [`close`](Self::close) or once the loader is gone.
    pub(crate) fn start(
        &self,
        dispatch: Dispatch,
        pool: ThreadPool,
        loader: Weak<LoaderInner>,
    ) -> Result<()> {
        let handle = std::thread::Builder::new()
            .name("pkgloader-dispatch".to_string())
            .spawn(move || dispatch_loop(dispatch, pool, loader))
            .map_err(LoaderError::Spawn)?;
        *self.dispatcher.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn submit(&self, hash: Hash) {
        if self.events.send(hash).is_err() {
            trace!(%hash, "engine closed; dropping event");
        }
    }

    /// A continuation that re-submits the unit's event.
    pub(crate) fn resubmitter(&self, hash: Hash) -> impl FnOnce() + Send + 'static {
        let events = self.events.clone();
        move || {
            if events.send(hash).is_err() {
                trace!(%hash, "engine closed; dropping event");
            }
        }
    }

    /// Stop the dispatch loop. Steps already running finish; events sent
    /// afterwards are dropped.
    pub(crate) fn close(&self) {
        let _ = self.closer.try_send(());
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
    }
}

fn dispatch_loop(dispatch: Dispatch, pool: ThreadPool, loader: Weak<LoaderInner>) {
    debug!(workers = pool.current_num_threads(), "engine started");
    loop {
        select! {
            recv(dispatch.closed) -> _ => break,
            recv(dispatch.events) -> event => {
                let Ok(hash) = event else { break };
                let Some(loader) = loader.upgrade() else { break };
                pool.spawn(move || step(&loader, hash));
            }
        }
    }
    debug!("engine stopped");
}

/// Run one step for a unit.
fn step(loader: &LoaderInner, hash: Hash) {
    let Some(unit) = loader.graph.find(hash) else {
        error!(%hash, "event for a unit missing from the graph");
        return;
    };

    match unit.load_state() {
        LoadState::Queued => gather_metadata(loader, &unit),
        LoadState::Unloaded => unloaded(loader, &unit),
        LoadState::Done => loader.mark_done(hash),
    }
}

// ─── Queued ─────────────────────────────────────────────────────

fn gather_metadata(loader: &LoaderInner, unit: &CompilationUnit) {
    let dir = unit.path();
    match build::classify_sources(loader.fs.as_ref(), dir, &loader.config.build) {
        Ok(sources) => {
            if !sources.has_source() {
                debug!(unit = %dir.display(), "no buildable source files");
            }
            unit.set_sources(sources);
        }
        Err(e) => error!(unit = %dir.display(), error = %e, "failed to gather build metadata"),
    }

    loader.observe(dir, PhaseEvent::MetadataGathered);
    unit.advance();
    loader.engine.submit(unit.hash());
}

// ─── Unloaded ───────────────────────────────────────────────────

enum Flow {
    Continue,
    Suspended,
}

fn unloaded(loader: &LoaderInner, unit: &CompilationUnit) {
    loop {
        match unit.stage() {
            Stage::Discover => {
                discover(loader, unit);
                unit.set_stage(Stage::Connect { next: 0 });
            }
            Stage::Connect { next } => match connect(loader, unit, next) {
                Flow::Continue => unit.set_stage(Stage::AwaitDependencies { next: 0 }),
                Flow::Suspended => return,
            },
            Stage::AwaitDependencies { next } => match await_dependencies(loader, unit, next) {
                Flow::Continue => unit.set_stage(Stage::Analyze),
                Flow::Suspended => return,
            },
            Stage::Analyze => {
                analyze(loader, unit);
                // Observers see Done ahead of anything the transition unblocks.
                loader.observe(unit.path(), PhaseEvent::Done);
                unit.advance();
                loader.engine.submit(unit.hash());
                return;
            }
        }
    }
}

fn read_and_parse(loader: &LoaderInner, dir: &Path, name: &str) -> Option<SourceFile> {
    let path = dir.join(name);
    let source = match loader.fs.read_to_string(&path) {
        Ok(source) => source,
        Err(e) => {
            warn!(file = %path.display(), error = %e, "failed to read file");
            return None;
        }
    };
    parse(&path, name, &source)
}

fn parse(display_path: &Path, name: &str, source: &str) -> Option<SourceFile> {
    match parser::parse_file(name, display_path, source) {
        Ok(file) => {
            for e in &file.errors {
                warn!(file = %display_path.display(), position = %e.position, "{}", e.message);
            }
            Some(file)
        }
        Err(e) => {
            error!(file = %display_path.display(), error = %e, "failed to parse file");
            None
        }
    }
}

/// Parse every file of the unit and resolve what they reference.
fn discover(loader: &LoaderInner, unit: &CompilationUnit) {
    let dir = unit.path();
    let sources = unit.sources();

    for name in &sources.regular {
        if let Some(file) = read_and_parse(loader, dir, name) {
            unit.add_file(file);
        }
    }

    if !sources.foreign.is_empty() {
        match loader
            .preprocessor
            .preprocess(dir, &sources.foreign, &loader.config.build)
        {
            Ok(synthesized) => {
                for SynthesizedFile {
                    name,
                    display_name,
                    source,
                } in synthesized
                {
                    if let Some(file) = parse(&dir.join(&display_name), &name, &source) {
                        unit.add_file(file);
                    }
                }
            }
            Err(e) => error!(unit = %dir.display(), error = %e, "preprocessing failed; skipping foreign files"),
        }
    }

    if loader.config.build.include_tests {
        for name in sources.tests.iter().chain(&sources.xtests) {
            if let Some(file) = read_and_parse(loader, dir, name) {
                unit.add_test_file(file);
            }
        }
    }

    let (regular, tests) = unit.references();
    let references = regular
        .into_iter()
        .map(|r| (r, EdgeStrength::Strong))
        .chain(tests.into_iter().map(|r| (r, EdgeStrength::Weak)));

    let mut dependencies = Vec::new();
    for (reference, strength) in references {
        match loader.find_dependency_path(unit, &reference) {
            Ok(path) => {
                let dependency = loader.register(path.clone());
                trace!(unit = %dir.display(), %reference, dependency = %path.display(), %strength, "resolved");
                dependencies.push(Dependency {
                    reference,
                    hash: dependency.hash(),
                    path,
                    strength,
                });
            }
            Err(LoaderError::SelfReference { .. }) if strength == EdgeStrength::Weak => {
                trace!(unit = %dir.display(), %reference, "external test references its own unit");
            }
            Err(e) => warn!(unit = %dir.display(), error = %e, "skipping dependency"),
        }
    }
    unit.set_dependencies(dependencies);
}

/// Connect every dependency once it has its build metadata.
fn connect(loader: &LoaderInner, unit: &CompilationUnit, next: usize) -> Flow {
    let dependencies = unit.dependencies();
    for (i, dependency) in dependencies.iter().enumerate().skip(next) {
        let Some(target) = loader.graph.find(dependency.hash) else {
            error!(unit = %unit.path().display(), hash = %dependency.hash, "dependency missing from the graph");
            continue;
        };

        unit.set_stage(Stage::Connect { next: i });
        let resume = loader.engine.resubmitter(unit.hash());
        if target.when_ready(LoadState::Unloaded, resume) == Readiness::Pending {
            return Flow::Suspended;
        }

        let connected = match dependency.strength {
            EdgeStrength::Strong => loader.graph.connect(unit, &target),
            EdgeStrength::Weak => loader.graph.weak_connect(unit, &target),
        };
        if let Err(e) = connected {
            error!(
                unit = %unit.path().display(),
                dependency = %dependency.path.display(),
                error = %e,
                "dropping dependency"
            );
        }
    }
    Flow::Continue
}

/// Wait for every strongly connected dependency to be done.
fn await_dependencies(loader: &LoaderInner, unit: &CompilationUnit, next: usize) -> Flow {
    let strong = loader.graph.dependencies(unit.hash(), EdgeStrength::Strong);
    for (i, hash) in strong.iter().enumerate().skip(next) {
        let Some(target) = loader.graph.find(*hash) else {
            continue;
        };

        unit.set_stage(Stage::AwaitDependencies { next: i });
        let resume = loader.engine.resubmitter(unit.hash());
        if target.when_ready(LoadState::Done, resume) == Readiness::Pending {
            trace!(unit = %unit.path().display(), dependency = %target.path().display(), "waiting");
            return Flow::Suspended;
        }
    }
    Flow::Continue
}

fn analyze(loader: &LoaderInner, unit: &CompilationUnit) {
    loader.observe(unit.path(), PhaseEvent::AnalysisStarted);

    let strong: HashSet<Hash> = loader
        .graph
        .dependencies(unit.hash(), EdgeStrength::Strong)
        .into_iter()
        .collect();
    let mut exports = BTreeMap::new();
    for dependency in unit.dependencies() {
        if !strong.contains(&dependency.hash) {
            continue;
        }
        if let Some(target) = loader.graph.find(dependency.hash) {
            if let Some(e) = target.exports() {
                exports.insert(dependency.reference, e);
            }
        }
    }

    let errors = unit.analyze(&exports);
    debug!(unit = %unit.path().display(), errors = errors.len(), "analyzed");
    for e in &errors {
        loader.handle_analysis_error(e);
    }
}

/// Pool sized from the configuration; 0 picks the rayon default.
pub(crate) fn worker_pool(workers: usize) -> Result<ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("pkgloader-worker-{i}"))
        .build()?)
}

