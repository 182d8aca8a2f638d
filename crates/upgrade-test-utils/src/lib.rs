//! Testing utilities for the upgrade workspace
//!
//! Shared test helpers and fixtures:
//! - [`ScriptedStep`]: a step whose initialize/apply outcomes are scripted
//! - [`StepCalls`]: call counters observable after the step is moved into a tree
//! - [`VisitLog`]: shared, ordered record of step calls across many steps
//! - [`ProjectFixture`]: temporary directory populated with project files

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use upgrade_step::{
    CancellationToken, StatusResult, StepError, StepId, UpgradeContext, UpgradeStep,
};

/// Scripted outcome of one initialize or apply call
#[derive(Debug, Clone)]
pub enum Scripted {
    Result(StatusResult),
    Error(String),
    Cancelled,
}

impl Scripted {
    fn into_outcome(self) -> Result<StatusResult, StepError> {
        match self {
            Self::Result(result) => Ok(result),
            Self::Error(message) => Err(StepError::failed(message)),
            Self::Cancelled => Err(StepError::Cancelled),
        }
    }
}

/// Call counters shared with a [`ScriptedStep`]
#[derive(Debug, Clone, Default)]
pub struct StepCalls {
    init: Arc<AtomicUsize>,
    apply: Arc<AtomicUsize>,
    reset: Arc<AtomicUsize>,
}

impl StepCalls {
    pub fn init_calls(&self) -> usize {
        self.init.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset.load(Ordering::SeqCst)
    }
}

/// Ordered record of `init:<id>`, `apply:<id>` and `reset:<id>` entries
#[derive(Debug, Clone, Default)]
pub struct VisitLog(Arc<Mutex<Vec<String>>>);

impl VisitLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Ids of applied steps in apply order
    pub fn applied(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|entry| entry.strip_prefix("apply:"))
            .map(str::to_string)
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

type ApplyHook = Arc<dyn Fn(&mut UpgradeContext) + Send + Sync>;

/// Step with scripted outcomes
///
/// Unless scripted otherwise, initialize reports `Incomplete` and apply
/// reports `Complete`. Queued outcomes are consumed first; the fallback is
/// used once the queue is empty.
pub struct ScriptedStep {
    id: String,
    title: String,
    depends_on: Vec<StepId>,
    applicable: bool,
    init_queue: VecDeque<Scripted>,
    init_fallback: Scripted,
    apply_queue: VecDeque<Scripted>,
    apply_fallback: Scripted,
    on_apply: Option<ApplyHook>,
    log: Option<VisitLog>,
    calls: StepCalls,
}

impl ScriptedStep {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            depends_on: Vec::new(),
            applicable: true,
            init_queue: VecDeque::new(),
            init_fallback: Scripted::Result(StatusResult::incomplete(
                "Pending",
                upgrade_step::BuildBreakRisk::Low,
            )),
            apply_queue: VecDeque::new(),
            apply_fallback: Scripted::Result(StatusResult::complete("Applied")),
            on_apply: None,
            log: None,
            calls: StepCalls::default(),
        }
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Dependency declared by the behaviour itself
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<StepId>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    #[must_use]
    pub fn applicable(mut self, applicable: bool) -> Self {
        self.applicable = applicable;
        self
    }

    /// Every initialize returns `result`
    #[must_use]
    pub fn initializes_to(self, result: StatusResult) -> Self {
        self.initializes_with(Scripted::Result(result))
    }

    /// Every initialize produces `outcome`
    #[must_use]
    pub fn initializes_with(mut self, outcome: Scripted) -> Self {
        self.init_fallback = outcome;
        self
    }

    /// Queue initialize outcomes ahead of the fallback
    #[must_use]
    pub fn initializes(mut self, outcomes: impl IntoIterator<Item = Scripted>) -> Self {
        self.init_queue.extend(outcomes);
        self
    }

    /// Queue apply outcomes ahead of the fallback
    #[must_use]
    pub fn applies(mut self, outcomes: impl IntoIterator<Item = Scripted>) -> Self {
        self.apply_queue.extend(outcomes);
        self
    }

    /// Every apply that is not queued produces `outcome`
    #[must_use]
    pub fn applies_with(mut self, outcome: Scripted) -> Self {
        self.apply_fallback = outcome;
        self
    }

    /// Run `hook` against the context on every apply
    #[must_use]
    pub fn on_apply(mut self, hook: impl Fn(&mut UpgradeContext) + Send + Sync + 'static) -> Self {
        self.on_apply = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: &VisitLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    pub fn calls(&self) -> StepCalls {
        self.calls.clone()
    }

    fn record(&self, action: &str) {
        if let Some(log) = &self.log {
            log.record(format!("{action}:{}", self.id));
        }
    }
}

#[async_trait]
impl UpgradeStep for ScriptedStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn depends_on(&self) -> Vec<StepId> {
        self.depends_on.clone()
    }

    fn is_applicable(&self, _context: &UpgradeContext) -> bool {
        self.applicable
    }

    async fn initialize(
        &mut self,
        _context: &mut UpgradeContext,
        _cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        self.calls.init.fetch_add(1, Ordering::SeqCst);
        self.record("init");
        self.init_queue
            .pop_front()
            .unwrap_or_else(|| self.init_fallback.clone())
            .into_outcome()
    }

    async fn apply(
        &mut self,
        context: &mut UpgradeContext,
        _cancel: &CancellationToken,
    ) -> Result<StatusResult, StepError> {
        self.calls.apply.fetch_add(1, Ordering::SeqCst);
        self.record("apply");
        if let Some(hook) = &self.on_apply {
            hook(context);
        }
        self.apply_queue
            .pop_front()
            .unwrap_or_else(|| self.apply_fallback.clone())
            .into_outcome()
    }

    fn reset(&mut self) {
        self.calls.reset.fetch_add(1, Ordering::SeqCst);
        self.record("reset");
    }
}

/// Temporary directory holding project files
pub struct ProjectFixture {
    dir: TempDir,
}

impl ProjectFixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    /// Create a file (and its parent directories) relative to the fixture root
    #[must_use]
    pub fn with_file(self, relative: &str, contents: &str) -> Self {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture directory");
        }
        fs::write(&path, contents).expect("write fixture file");
        self
    }

    /// Create an empty project file
    #[must_use]
    pub fn with_project(self, relative: &str) -> Self {
        self.with_file(relative, "<Project />")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }
}

impl Default for ProjectFixture {
    fn default() -> Self {
        Self::new()
    }
}
