//! Dependency-aware lifecycle control.
//!
//! A container never starts before every container it links to is
//! running. Batch starts run independent branches concurrently on scoped
//! threads, bounded by `max_workers`; with one worker the order matches a
//! depth-first walk of the dependency graph.
//!
//! Stop and kill do not cascade: stopping a dependency leaves its
//! dependents running.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use berth_common::config::BerthConfig;
use berth_common::constants::DEFAULT_MAX_WORKERS;
use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, LifecycleState};
use berth_compose::spec::ContainerSpec;

use crate::engine::ContainerEngine;
use crate::event::{ContainerEvent, EventSink};
use crate::materialize::{create_request, resolve_image};
use crate::recover::state_from_inspect;
use crate::registry::Registry;

/// Cooperative cancellation for batch operations.
///
/// Cancelling prevents new engine calls; calls already issued complete
/// and are not rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-container outcome of a batch operation.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Labels the operation succeeded on, in completion order.
    pub completed: Vec<String>,
    /// Labels the operation was attempted on and failed.
    pub failed: Vec<(String, BerthError)>,
    /// Labels never attempted because a dependency failed or the batch
    /// was cancelled.
    pub skipped: Vec<(String, BerthError)>,
}

impl BatchReport {
    /// Returns `true` if nothing failed or was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Converts the report into the completed labels, or the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failure, or the first skip if nothing failed.
    pub fn into_result(self) -> Result<Vec<String>> {
        match self.failed.into_iter().chain(self.skipped).next() {
            Some((_, error)) => Err(error),
            None => Ok(self.completed),
        }
    }
}

/// Sequences engine calls for the containers of one registry.
pub struct Controller<'a> {
    registry: &'a Registry,
    engine: &'a dyn ContainerEngine,
    working_dir: PathBuf,
    max_workers: usize,
    events: EventSink,
    cancel: CancelToken,
}

impl std::fmt::Debug for Controller<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("project", &self.registry.project())
            .field("working_dir", &self.working_dir)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl<'a> Controller<'a> {
    /// Creates a controller resolving relative paths against the process
    /// working directory.
    #[must_use]
    pub fn new(registry: &'a Registry, engine: &'a dyn ContainerEngine) -> Self {
        Self {
            registry,
            engine,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_workers: DEFAULT_MAX_WORKERS,
            events: EventSink::disabled(),
            cancel: CancelToken::new(),
        }
    }

    /// Applies the worker limit and working directory of `config`.
    #[must_use]
    pub fn with_config(mut self, config: &BerthConfig) -> Self {
        self.max_workers = config.max_workers.max(1);
        if let Some(dir) = &config.working_dir {
            self.working_dir.clone_from(dir);
        }
        self
    }

    /// Sets the directory relative host paths are resolved against.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Sets the number of containers started concurrently in a batch.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Sends lifecycle events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Observes `cancel` before every engine call.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the directory relative host paths are resolved against.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Starts `label`, first starting every dependency that is not running.
    ///
    /// Issues no engine calls if the container is already running.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while starting the container or one
    /// of its dependencies.
    pub fn start(&self, label: &str) -> Result<()> {
        let mut visiting = HashSet::new();
        self.start_recursive(label, &mut visiting)
    }

    fn start_recursive(&self, label: &str, visiting: &mut HashSet<String>) -> Result<()> {
        if self.current_state(label)? == LifecycleState::Running {
            return Ok(());
        }
        if !visiting.insert(label.to_string()) {
            return Err(BerthError::DependencyCycle {
                label: label.to_string(),
            });
        }
        for dependency in self.registry.dependencies(label) {
            if self.registry.state(&dependency.label) != Some(LifecycleState::Running) {
                self.start_recursive(&dependency.label, visiting)?;
            }
        }
        self.launch(label)
    }

    /// Stops `label` if it is running. Dependents are not stopped.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] for an unknown label or the
    /// engine's error.
    pub fn stop(&self, label: &str) -> Result<()> {
        self.halt(label, "stop", |id| self.engine.stop_container(id))
    }

    /// Kills `label` if it is running. Dependents are not killed.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] for an unknown label or the
    /// engine's error.
    pub fn kill(&self, label: &str) -> Result<()> {
        self.halt(label, "kill", |id| self.engine.kill_container(id))
    }

    /// Force-removes the engine container, if any, and unregisters `label`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] for an unknown label or the
    /// engine's error, in which case the container stays registered.
    pub fn delete(&self, label: &str) -> Result<()> {
        let _ = self.current_state(label)?;
        self.check_cancelled(label)?;
        if let Some(id) = self.registry.handle(label) {
            tracing::debug!(label, id = %id, "removing container");
            self.engine
                .delete_container(&id, true)
                .inspect_err(|e| self.report_failure(label, e))?;
        }
        self.registry.set_handle(label, None)?;
        self.transition(label, LifecycleState::Deleted)?;
        let _ = self.registry.remove(label);
        Ok(())
    }

    /// Re-reads the running status of `label` from the engine.
    ///
    /// The observed state is adopted even where the state machine would
    /// not allow the move, as long as it stays among materialized states.
    /// Unmaterialized containers are returned unchanged without an engine
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] for an unknown label or the
    /// engine's error.
    pub fn refresh(&self, label: &str) -> Result<LifecycleState> {
        let current = self.current_state(label)?;
        let Some(id) = self.registry.handle(label) else {
            return Ok(current);
        };
        let observed = state_from_inspect(&self.engine.inspect_container(&id)?);
        let from = self.registry.observe_state(label, observed)?;
        self.announce(label, from, observed);
        Ok(observed)
    }

    /// Starts the first container whose name matches each entry of `names`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] if a name matches nothing, or the
    /// first start error.
    pub fn up<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            let label = self.first_by_name(name.as_ref())?;
            tracing::info!(name = name.as_ref(), label = %label, "starting container");
            self.start(&label)?;
        }
        Ok(())
    }

    /// Stops the first container whose name matches each entry of `names`.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] if a name matches nothing, or the
    /// first stop error.
    pub fn down<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            let label = self.first_by_name(name.as_ref())?;
            tracing::info!(name = name.as_ref(), label = %label, "stopping container");
            self.stop(&label)?;
        }
        Ok(())
    }

    /// Starts `labels` (all containers if empty) and their dependencies.
    ///
    /// Containers whose dependencies are running start concurrently, at
    /// most `max_workers` at a time. A failure skips every container that
    /// transitively depends on the failed one; other branches continue.
    pub fn start_all<S: AsRef<str>>(&self, labels: &[S]) -> BatchReport {
        let plan = StartPlan::build(self.registry, &self.targets(labels));
        tracing::info!(
            containers = plan.order.len(),
            workers = self.max_workers,
            "starting containers"
        );
        self.run_start_plan(&plan)
    }

    /// Stops `labels` (all containers if empty) in registry order.
    pub fn stop_all<S: AsRef<str>>(&self, labels: &[S]) -> BatchReport {
        self.sequential(labels, |label| self.stop(label))
    }

    /// Kills `labels` (all containers if empty) in registry order.
    pub fn kill_all<S: AsRef<str>>(&self, labels: &[S]) -> BatchReport {
        self.sequential(labels, |label| self.kill(label))
    }

    /// Deletes `labels` (all containers if empty) in registry order.
    pub fn delete_all<S: AsRef<str>>(&self, labels: &[S]) -> BatchReport {
        self.sequential(labels, |label| self.delete(label))
    }

    fn targets<S: AsRef<str>>(&self, labels: &[S]) -> Vec<String> {
        if labels.is_empty() {
            self.registry.labels()
        } else {
            labels.iter().map(|l| l.as_ref().to_string()).collect()
        }
    }

    fn sequential<S: AsRef<str>>(
        &self,
        labels: &[S],
        operation: impl Fn(&str) -> Result<()>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for label in self.targets(labels) {
            if self.cancel.is_cancelled() {
                let error = BerthError::Cancelled {
                    label: label.clone(),
                };
                report.skipped.push((label, error));
                continue;
            }
            match operation(&label) {
                Ok(()) => report.completed.push(label),
                Err(error @ BerthError::Cancelled { .. }) => report.skipped.push((label, error)),
                Err(error) => report.failed.push((label, error)),
            }
        }
        report
    }

    fn run_start_plan(&self, plan: &StartPlan) -> BatchReport {
        let mut report = BatchReport::default();
        let mut remaining = plan.pending.clone();
        let mut resolved: HashSet<usize> = HashSet::new();
        let mut ready: BTreeSet<usize> = (0..plan.order.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let (done_tx, done_rx) = mpsc::channel::<(usize, Result<()>)>();

        std::thread::scope(|scope| {
            let mut in_flight = 0_usize;
            loop {
                while in_flight < self.max_workers {
                    let Some(index) = ready.pop_first() else {
                        break;
                    };
                    let label = &plan.order[index];
                    if self.cancel.is_cancelled() {
                        skip(plan, index, Skip::Cancelled, &mut resolved, &mut report);
                        continue;
                    }
                    let done_tx = done_tx.clone();
                    let _ = scope.spawn(move || {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.launch(label)))
                            .unwrap_or_else(|payload| Err(self.worker_panicked(label, payload.as_ref())));
                        let _ = done_tx.send((index, outcome));
                    });
                    in_flight += 1;
                }
                if in_flight == 0 {
                    break;
                }
                let Ok((index, result)) = done_rx.recv() else {
                    break;
                };
                in_flight -= 1;
                match result {
                    Ok(()) => {
                        let _ = resolved.insert(index);
                        for &dependent in &plan.dependents[index] {
                            remaining[dependent] -= 1;
                            if remaining[dependent] == 0 && !resolved.contains(&dependent) {
                                let _ = ready.insert(dependent);
                            }
                        }
                        report.completed.push(plan.order[index].clone());
                    }
                    Err(BerthError::Cancelled { .. }) => {
                        skip(plan, index, Skip::Cancelled, &mut resolved, &mut report);
                    }
                    Err(error) => {
                        let _ = resolved.insert(index);
                        report.failed.push((plan.order[index].clone(), error));
                        skip_dependents(plan, index, Skip::DependencyFailed, &mut resolved, &mut report);
                    }
                }
            }
        });

        for (index, label) in plan.order.iter().enumerate() {
            if !resolved.contains(&index) {
                report.skipped.push((
                    label.clone(),
                    BerthError::DependencyCycle {
                        label: label.clone(),
                    },
                ));
            }
        }
        report
    }

    /// Materializes `label` if needed and starts it. Dependencies must
    /// already be running.
    fn launch(&self, label: &str) -> Result<()> {
        self.launch_inner(label)
            .inspect_err(|e| self.report_failure(label, e))
    }

    fn launch_inner(&self, label: &str) -> Result<()> {
        let spec = self.spec(label)?;
        if self.current_state(label)? == LifecycleState::Running {
            return Ok(());
        }
        let id = match self.registry.handle(label) {
            Some(id) => id,
            None => self.materialize(&spec)?,
        };
        self.check_cancelled(label)?;
        tracing::debug!(label, id = %id, "starting container");
        self.engine.start_container(&id)?;
        self.transition(label, LifecycleState::Running)
    }

    // Every launched slot reports back, including one whose engine call
    // panicked.
    fn worker_panicked(&self, label: &str, payload: &(dyn Any + Send)) -> BerthError {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let error = BerthError::engine("start", format!("worker panicked: {message}"));
        self.report_failure(label, &error);
        error
    }

    fn materialize(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let label = spec.label.as_str();
        self.check_cancelled(label)?;
        let image = resolve_image(self.engine, spec, &self.working_dir)?;

        let mut links = Vec::new();
        for edge in self.registry.dependencies(label) {
            let Some(id) = self.registry.handle(&edge.label) else {
                return Err(BerthError::DependencyFailed {
                    label: label.to_string(),
                    dependency: edge.label,
                });
            };
            links.push((id, edge.alias));
        }

        let request = create_request(spec, image, &links, &self.working_dir)?;
        self.check_cancelled(label)?;
        tracing::debug!(label, name = %request.name, image = %request.image, "creating container");
        let id = self.engine.create_container(&request)?;
        self.registry.set_handle(label, Some(id.clone()))?;
        self.transition(label, LifecycleState::Created)?;
        Ok(id)
    }

    fn halt(
        &self,
        label: &str,
        operation: &'static str,
        call: impl Fn(&ContainerId) -> Result<()>,
    ) -> Result<()> {
        if self.current_state(label)? != LifecycleState::Running {
            return Ok(());
        }
        let Some(id) = self.registry.handle(label) else {
            return Ok(());
        };
        self.check_cancelled(label)?;
        tracing::debug!(label, id = %id, operation, "engine call");
        call(&id).inspect_err(|e| self.report_failure(label, e))?;
        self.transition(label, LifecycleState::Stopped)
    }

    fn transition(&self, label: &str, to: LifecycleState) -> Result<()> {
        let from = self.registry.set_state(label, to)?;
        self.announce(label, from, to);
        Ok(())
    }

    fn announce(&self, label: &str, from: LifecycleState, to: LifecycleState) {
        if from != to {
            tracing::info!(label, from = %from, to = %to, "container state changed");
        }
        self.events.state_changed(label, from, to);
    }

    fn report_failure(&self, label: &str, error: &BerthError) {
        if matches!(error, BerthError::Cancelled { .. }) {
            return;
        }
        tracing::warn!(label, error = %error, "container operation failed");
        self.events.emit(ContainerEvent::Failed {
            label: label.to_string(),
            error: error.to_string(),
        });
    }

    fn check_cancelled(&self, label: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BerthError::Cancelled {
                label: label.to_string(),
            });
        }
        Ok(())
    }

    fn spec(&self, label: &str) -> Result<Arc<ContainerSpec>> {
        self.registry.get(label).ok_or_else(|| not_found(label))
    }

    fn current_state(&self, label: &str) -> Result<LifecycleState> {
        self.registry.state(label).ok_or_else(|| not_found(label))
    }

    fn first_by_name(&self, name: &str) -> Result<String> {
        self.registry
            .select_by_name(name)
            .first()
            .map(|spec| spec.label.clone())
            .ok_or_else(|| not_found(name))
    }
}

fn not_found(label: &str) -> BerthError {
    BerthError::NotFound {
        kind: "container",
        id: label.to_string(),
    }
}

/// Why a container of a start plan was never attempted.
#[derive(Debug, Clone, Copy)]
enum Skip {
    Cancelled,
    DependencyFailed,
}

/// Records `index` as skipped, then every container depending on it.
fn skip(
    plan: &StartPlan,
    index: usize,
    reason: Skip,
    resolved: &mut HashSet<usize>,
    report: &mut BatchReport,
) {
    if !resolved.insert(index) {
        return;
    }
    let label = plan.order[index].clone();
    report.skipped.push((label.clone(), BerthError::Cancelled { label }));
    skip_dependents(plan, index, reason, resolved, report);
}

fn skip_dependents(
    plan: &StartPlan,
    cause: usize,
    reason: Skip,
    resolved: &mut HashSet<usize>,
    report: &mut BatchReport,
) {
    let dependency = &plan.order[cause];
    let mut stack: Vec<usize> = plan.dependents[cause].clone();
    while let Some(index) = stack.pop() {
        if !resolved.insert(index) {
            continue;
        }
        let label = plan.order[index].clone();
        let error = match reason {
            Skip::Cancelled => BerthError::Cancelled {
                label: label.clone(),
            },
            Skip::DependencyFailed => {
                tracing::warn!(
                    label = %label,
                    dependency = %dependency,
                    "not starting container: dependency failed"
                );
                BerthError::DependencyFailed {
                    label: label.clone(),
                    dependency: dependency.clone(),
                }
            }
        };
        report.skipped.push((label, error));
        stack.extend(plan.dependents[index].iter().copied());
    }
}

/// Containers to start, in depth-first post-order, with their
/// in-plan dependency counts and reverse edges.
#[derive(Debug)]
struct StartPlan {
    order: Vec<String>,
    pending: Vec<usize>,
    dependents: Vec<Vec<usize>>,
}

impl StartPlan {
    fn build(registry: &Registry, targets: &[String]) -> Self {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        for target in targets {
            Self::visit(registry, target, &mut seen, &mut order);
        }

        let index: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();
        let mut pending = vec![0; order.len()];
        let mut dependents = vec![Vec::new(); order.len()];
        for (i, label) in order.iter().enumerate() {
            for edge in registry.dependencies(label) {
                if let Some(&dep) = index.get(edge.label.as_str()) {
                    pending[i] += 1;
                    dependents[dep].push(i);
                }
            }
        }
        Self {
            order,
            pending,
            dependents,
        }
    }

    fn visit(registry: &Registry, label: &str, seen: &mut HashSet<String>, order: &mut Vec<String>) {
        if !seen.insert(label.to_string()) {
            return;
        }
        for edge in registry.dependencies(label) {
            Self::visit(registry, &edge.label, seen, order);
        }
        order.push(label.to_string());
    }
}
