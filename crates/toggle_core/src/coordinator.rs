use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use flag_store::{FlagStore, SharedActionLog, StoreError};
use shared::{
    domain::{FlagKey, FlagMap, FlagPatch, KeyPair, OverlapPolicy, ToggleKind},
    error::ErrorReport,
    events::ToggleEvent,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::CoordinatorError,
    registry::{GroupRegistry, TargetRegistry},
    work::{SimulatedDelay, ToggleWork, WorkRequest},
};

pub const DEFAULT_SINGLE_DELAY: Duration = Duration::from_millis(300);
pub const DEFAULT_GROUP_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub single_delay: Duration,
    pub group_delay: Duration,
    pub overlap: OverlapPolicy,
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            single_delay: DEFAULT_SINGLE_DELAY,
            group_delay: DEFAULT_GROUP_DELAY,
            overlap: OverlapPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

pub struct CoordinatorBuilder {
    store: FlagStore,
    log: SharedActionLog,
    targets: TargetRegistry,
    groups: GroupRegistry,
    config: CoordinatorConfig,
    work: Arc<dyn ToggleWork>,
}

impl CoordinatorBuilder {
    pub fn targets(mut self, targets: TargetRegistry) -> Self {
        self.targets = targets;
        self
    }

    pub fn groups(mut self, groups: GroupRegistry) -> Self {
        self.groups = groups;
        self
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the simulated delay with real deferred work.
    pub fn work(mut self, work: impl ToggleWork + 'static) -> Self {
        self.work = Arc::new(work);
        self
    }

    pub fn build(self) -> Result<ToggleCoordinator, CoordinatorError> {
        self.targets.validate(self.store.initial())?;
        self.groups.validate(&self.targets)?;

        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));

        info!(
            targets = self.targets.len(),
            groups = self.groups.len(),
            policy = ?self.store.policy(),
            overlap = ?self.config.overlap,
            "toggle coordinator assembled"
        );

        Ok(ToggleCoordinator {
            inner: Arc::new(Inner {
                store: self.store,
                log: self.log,
                targets: self.targets,
                groups: self.groups,
                config: self.config,
                work: self.work,
                events,
                cancel: CancellationToken::new(),
                queue_tails: Mutex::new(HashMap::new()),
            }),
        })
    }
}

/// Sequences `loading -> commit` transitions over a [`FlagStore`] and
/// records each phase in a [`SharedActionLog`].
///
/// Both toggle operations commit the loading phase before returning and run
/// the rest on the current Tokio runtime. Under [`OverlapPolicy::Interleave`]
/// overlapping calls on one target are not serialized and the last commit
/// wins; under [`OverlapPolicy::Queue`] they run in call order.
#[derive(Clone)]
pub struct ToggleCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: FlagStore,
    log: SharedActionLog,
    targets: TargetRegistry,
    groups: GroupRegistry,
    config: CoordinatorConfig,
    work: Arc<dyn ToggleWork>,
    events: broadcast::Sender<ToggleEvent>,
    cancel: CancellationToken,
    /// Per target, the receiver that resolves once the most recently queued
    /// sequence has finished.
    queue_tails: Mutex<HashMap<FlagKey, oneshot::Receiver<()>>>,
}

/// Held for the duration of a queued sequence; dropping it releases the next.
type Turn = oneshot::Sender<()>;

#[derive(Debug, Clone)]
struct TogglePlan {
    target: FlagKey,
    kind: ToggleKind,
    pair: KeyPair,
    dependents: Vec<FlagKey>,
    cascade: Vec<FlagKey>,
    delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub target: FlagKey,
    pub kind: ToggleKind,
    pub shown: bool,
    pub snapshot: FlagMap,
}

/// Observes one in-flight toggle. Dropping it does not stop the toggle.
pub struct ToggleHandle {
    target: FlagKey,
    task: JoinHandle<Result<ToggleOutcome, CoordinatorError>>,
}

impl ToggleHandle {
    pub fn target(&self) -> &FlagKey {
        &self.target
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<ToggleOutcome, CoordinatorError> {
        match self.task.await {
            Ok(result) => result,
            Err(source) => Err(CoordinatorError::TaskAborted {
                target: self.target,
                source,
            }),
        }
    }
}

impl ToggleCoordinator {
    pub fn builder(store: FlagStore, log: SharedActionLog) -> CoordinatorBuilder {
        CoordinatorBuilder {
            store,
            log,
            targets: TargetRegistry::new(),
            groups: GroupRegistry::new(),
            config: CoordinatorConfig::default(),
            work: Arc::new(SimulatedDelay),
        }
    }

    pub fn toggle_single(&self, target: &FlagKey) -> Result<ToggleHandle, CoordinatorError> {
        let plan = self.inner.plan(target, ToggleKind::Single)?;
        self.start(plan)
    }

    /// Toggles `group` and, in the same final commit, sets every dependent's
    /// show flag to the group's new value.
    pub fn toggle_group(&self, group: &FlagKey) -> Result<ToggleHandle, CoordinatorError> {
        let plan = self.inner.plan(group, ToggleKind::Group)?;
        self.start(plan)
    }

    pub fn store(&self) -> &FlagStore {
        &self.inner.store
    }

    pub fn log(&self) -> &SharedActionLog {
        &self.inner.log
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.inner.targets
    }

    pub fn groups(&self) -> &GroupRegistry {
        &self.inner.groups
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn is_shown(&self, target: &FlagKey) -> Option<bool> {
        let pair = self.inner.targets.get(target)?;
        self.inner.store.get(&pair.show)
    }

    pub fn is_loading(&self, target: &FlagKey) -> Option<bool> {
        let pair = self.inner.targets.get(target)?;
        self.inner.store.get(&pair.loading)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ToggleEvent> {
        self.inner.events.subscribe()
    }

    /// Cancels the deferred work of every in-flight toggle. Each one still
    /// clears its loading flag and reports a failure.
    pub fn shutdown(&self) {
        info!("toggle coordinator shutting down");
        self.inner.cancel.cancel();
    }

    fn start(&self, plan: TogglePlan) -> Result<ToggleHandle, CoordinatorError> {
        let runtime = Handle::try_current().map_err(|_| CoordinatorError::NoRuntime {
            target: plan.target.clone(),
        })?;
        let target = plan.target.clone();
        let inner = Arc::clone(&self.inner);
        let overlap = inner.config.overlap;

        let task = match overlap {
            OverlapPolicy::Interleave => {
                let previous = inner.begin(&plan)?;
                runtime.spawn(inner.finish(plan, previous, None))
            }
            OverlapPolicy::Queue => {
                // The queue position is taken here, in call order, not when
                // the spawned task is first polled.
                let (turn, predecessor) = inner.enqueue(&plan.target);
                match predecessor {
                    None => {
                        let previous = inner.begin(&plan)?;
                        runtime.spawn(inner.finish(plan, previous, Some(turn)))
                    }
                    Some(predecessor) => {
                        debug!(toggle = %plan.target, "toggle queued behind in-flight sequence");
                        runtime.spawn(inner.run_queued(plan, predecessor, turn))
                    }
                }
            }
        };

        Ok(ToggleHandle { target, task })
    }
}

impl Inner {
    fn plan(&self, target: &FlagKey, kind: ToggleKind) -> Result<TogglePlan, CoordinatorError> {
        let unknown = || CoordinatorError::UnknownTarget {
            target: target.clone(),
            kind,
        };

        let (dependents, delay) = match kind {
            ToggleKind::Single => (Vec::new(), self.config.single_delay),
            ToggleKind::Group => (
                self.groups.dependents(target).ok_or_else(unknown)?.to_vec(),
                self.config.group_delay,
            ),
        };
        let pair = self.targets.get(target).ok_or_else(unknown)?.clone();

        let cascade = dependents
            .iter()
            .map(|dependent| {
                self.targets
                    .get(dependent)
                    .map(|pair| pair.show.clone())
                    .ok_or_else(|| CoordinatorError::UnknownTarget {
                        target: dependent.clone(),
                        kind: ToggleKind::Single,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TogglePlan {
            target: target.clone(),
            kind,
            pair,
            dependents,
            cascade,
            delay,
        })
    }

    /// Loading phase. Re-asserts the current show value so a full-reset
    /// store does not drop it, and returns that value.
    fn begin(&self, plan: &TogglePlan) -> Result<bool, CoordinatorError> {
        let previous = self
            .store
            .get(&plan.pair.show)
            .ok_or_else(|| StoreError::UnknownKey {
                key: plan.pair.show.clone(),
            })?;

        self.store.apply(
            &FlagPatch::new()
                .with(plan.pair.loading.clone(), true)
                .with(plan.pair.show.clone(), previous),
        )?;
        self.log
            .append(format!("Started toggling {} visibility", plan.target));

        info!(toggle = %plan.target, kind = ?plan.kind, shown = previous, "toggle started");
        let _ = self.events.send(ToggleEvent::Started {
            target: plan.target.clone(),
            kind: plan.kind,
        });
        Ok(previous)
    }

    /// Appends a sequence to `target`'s queue. Returns its turn and, when an
    /// earlier sequence is still in flight, the receiver to wait on first.
    fn enqueue(&self, target: &FlagKey) -> (Turn, Option<oneshot::Receiver<()>>) {
        let (turn, done) = oneshot::channel();
        let mut tails = self
            .queue_tails
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let predecessor = match tails.insert(target.clone(), done) {
            Some(mut tail) => match tail.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => Some(tail),
                _ => None,
            },
            None => None,
        };
        (turn, predecessor)
    }

    async fn run_queued(
        self: Arc<Self>,
        plan: TogglePlan,
        predecessor: oneshot::Receiver<()>,
        turn: Turn,
    ) -> Result<ToggleOutcome, CoordinatorError> {
        // The predecessor never sends; its sender is dropped when it finishes.
        let _ = predecessor.await;
        let previous = self.begin(&plan)?;
        self.finish(plan, previous, Some(turn)).await
    }

    async fn finish(
        self: Arc<Self>,
        plan: TogglePlan,
        previous: bool,
        _turn: Option<Turn>,
    ) -> Result<ToggleOutcome, CoordinatorError> {
        let request = WorkRequest {
            target: plan.target.clone(),
            kind: plan.kind,
            delay: plan.delay,
        };

        match self.work.run(&request, &self.cancel).await {
            Ok(()) => self.commit(&plan, !previous),
            Err(source) => self.fail(&plan, source),
        }
    }

    fn commit(&self, plan: &TogglePlan, shown: bool) -> Result<ToggleOutcome, CoordinatorError> {
        let mut patch = FlagPatch::new()
            .with(plan.pair.show.clone(), shown)
            .with(plan.pair.loading.clone(), false);
        for key in &plan.cascade {
            patch.insert(key.clone(), shown);
        }
        let snapshot = self.store.apply(&patch)?;

        let state = if shown { "shown" } else { "hidden" };
        let message = match plan.kind {
            ToggleKind::Single => format!("{} {state}", plan.target),
            ToggleKind::Group => format!("{} {state} with related boxes", plan.target),
        };
        self.log.append(message);

        info!(
            toggle = %plan.target,
            kind = ?plan.kind,
            shown,
            cascaded = plan.cascade.len(),
            "toggle committed"
        );
        let _ = self.events.send(ToggleEvent::Committed {
            target: plan.target.clone(),
            kind: plan.kind,
            shown,
            cascaded: plan.dependents.clone(),
        });

        Ok(ToggleOutcome {
            target: plan.target.clone(),
            kind: plan.kind,
            shown,
            snapshot,
        })
    }

    /// Clears the loading flag and leaves show at whatever it is now, which
    /// may be a value another sequence committed during this one's work.
    fn fail(
        &self,
        plan: &TogglePlan,
        source: anyhow::Error,
    ) -> Result<ToggleOutcome, CoordinatorError> {
        warn!(toggle = %plan.target, error = %source, "toggle work failed; clearing loading flag");

        let current = self
            .store
            .get(&plan.pair.show)
            .ok_or_else(|| StoreError::UnknownKey {
                key: plan.pair.show.clone(),
            })?;
        self.store.apply(
            &FlagPatch::new()
                .with(plan.pair.show.clone(), current)
                .with(plan.pair.loading.clone(), false),
        )?;
        self.log.append(format!(
            "Failed toggling {} visibility: {source}",
            plan.target
        ));

        let error = CoordinatorError::ToggleFailed {
            target: plan.target.clone(),
            source,
        };
        let _ = self.events.send(ToggleEvent::Failed {
            target: plan.target.clone(),
            kind: plan.kind,
            error: ErrorReport::from(&error),
        });
        Err(error)
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
