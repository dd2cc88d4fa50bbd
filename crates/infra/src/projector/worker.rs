//! Batch replay orchestrator.
//!
//! A run goes through these steps:
//!
//! 1. **Admission**: every target projector is locked. Locked projectors are
//!    skipped (or taken over when [`WorkerContext::unlock`] is set); projectors
//!    in error are skipped unless [`WorkerContext::continue_on_error`] is set.
//! 2. **Start date**: the oldest `latest_event_date` among admitted projectors.
//!    A projector that never progressed forces a replay of the whole history.
//! 3. **Replay**: events are played in query order. For each event, every
//!    admitted projector still behind it is invoked, in registration order.
//!    A failing projector is stopped for the rest of the run and its error is
//!    persisted right away.
//! 4. **Flush**: successful progress is persisted once per projector at the end
//!    of the run, releasing its lock.
//!
//! Locks taken during admission are released on every exit path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use evstore_events::{Event, Projector, ProjectorRegistry, invoke, invoke_reset};

use super::error::WorkerError;
use super::notify::{WorkerEvent, WorkerObserver};
use super::state::{State, StateStore, StateStoreError};
use crate::event_store::EventStore;

/// Options of a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerContext {
    /// Play projectors even when their state is in error.
    pub continue_on_error: bool,
    /// Reset replayable targets (read model and state) before playing.
    pub reset: bool,
    /// Take over projectors locked by someone else.
    pub unlock: bool,
}

impl WorkerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn continue_on_error(mut self, toggle: bool) -> Self {
        self.continue_on_error = toggle;
        self
    }

    pub fn reset(mut self, toggle: bool) -> Self {
        self.reset = toggle;
        self
    }

    pub fn unlock(mut self, toggle: bool) -> Self {
        self.unlock = toggle;
        self
    }
}

/// Outcome of a replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackReport {
    /// Stream size announced at the start, possibly an estimate.
    pub total: u64,
    /// Number of events read from the stream.
    pub processed: u64,
    /// The run stopped on an event no projector could take.
    pub broken: bool,
    /// Projectors that failed during this run.
    pub failed: Vec<String>,
}

/// A projector admitted to a run.
struct ProjectorState {
    projector: Arc<dyn Projector>,
    /// Position at admission; events at or below it are not replayed.
    position: u64,
    state: State,
    stopped: bool,
    /// The run still holds this projector's lock.
    locked: bool,
    /// Last successfully played event, persisted at the end of the run.
    pending: Option<Event>,
}

impl ProjectorState {
    fn new(projector: Arc<dyn Projector>, state: State) -> Self {
        Self {
            projector,
            position: state.latest_event_position(),
            state,
            stopped: false,
            locked: true,
            pending: None,
        }
    }

    fn id(&self) -> &str {
        self.projector.identifier()
    }
}

pub struct Worker<E, S> {
    registry: Arc<ProjectorRegistry>,
    event_store: E,
    state_store: S,
    observers: Vec<Arc<dyn WorkerObserver>>,
}

impl<E, S> Worker<E, S>
where
    E: EventStore,
    S: StateStore,
{
    pub fn new(registry: Arc<ProjectorRegistry>, event_store: E, state_store: S) -> Self {
        Self {
            registry,
            event_store,
            state_store,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl WorkerObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn state_store(&self) -> &S {
        &self.state_store
    }

    /// Replay the log into one projector.
    pub fn play(&self, id: &str, ctx: &WorkerContext) -> Result<PlaybackReport, WorkerError> {
        let projector = self.registry.find(id)?;
        self.run(vec![projector], None, ctx)
    }

    /// Replay into one projector, starting no earlier than `from`.
    pub fn play_from(
        &self,
        id: &str,
        from: DateTime<Utc>,
        ctx: &WorkerContext,
    ) -> Result<PlaybackReport, WorkerError> {
        let projector = self.registry.find(id)?;
        self.run(vec![projector], Some(from), ctx)
    }

    /// Replay the log into every registered projector.
    pub fn play_all(&self, ctx: &WorkerContext) -> Result<PlaybackReport, WorkerError> {
        self.run(self.all_projectors()?, None, ctx)
    }

    /// Replay into every registered projector, starting no earlier than `from`.
    pub fn play_all_from(
        &self,
        from: DateTime<Utc>,
        ctx: &WorkerContext,
    ) -> Result<PlaybackReport, WorkerError> {
        self.run(self.all_projectors()?, Some(from), ctx)
    }

    /// Reset a replayable projector: drop its read model and forget its state.
    pub fn reset(&self, id: &str) -> Result<(), WorkerError> {
        let projector = self.registry.find(id)?;
        if projector.as_replayable().is_none() {
            error!(projector = id, "projector is not replayable");
            return Err(WorkerError::NotReplayable(id.to_string()));
        }
        self.reset_projector(projector.as_ref())
    }

    /// Reset every replayable projector, ignoring the others.
    pub fn reset_all(&self) -> Result<(), WorkerError> {
        for projector in self.all_projectors()? {
            if projector.as_replayable().is_some() {
                self.reset_projector(projector.as_ref())?;
            } else {
                info!(
                    projector = projector.identifier(),
                    "projector is not replayable, ignoring"
                );
            }
        }
        Ok(())
    }

    fn reset_projector(&self, projector: &dyn Projector) -> Result<(), WorkerError> {
        let id = projector.identifier();
        let Some(replayable) = projector.as_replayable() else {
            return Err(WorkerError::NotReplayable(id.to_string()));
        };

        invoke_reset(replayable).map_err(|failure| WorkerError::ResetFailed {
            id: id.to_string(),
            failure,
        })?;
        self.state_store.delete(id)?;
        info!(projector = id, "projector reset");
        Ok(())
    }

    fn all_projectors(&self) -> Result<Vec<Arc<dyn Projector>>, WorkerError> {
        if self.registry.is_empty() {
            return Err(WorkerError::MissingProjector(
                "there is no projectors, cannot continue".to_string(),
            ));
        }
        Ok(self.registry.all().to_vec())
    }

    fn notify(&self, event: WorkerEvent) {
        for observer in &self.observers {
            observer.notify(&event);
        }
    }

    fn run(
        &self,
        targets: Vec<Arc<dyn Projector>>,
        from: Option<DateTime<Utc>>,
        ctx: &WorkerContext,
    ) -> Result<PlaybackReport, WorkerError> {
        if ctx.reset {
            for projector in &targets {
                if projector.as_replayable().is_some() {
                    self.reset_projector(projector.as_ref())?;
                } else {
                    info!(
                        projector = projector.identifier(),
                        "projector is not replayable, reset skipped"
                    );
                }
            }
        }

        let mut admitted = self.admit(targets, ctx)?;
        self.replay(&mut admitted, from)
    }

    /// Lock targets and build the run's projector set.
    fn admit(
        &self,
        targets: Vec<Arc<dyn Projector>>,
        ctx: &WorkerContext,
    ) -> Result<Admitted<'_, S>, WorkerError> {
        let mut admitted = Admitted::new(&self.state_store, targets.len());

        for projector in targets {
            let id = projector.identifier().to_string();

            let state = match self.state_store.lock(&id, false) {
                Ok(state) => state,
                Err(StateStoreError::Locked(_)) if ctx.unlock => {
                    warn!(projector = %id, "projector is locked, taking over its lock");
                    self.state_store.lock(&id, true)?
                }
                Err(StateStoreError::Locked(_)) => {
                    warn!(projector = %id, "projector is locked, skipping");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if state.is_error() && !ctx.continue_on_error {
                warn!(projector = %id, "projector is in an erroneous state, skipping");
                self.state_store.unlock(&id)?;
                continue;
            }

            admitted.projectors.push(ProjectorState::new(projector, state));
        }

        if admitted.projectors.is_empty() {
            return Err(WorkerError::MissingProjector(
                "all projectors are in error or locked, cannot continue".to_string(),
            ));
        }
        Ok(admitted)
    }

    fn replay(
        &self,
        admitted: &mut Admitted<'_, S>,
        from: Option<DateTime<Utc>>,
    ) -> Result<PlaybackReport, WorkerError> {
        let mut query = self.event_store.query().allow_approximate_count(true);
        match start_date(&admitted.projectors, from) {
            Some(date) => {
                info!(date = %date, "replaying from lowest event date");
                query = query.from_date(date);
            }
            None => info!("no lowest event date found, replaying everything"),
        }

        let stream = query.execute()?;
        let total = stream.total_count();
        let mut report = PlaybackReport {
            total,
            ..PlaybackReport::default()
        };

        self.notify(WorkerEvent::Begin { total });

        let mut stream = stream.peekable();
        if stream.peek().is_none() {
            info!("event stream is empty");
            for current in admitted.projectors.iter_mut() {
                current.state = self.state_store.unlock(current.id())?;
                current.locked = false;
            }
            self.notify(WorkerEvent::End { total, index: 0 });
            return Ok(report);
        }

        for event in stream {
            let event = event?;
            report.processed += 1;
            let index = report.processed;
            self.notify(WorkerEvent::Next { total, index });

            let mut at_least_one = false;
            for current in admitted.projectors.iter_mut().filter(|p| !p.stopped) {
                if current.position < event.position() {
                    debug!(
                        projector = current.id(),
                        position = event.position(),
                        "playing event"
                    );
                    match invoke(current.projector.as_ref(), &event) {
                        Ok(()) => keep_latest(&mut current.pending, &event),
                        Err(failure) => {
                            error!(
                                projector = current.id(),
                                position = event.position(),
                                error = %failure,
                                "projector failed, stopping it for this run"
                            );
                            let state =
                                self.state_store
                                    .exception(current.id(), &event, &failure, true)?;
                            current.stopped = true;
                            current.locked = false;
                            current.pending = None;
                            current.state = state.clone();
                            report.failed.push(current.id().to_string());
                            self.notify(WorkerEvent::Error { total, index, state });
                            continue;
                        }
                    }
                }
                at_least_one = true;
            }

            if !at_least_one {
                report.broken = true;
                self.notify(WorkerEvent::Broken { total, index });
                break;
            }
        }

        for current in admitted.projectors.iter_mut().filter(|p| p.locked) {
            if let Some(event) = current.pending.take() {
                debug!(projector = current.id(), position = event.position(), "saving state");
                current.state = self.state_store.update(current.id(), &event, true)?;
            } else {
                current.state = self.state_store.unlock(current.id())?;
            }
            current.locked = false;
        }

        self.notify(WorkerEvent::End {
            total,
            index: report.processed,
        });
        Ok(report)
    }
}

/// Projectors admitted to a run.
///
/// Every lock still held when this is dropped is released, so an error or a
/// panic anywhere in the run leaves no projector locked. The original error
/// wins over release failures.
struct Admitted<'a, S: StateStore> {
    state_store: &'a S,
    projectors: Vec<ProjectorState>,
}

impl<'a, S: StateStore> Admitted<'a, S> {
    fn new(state_store: &'a S, capacity: usize) -> Self {
        Self {
            state_store,
            projectors: Vec::with_capacity(capacity),
        }
    }
}

impl<S: StateStore> Drop for Admitted<'_, S> {
    fn drop(&mut self) {
        for current in self.projectors.iter().filter(|p| p.locked) {
            if let Err(err) = self.state_store.unlock(current.id()) {
                warn!(projector = current.id(), error = %err, "could not release projector lock");
            }
        }
    }
}

impl<E, S> core::fmt::Debug for Worker<E, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Worker")
            .field("registry", &self.registry)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Lowest known event date across admitted projectors, bounded by `from`.
///
/// `None` means "replay everything": some projector never progressed, and no
/// caller bound applies.
fn start_date(admitted: &[ProjectorState], from: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let mut lowest: Option<DateTime<Utc>> = None;
    let mut everything = false;

    for current in admitted {
        match current.state.latest_event_date() {
            Some(date) if current.position >= 1 => {
                lowest = Some(lowest.map_or(date, |l| l.min(date)));
            }
            _ => everything = true,
        }
    }

    let projectors = if everything { None } else { lowest };
    match (projectors, from) {
        (Some(p), Some(f)) => Some(p.max(f)),
        (p, f) => p.or(f),
    }
}

fn keep_latest(pending: &mut Option<Event>, event: &Event) {
    let newer = pending
        .as_ref()
        .is_none_or(|current| current.position() < event.position());
    if newer {
        *pending = Some(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::projector::InMemoryStateStore;
    use chrono::Duration;
    use evstore_events::testing::{CallbackProjector, NullProjector};
    use evstore_events::{EventBuilder, ProjectorFailure};
    use serde_json::json;
    use std::sync::Mutex;

    fn events(store: &InMemoryEventStore, count: usize) -> Vec<Event> {
        (0..count)
            .map(|i| store.append(EventBuilder::new(json!({ "i": i })).build()).unwrap())
            .collect()
    }

    fn registry(projectors: Vec<Arc<dyn Projector>>) -> Arc<ProjectorRegistry> {
        Arc::new(ProjectorRegistry::with_projectors(projectors))
    }

    type Recorded = Arc<Mutex<Vec<&'static str>>>;

    fn recorder() -> (Recorded, impl Fn(&WorkerEvent) + Send + Sync + 'static) {
        let seen: Recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |e: &WorkerEvent| sink.lock().unwrap().push(e.name()))
    }

    #[test]
    fn empty_registry_fails_without_writes() {
        let states = Arc::new(InMemoryStateStore::new());
        let worker = Worker::new(registry(vec![]), InMemoryEventStore::new(), states.clone());

        let err = worker.play_all(&WorkerContext::new()).unwrap_err();
        assert!(matches!(err, WorkerError::MissingProjector(_)));
        assert!(states.latest("foo").unwrap().is_none());
    }

    #[test]
    fn unknown_projector_fails() {
        let worker = Worker::new(
            registry(vec![Arc::new(NullProjector::new("foo"))]),
            InMemoryEventStore::new(),
            InMemoryStateStore::new(),
        );
        let err = worker.play("bar", &WorkerContext::new()).unwrap_err();
        assert!(matches!(err, WorkerError::DoesNotExist(_)));
    }

    #[test]
    fn empty_stream_only_begins_and_ends() {
        let states = Arc::new(InMemoryStateStore::new());
        let (seen, observer) = recorder();
        let worker = Worker::new(
            registry(vec![Arc::new(NullProjector::new("foo"))]),
            InMemoryEventStore::new(),
            states.clone(),
        )
        .with_observer(observer);

        let report = worker.play_all(&WorkerContext::new()).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["begin", "end"]);
        assert_eq!(report.processed, 0);
        assert!(!states.latest("foo").unwrap().unwrap().is_locked());
    }

    #[test]
    fn locked_projector_does_not_play() {
        let store = InMemoryEventStore::new();
        events(&store, 3);
        let foo = Arc::new(NullProjector::new("foo"));
        let bar = Arc::new(NullProjector::new("bar"));
        let states = Arc::new(InMemoryStateStore::new());
        states.lock("bar", false).unwrap();

        let worker = Worker::new(registry(vec![foo.clone(), bar.clone()]), store, states.clone());
        worker.play_all(&WorkerContext::new()).unwrap();

        assert_eq!(foo.on_event_call_count(), 3);
        assert_eq!(bar.on_event_call_count(), 0);
        let foo_state = states.latest("foo").unwrap().unwrap();
        assert_eq!(foo_state.latest_event_position(), 3);
        assert!(!foo_state.is_locked());
        let bar_state = states.latest("bar").unwrap().unwrap();
        assert_eq!(bar_state.latest_event_position(), 0);
        assert!(bar_state.is_locked());
    }

    #[test]
    fn unlock_context_takes_over_locked_projector() {
        let store = InMemoryEventStore::new();
        events(&store, 2);
        let foo = Arc::new(NullProjector::new("foo"));
        let states = Arc::new(InMemoryStateStore::new());
        states.lock("foo", false).unwrap();

        let worker = Worker::new(registry(vec![foo.clone()]), store, states.clone());
        worker.play("foo", &WorkerContext::new().unlock(true)).unwrap();

        assert_eq!(foo.on_event_call_count(), 2);
        assert!(!states.latest("foo").unwrap().unwrap().is_locked());
    }

    #[test]
    fn all_locked_is_missing_projector() {
        let states = Arc::new(InMemoryStateStore::new());
        states.lock("foo", false).unwrap();
        let worker = Worker::new(
            registry(vec![Arc::new(NullProjector::new("foo"))]),
            InMemoryEventStore::new(),
            states,
        );
        let err = worker.play_all(&WorkerContext::new()).unwrap_err();
        assert!(matches!(err, WorkerError::MissingProjector(_)));
    }

    #[test]
    fn erroneous_projector_is_skipped_unless_asked() {
        let store = InMemoryEventStore::new();
        let stored = events(&store, 3);
        let foo = Arc::new(NullProjector::new("foo"));
        let bar = Arc::new(NullProjector::new("bar"));
        let states = Arc::new(InMemoryStateStore::new());
        states.error("bar", &stored[0], "Foo error", 0, true).unwrap();

        let worker = Worker::new(registry(vec![foo.clone(), bar.clone()]), store, states.clone());
        worker.play_all(&WorkerContext::new()).unwrap();

        assert_eq!(foo.on_event_call_count(), 3);
        assert_eq!(bar.on_event_call_count(), 0);
        let bar_state = states.latest("bar").unwrap().unwrap();
        assert_eq!(bar_state.latest_event_position(), 1);
        assert!(bar_state.is_error());
        assert!(!bar_state.is_locked());

        worker
            .play_all(&WorkerContext::new().continue_on_error(true))
            .unwrap();
        assert_eq!(bar.on_event_call_count(), 2);
        let bar_state = states.latest("bar").unwrap().unwrap();
        assert_eq!(bar_state.latest_event_position(), 3);
        assert!(!bar_state.is_error());
    }

    #[test]
    fn failing_projector_is_stopped() {
        let store = InMemoryEventStore::new();
        events(&store, 3);
        let foo = Arc::new(NullProjector::new("foo"));
        let bar = Arc::new(CallbackProjector::new("bar", |_| {
            Err(ProjectorFailure::new("Something really bad happened."))
        }));
        let states = Arc::new(InMemoryStateStore::new());
        let (seen, observer) = recorder();

        let worker = Worker::new(registry(vec![foo.clone(), bar.clone()]), store, states.clone())
            .with_observer(observer);
        let report = worker.play_all(&WorkerContext::new()).unwrap();

        assert_eq!(foo.on_event_call_count(), 3);
        assert_eq!(bar.on_event_call_count(), 1);
        assert_eq!(seen.lock().unwrap().iter().filter(|n| **n == "error").count(), 1);
        assert_eq!(report.failed, vec!["bar".to_string()]);

        let foo_state = states.latest("foo").unwrap().unwrap();
        assert!(!foo_state.is_error());
        assert!(!foo_state.is_locked());
        assert_eq!(foo_state.latest_event_position(), 3);
        assert!(foo_state.error_message().is_none());

        let bar_state = states.latest("bar").unwrap().unwrap();
        assert!(bar_state.is_error());
        assert!(!bar_state.is_locked());
        assert_eq!(bar_state.latest_event_position(), 1);
        assert_eq!(bar_state.error_message(), Some("Something really bad happened."));
    }

    #[test]
    fn advanced_projectors_are_not_played_again() {
        let store = InMemoryEventStore::new();
        let stored = events(&store, 3);
        let foo = Arc::new(NullProjector::new("foo"));
        let bar = Arc::new(NullProjector::new("bar"));
        let states = Arc::new(InMemoryStateStore::new());
        states.update("foo", &stored[1], true).unwrap();
        states.update("bar", &stored[0], true).unwrap();

        let worker = Worker::new(registry(vec![foo.clone(), bar.clone()]), store, states.clone());
        worker.play_all(&WorkerContext::new()).unwrap();

        assert_eq!(foo.on_event_call_count(), 1);
        assert_eq!(bar.on_event_call_count(), 2);
        assert_eq!(states.latest("foo").unwrap().unwrap().latest_event_position(), 3);
        assert_eq!(states.latest("bar").unwrap().unwrap().latest_event_position(), 3);
    }

    #[test]
    fn broken_when_no_projector_can_take_event() {
        let store = InMemoryEventStore::new();
        events(&store, 3);
        let bar = Arc::new(CallbackProjector::new("bar", |_| Err(ProjectorFailure::new("no"))));
        let states = Arc::new(InMemoryStateStore::new());
        let (seen, observer) = recorder();

        let worker =
            Worker::new(registry(vec![bar.clone()]), store, states.clone()).with_observer(observer);
        let report = worker.play_all(&WorkerContext::new()).unwrap();

        assert!(report.broken);
        assert_eq!(report.processed, 1);
        assert_eq!(bar.on_event_call_count(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["begin", "next", "error", "broken", "end"]
        );
        assert!(!states.latest("bar").unwrap().unwrap().is_locked());
    }

    #[test]
    fn start_date_replays_everything_when_one_projector_never_ran() {
        let now = Utc::now();
        let old = now - Duration::days(10);
        let store = InMemoryEventStore::new();
        store.append(EventBuilder::new(json!(1)).date(old).build()).unwrap();
        let second = store.append(EventBuilder::new(json!(2)).date(now).build()).unwrap();

        let fresh = Arc::new(NullProjector::new("fresh"));
        let ahead = Arc::new(NullProjector::new("ahead"));
        let states = Arc::new(InMemoryStateStore::new());
        states.update("ahead", &second, true).unwrap();

        let worker = Worker::new(registry(vec![fresh.clone(), ahead.clone()]), store, states.clone());
        let report = worker.play_all(&WorkerContext::new()).unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(fresh.on_event_call_count(), 2);
        assert_eq!(ahead.on_event_call_count(), 0);
        assert_eq!(states.latest("fresh").unwrap().unwrap().latest_event_position(), 2);
    }

    #[test]
    fn start_date_uses_lowest_progress_and_caller_bound() {
        let now = Utc::now();
        let store = InMemoryEventStore::new();
        let stored: Vec<Event> = (0..4)
            .map(|i| {
                store
                    .append(EventBuilder::new(json!(i)).date(now - Duration::days(4 - i)).build())
                    .unwrap()
            })
            .collect();

        let a = Arc::new(NullProjector::new("a"));
        let b = Arc::new(NullProjector::new("b"));
        let states = Arc::new(InMemoryStateStore::new());
        states.update("a", &stored[0], true).unwrap();
        states.update("b", &stored[2], true).unwrap();

        let worker = Worker::new(registry(vec![a.clone(), b.clone()]), store, states.clone());
        let report = worker.play_all(&WorkerContext::new()).unwrap();
        // From stored[0]'s date, inclusive.
        assert_eq!(report.processed, 4);
        assert_eq!(a.on_event_call_count(), 3);
        assert_eq!(b.on_event_call_count(), 1);

        let report = worker
            .play_all_from(stored[3].valid_at(), &WorkerContext::new())
            .unwrap();
        assert_eq!(report.processed, 1);
    }

    #[test]
    fn reset_requires_replayable_projector() {
        let store = InMemoryEventStore::new();
        let stored = events(&store, 1);
        let plain = Arc::new(NullProjector::new("plain"));
        let replayable = Arc::new(NullProjector::new("replayable").replayable());
        let states = Arc::new(InMemoryStateStore::new());
        states.update("replayable", &stored[0], true).unwrap();

        let worker = Worker::new(
            registry(vec![plain.clone(), replayable.clone()]),
            store,
            states.clone(),
        );

        assert!(matches!(
            worker.reset("plain").unwrap_err(),
            WorkerError::NotReplayable(_)
        ));
        worker.reset("replayable").unwrap();
        assert_eq!(replayable.reset_call_count(), 1);
        assert!(states.latest("replayable").unwrap().is_none());

        worker.reset_all().unwrap();
        assert_eq!(replayable.reset_call_count(), 2);
    }

    #[test]
    fn reset_context_replays_from_scratch() {
        let store = InMemoryEventStore::new();
        let stored = events(&store, 3);
        let replayable = Arc::new(NullProjector::new("replayable").replayable());
        let states = Arc::new(InMemoryStateStore::new());
        states.update("replayable", &stored[2], true).unwrap();

        let worker = Worker::new(registry(vec![replayable.clone()]), store, states.clone());
        worker.play("replayable", &WorkerContext::new().reset(true)).unwrap();

        assert_eq!(replayable.reset_call_count(), 1);
        assert_eq!(replayable.on_event_call_count(), 3);
    }

    #[test]
    fn observer_panic_propagates_and_releases_locks() {
        let store = Arc::new(InMemoryEventStore::new());
        events(&store, 2);
        let foo = Arc::new(NullProjector::new("foo"));
        let states = Arc::new(InMemoryStateStore::new());
        let panicking = Worker::new(registry(vec![foo.clone()]), store.clone(), states.clone())
            .with_observer(|e: &WorkerEvent| {
                if let WorkerEvent::Next { .. } = e {
                    panic!("observer failure");
                }
            });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            panicking.play_all(&WorkerContext::new())
        }));
        assert!(result.is_err());
        assert!(!states.latest("foo").unwrap().unwrap().is_locked());

        let worker = Worker::new(registry(vec![foo.clone()]), store, states.clone());
        let report = worker.play_all(&WorkerContext::new()).unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(foo.on_event_call_count(), 2);
        assert_eq!(states.latest("foo").unwrap().unwrap().latest_event_position(), 2);
    }

    /// Delegates to an in-memory store but cannot persist projector errors.
    struct UnwritableErrors(InMemoryStateStore);

    impl StateStore for UnwritableErrors {
        fn lock(&self, id: &str, force: bool) -> Result<State, StateStoreError> {
            self.0.lock(id, force)
        }

        fn unlock(&self, id: &str) -> Result<State, StateStoreError> {
            self.0.unlock(id)
        }

        fn update(&self, id: &str, event: &Event, unlock: bool) -> Result<State, StateStoreError> {
            self.0.update(id, event, unlock)
        }

        fn exception(
            &self,
            _id: &str,
            _event: &Event,
            _failure: &ProjectorFailure,
            _unlock: bool,
        ) -> Result<State, StateStoreError> {
            Err(StateStoreError::Storage("state table unavailable".into()))
        }

        fn latest(&self, id: &str) -> Result<Option<State>, StateStoreError> {
            self.0.latest(id)
        }

        fn delete(&self, id: &str) -> Result<(), StateStoreError> {
            self.0.delete(id)
        }
    }

    #[test]
    fn failed_error_write_releases_every_lock() {
        let store = InMemoryEventStore::new();
        events(&store, 2);
        let foo = Arc::new(NullProjector::new("foo"));
        let bar = Arc::new(CallbackProjector::new("bar", |_| Err(ProjectorFailure::new("no"))));
        let states = Arc::new(UnwritableErrors(InMemoryStateStore::new()));

        let worker = Worker::new(registry(vec![foo.clone(), bar.clone()]), store, states.clone());
        let err = worker.play_all(&WorkerContext::new()).unwrap_err();

        assert!(matches!(err, WorkerError::StateStore(StateStoreError::Storage(_))));
        assert!(!states.latest("foo").unwrap().unwrap().is_locked());
        assert!(!states.latest("bar").unwrap().unwrap().is_locked());
    }
}
