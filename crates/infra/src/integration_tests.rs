//! Integration tests for the projection pipeline.
//!
//! Tests: EventStore → RuntimePlayer / Worker → Projector → StateStore
//!
//! Verifies:
//! - Stored events get strictly increasing positions and revisions
//! - Live dispatch and batch replay agree on projector progress
//! - Failures stay isolated to the failing projector
//! - Locks are honoured across concurrent runs

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    use evstore_core::AggregateId;
    use evstore_events::testing::{CallbackProjector, NullProjector};
    use evstore_events::{
        Event, EventBuilder, Projector, ProjectorFailure, ProjectorRegistry, Replayable,
    };

    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::projector::{
        InMemoryStateStore, RuntimeLockPolicy, RuntimePlayer, StateStore, StateStoreError,
        Worker, WorkerContext, WorkerError, WorkerEvent, status,
    };

    /// Read model counting events per aggregate.
    #[derive(Default)]
    struct CountingProjector {
        counts: Mutex<HashMap<AggregateId, u64>>,
    }

    impl CountingProjector {
        fn count(&self, id: AggregateId) -> u64 {
            self.counts.lock().unwrap().get(&id).copied().unwrap_or(0)
        }
    }

    impl Projector for CountingProjector {
        fn identifier(&self) -> &str {
            "counting"
        }

        fn on_event(&self, event: &Event) -> Result<(), ProjectorFailure> {
            *self
                .counts
                .lock()
                .map_err(|_| ProjectorFailure::new("read model poisoned"))?
                .entry(event.aggregate_id())
                .or_default() += 1;
            Ok(())
        }

        fn as_replayable(&self) -> Option<&dyn Replayable> {
            Some(self)
        }
    }

    impl Replayable for CountingProjector {
        fn reset(&self) -> Result<(), ProjectorFailure> {
            self.counts
                .lock()
                .map_err(|_| ProjectorFailure::new("read model poisoned"))?
                .clear();
            Ok(())
        }
    }

    fn setup() {
        evstore_observability::init();
    }

    fn append(store: &InMemoryEventStore, aggregate: AggregateId, name: &str) -> Event {
        store
            .append(
                EventBuilder::new(json!({ "name": name }))
                    .name(name)
                    .aggregate(Some("order"), Some(aggregate))
                    .build(),
            )
            .unwrap()
    }

    #[test]
    fn live_dispatch_then_replay_is_consistent() -> anyhow::Result<()> {
        setup();
        let store = Arc::new(InMemoryEventStore::new());
        let states = Arc::new(InMemoryStateStore::new());
        let counting = Arc::new(CountingProjector::default());
        let registry = Arc::new(ProjectorRegistry::with_projectors([
            counting.clone() as Arc<dyn Projector>
        ]));
        let player = RuntimePlayer::new(registry.clone(), states.clone());

        let order = AggregateId::new();
        for name in ["order.placed", "order.paid", "order.shipped"] {
            let event = append(&store, order, name);
            player.dispatch(&event)?;
        }
        assert_eq!(counting.count(order), 3);

        // Nothing left to replay.
        let worker = Worker::new(registry.clone(), store.clone(), states.clone());
        let report = worker.play_all(&WorkerContext::new())?;
        assert_eq!(counting.count(order), 3);
        assert!(report.failed.is_empty());

        // A reset rebuilds the read model from scratch.
        worker.play("counting", &WorkerContext::new().reset(true))?;
        assert_eq!(counting.count(order), 3);

        let state = states
            .latest("counting")?
            .ok_or_else(|| anyhow::anyhow!("state missing after replay"))?;
        assert_eq!(state.latest_event_position(), 3);
        Ok(())
    }

    #[test]
    fn replay_starts_from_beginning_when_a_projector_never_ran() {
        setup();
        let store = Arc::new(InMemoryEventStore::new());
        let now = Utc::now();
        let stored: Vec<Event> = (0..6i64)
            .map(|i| {
                store
                    .append(
                        EventBuilder::new(json!(i))
                            .date(now - Duration::hours(6 - i))
                            .build(),
                    )
                    .unwrap()
            })
            .collect();

        let fresh = Arc::new(NullProjector::new("fresh"));
        let advanced = Arc::new(NullProjector::new("advanced"));
        let states = Arc::new(InMemoryStateStore::new());
        states.update("advanced", &stored[4], true).unwrap();

        let registry = Arc::new(ProjectorRegistry::with_projectors([
            fresh.clone() as Arc<dyn Projector>,
            advanced.clone(),
        ]));
        let report = Worker::new(registry, store, states.clone())
            .play_all(&WorkerContext::new())
            .unwrap();

        assert_eq!(report.processed, 6);
        assert_eq!(fresh.on_event_call_count(), 6);
        assert_eq!(advanced.on_event_call_count(), 1);
    }

    #[test]
    fn failing_projector_is_isolated() -> anyhow::Result<()> {
        setup();
        let store = Arc::new(InMemoryEventStore::new());
        let order = AggregateId::new();
        for name in ["a", "b", "c"] {
            append(&store, order, name);
        }

        let healthy = Arc::new(NullProjector::new("healthy"));
        let thrower = Arc::new(CallbackProjector::new("thrower", |event| {
            if event.position() == 2 {
                Err(ProjectorFailure::new("cannot handle b").with_code(42))
            } else {
                Ok(())
            }
        }));
        let states = Arc::new(InMemoryStateStore::new());
        let errors = Arc::new(Mutex::new(0usize));
        let sink = errors.clone();

        let registry = Arc::new(ProjectorRegistry::with_projectors([
            healthy.clone() as Arc<dyn Projector>,
            thrower.clone(),
        ]));
        Worker::new(registry, store, states.clone())
            .with_observer(move |e: &WorkerEvent| {
                if matches!(e, WorkerEvent::Error { .. }) {
                    *sink.lock().unwrap() += 1;
                }
            })
            .play_all(&WorkerContext::new())?;

        assert_eq!(*errors.lock().unwrap(), 1);

        let thrower_state = states
            .latest("thrower")?
            .ok_or_else(|| anyhow::anyhow!("thrower has no state"))?;
        assert_eq!(thrower_state.latest_event_position(), 2);
        assert!(thrower_state.is_error());
        assert_eq!(thrower_state.error_code(), 42);

        let healthy_state = states
            .latest("healthy")?
            .ok_or_else(|| anyhow::anyhow!("healthy has no state"))?;
        assert_eq!(healthy_state.latest_event_position(), 3);
        assert!(!healthy_state.is_error());
        Ok(())
    }

    #[test]
    fn empty_registry_writes_no_state() {
        setup();
        let states = Arc::new(InMemoryStateStore::new());
        let worker = Worker::new(
            Arc::new(ProjectorRegistry::new()),
            InMemoryEventStore::new(),
            states.clone(),
        );

        assert!(matches!(
            worker.play_all(&WorkerContext::new()),
            Err(WorkerError::MissingProjector(_))
        ));
        let listed = status::list(&ProjectorRegistry::new(), &*states).unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn runtime_try_lock_yields_to_running_worker() {
        setup();
        let store = Arc::new(InMemoryEventStore::new());
        let states = Arc::new(InMemoryStateStore::new());
        let foo = Arc::new(NullProjector::new("foo"));
        let registry = Arc::new(ProjectorRegistry::with_projectors([
            foo.clone() as Arc<dyn Projector>
        ]));

        // A replay in progress holds the lock.
        states.lock("foo", false).unwrap();

        let event = append(&store, AggregateId::new(), "x");
        RuntimePlayer::new(registry.clone(), states.clone())
            .with_lock_policy(RuntimeLockPolicy::TryLock)
            .dispatch(&event)
            .unwrap();
        assert_eq!(foo.on_event_call_count(), 0);

        // Once released, the next replay catches up.
        states.unlock("foo").unwrap();
        Worker::new(registry, store, states.clone())
            .play("foo", &WorkerContext::new())
            .unwrap();
        assert_eq!(foo.on_event_call_count(), 1);
    }

    #[test]
    fn lock_twice_is_rejected() {
        let states = InMemoryStateStore::new();
        states.lock("foo", false).unwrap();
        assert!(matches!(
            states.lock("foo", false),
            Err(StateStoreError::Locked(_))
        ));
    }

    #[test]
    fn concurrent_workers_never_share_a_projector() {
        setup();
        let store = Arc::new(InMemoryEventStore::new());
        for i in 0..50 {
            append(&store, AggregateId::new(), &format!("e{i}"));
        }
        let states = Arc::new(InMemoryStateStore::new());
        let foo = Arc::new(NullProjector::new("foo"));
        let registry = Arc::new(ProjectorRegistry::with_projectors([
            foo.clone() as Arc<dyn Projector>
        ]));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let worker = Worker::new(registry.clone(), store.clone(), states.clone());
                std::thread::spawn(move || worker.play("foo", &WorkerContext::new()))
            })
            .collect();

        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) | Err(WorkerError::MissingProjector(_)) => {}
                Err(other) => panic!("unexpected worker error: {other}"),
            }
        }

        // Each event reaches the projector exactly once overall.
        assert_eq!(foo.on_event_call_count(), 50);
        let state = states.latest("foo").unwrap().unwrap();
        assert_eq!(state.latest_event_position(), 50);
        assert!(!state.is_locked());
    }

    proptest! {
        #[test]
        fn assigned_keys_are_strictly_increasing(aggregates in prop::collection::vec(0usize..4, 1..40)) {
            let store = InMemoryEventStore::new();
            let ids: Vec<AggregateId> = (0..4).map(|_| AggregateId::new()).collect();

            let stored: Vec<Event> = aggregates
                .iter()
                .map(|i| append(&store, ids[*i], "tick"))
                .collect();

            for pair in stored.windows(2) {
                prop_assert!(pair[1].position() > pair[0].position());
            }
            for id in &ids {
                let revisions: Vec<u64> = stored
                    .iter()
                    .filter(|e| e.aggregate_id() == *id)
                    .map(Event::revision)
                    .collect();
                for (expected, revision) in (1u64..).zip(&revisions) {
                    prop_assert_eq!(*revision, expected);
                }
            }
        }
    }
}
