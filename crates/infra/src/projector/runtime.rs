//! Live single-event dispatch.
//!
//! Called right after an event is stored. Every registered projector that is
//! behind the event gets it, in registration order; a failing projector gets
//! its error recorded and the others still run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use evstore_events::{Event, Projector, ProjectorRegistry, invoke};

use super::state::{State, StateStore, StateStoreError};

/// Locking behaviour of live dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeLockPolicy {
    /// No lock: concurrent batch replays race with live dispatch and the
    /// latest state write wins.
    #[default]
    None,
    /// Take a non-blocking lock per projector, skipping projectors held by
    /// someone else.
    TryLock,
}

#[derive(Debug, Clone)]
pub struct RuntimePlayer<S> {
    registry: Arc<ProjectorRegistry>,
    state_store: S,
    lock_policy: RuntimeLockPolicy,
}

impl<S: StateStore> RuntimePlayer<S> {
    pub fn new(registry: Arc<ProjectorRegistry>, state_store: S) -> Self {
        Self {
            registry,
            state_store,
            lock_policy: RuntimeLockPolicy::default(),
        }
    }

    pub fn with_lock_policy(mut self, policy: RuntimeLockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn lock_policy(&self) -> RuntimeLockPolicy {
        self.lock_policy
    }

    /// Dispatch a stored event to every projector behind it.
    ///
    /// Projector failures are recorded on their state and never returned.
    /// Only state store failures abort the dispatch.
    pub fn dispatch(&self, event: &Event) -> Result<(), StateStoreError> {
        for projector in self.registry.all() {
            let id = projector.identifier();
            if projector.as_runtime_excluded().is_some() {
                debug!(projector = id, "projector excluded from runtime dispatch");
                continue;
            }

            match self.lock_policy {
                RuntimeLockPolicy::None => {
                    let state = self.state_store.latest(id)?;
                    if is_behind(state.as_ref(), event) {
                        self.play(projector.as_ref(), event)?;
                    }
                }
                RuntimeLockPolicy::TryLock => {
                    let state = match self.state_store.lock(id, false) {
                        Ok(state) => state,
                        Err(StateStoreError::Locked(_)) => {
                            info!(
                                projector = id,
                                position = event.position(),
                                "projector is locked, skipping runtime dispatch"
                            );
                            continue;
                        }
                        Err(err) => return Err(err),
                    };
                    if is_behind(Some(&state), event) {
                        self.play(projector.as_ref(), event)?;
                    } else {
                        self.state_store.unlock(id)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Invoke one projector and persist the outcome, releasing any lock.
    fn play(&self, projector: &dyn Projector, event: &Event) -> Result<State, StateStoreError> {
        let id = projector.identifier();
        match invoke(projector, event) {
            Ok(()) => self.state_store.update(id, event, true),
            Err(failure) => {
                warn!(
                    projector = id,
                    position = event.position(),
                    error = %failure,
                    "projector failed during runtime dispatch"
                );
                self.state_store.exception(id, event, &failure, true)
            }
        }
    }
}

fn is_behind(state: Option<&State>, event: &Event) -> bool {
    state.is_none_or(|s| s.latest_event_position() < event.position())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::InMemoryStateStore;
    use chrono::Utc;
    use evstore_events::testing::{CallbackProjector, NullProjector};
    use evstore_events::{EventBuilder, ProjectorFailure};
    use serde_json::json;

    fn event_at(position: u64) -> Event {
        EventBuilder::new(json!({})).build().stored_at(position, 1, Utc::now())
    }

    fn player(
        projectors: Vec<Arc<dyn Projector>>,
        states: Arc<InMemoryStateStore>,
    ) -> RuntimePlayer<Arc<InMemoryStateStore>> {
        RuntimePlayer::new(
            Arc::new(ProjectorRegistry::with_projectors(projectors)),
            states,
        )
    }

    #[test]
    fn empty_registry_does_nothing() {
        let states = Arc::new(InMemoryStateStore::new());
        player(vec![], states.clone()).dispatch(&event_at(3)).unwrap();
        assert!(states.latest("foo").unwrap().is_none());
    }

    #[test]
    fn failure_does_not_block_others() {
        let foo = Arc::new(CallbackProjector::new("foo", |_| {
            Err(ProjectorFailure::new("I shall not fail."))
        }));
        let bar = Arc::new(NullProjector::new("bar"));
        let states = Arc::new(InMemoryStateStore::new());

        player(vec![foo.clone(), bar.clone()], states.clone())
            .dispatch(&event_at(4))
            .unwrap();

        assert_eq!(foo.on_event_call_count(), 1);
        assert_eq!(bar.on_event_call_count(), 1);

        let foo_state = states.latest("foo").unwrap().unwrap();
        assert!(foo_state.is_error());
        assert_eq!(foo_state.latest_event_position(), 4);
        assert_eq!(foo_state.error_message(), Some("I shall not fail."));

        let bar_state = states.latest("bar").unwrap().unwrap();
        assert!(!bar_state.is_error());
        assert_eq!(bar_state.latest_event_position(), 4);
    }

    #[test]
    fn already_played_events_are_not_replayed() {
        let foo = Arc::new(NullProjector::new("foo"));
        let bar = Arc::new(NullProjector::new("bar"));
        let states = Arc::new(InMemoryStateStore::new());
        states.update("bar", &event_at(7), true).unwrap();

        player(vec![foo.clone(), bar.clone()], states.clone())
            .dispatch(&event_at(4))
            .unwrap();

        assert_eq!(foo.on_event_call_count(), 1);
        assert_eq!(bar.on_event_call_count(), 0);
        assert_eq!(states.latest("foo").unwrap().unwrap().latest_event_position(), 4);
        assert_eq!(states.latest("bar").unwrap().unwrap().latest_event_position(), 7);
    }

    #[test]
    fn dispatching_twice_invokes_once() {
        let foo = Arc::new(NullProjector::new("foo"));
        let states = Arc::new(InMemoryStateStore::new());
        let player = player(vec![foo.clone()], states);

        let event = event_at(5);
        player.dispatch(&event).unwrap();
        player.dispatch(&event).unwrap();

        assert_eq!(foo.on_event_call_count(), 1);
    }

    #[test]
    fn runtime_excluded_projectors_are_skipped() {
        let manual = Arc::new(NullProjector::new("manual").runtime_excluded());
        let states = Arc::new(InMemoryStateStore::new());

        player(vec![manual.clone()], states.clone())
            .dispatch(&event_at(1))
            .unwrap();

        assert_eq!(manual.on_event_call_count(), 0);
        assert!(states.latest("manual").unwrap().is_none());
    }

    #[test]
    fn try_lock_skips_locked_projectors() {
        let foo = Arc::new(NullProjector::new("foo"));
        let bar = Arc::new(NullProjector::new("bar"));
        let states = Arc::new(InMemoryStateStore::new());
        states.lock("bar", false).unwrap();

        let player = player(vec![foo.clone(), bar.clone()], states.clone())
            .with_lock_policy(RuntimeLockPolicy::TryLock);
        player.dispatch(&event_at(2)).unwrap();

        assert_eq!(foo.on_event_call_count(), 1);
        assert_eq!(bar.on_event_call_count(), 0);

        let foo_state = states.latest("foo").unwrap().unwrap();
        assert!(!foo_state.is_locked());
        assert_eq!(foo_state.latest_event_position(), 2);

        let bar_state = states.latest("bar").unwrap().unwrap();
        assert!(bar_state.is_locked());
        assert_eq!(bar_state.latest_event_position(), 0);
    }

    #[test]
    fn try_lock_releases_when_nothing_to_play() {
        let foo = Arc::new(NullProjector::new("foo"));
        let states = Arc::new(InMemoryStateStore::new());
        states.update("foo", &event_at(9), true).unwrap();

        player(vec![foo.clone()], states.clone())
            .with_lock_policy(RuntimeLockPolicy::TryLock)
            .dispatch(&event_at(3))
            .unwrap();

        assert_eq!(foo.on_event_call_count(), 0);
        assert!(!states.latest("foo").unwrap().unwrap().is_locked());
    }
}
