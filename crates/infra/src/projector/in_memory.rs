use std::collections::HashMap;
use std::sync::RwLock;

use evstore_events::{Event, ProjectorFailure};

use super::state::{ProjectorLockedError, State, StateFailure, StateStore, StateStoreError};

/// In-memory state store.
///
/// Every operation runs under one write lock, which makes `lock` atomic.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, State>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut State) -> Result<T, StateStoreError>,
    ) -> Result<T, StateStoreError> {
        let mut states = self
            .states
            .write()
            .map_err(|_| StateStoreError::Storage("lock poisoned".to_string()))?;
        let state = states
            .entry(id.to_string())
            .or_insert_with(|| State::new(id));
        f(state)
    }
}

impl StateStore for InMemoryStateStore {
    fn lock(&self, id: &str, force: bool) -> Result<State, StateStoreError> {
        self.with_state(id, |state| {
            if state.locked && !force {
                return Err(ProjectorLockedError(id.to_string()).into());
            }
            state.locked = true;
            Ok(state.clone())
        })
    }

    fn unlock(&self, id: &str) -> Result<State, StateStoreError> {
        self.with_state(id, |state| {
            state.locked = false;
            Ok(state.clone())
        })
    }

    fn update(&self, id: &str, event: &Event, unlock: bool) -> Result<State, StateStoreError> {
        self.with_state(id, |state| {
            state.advance(event);
            state.failure = None;
            if unlock {
                state.locked = false;
            }
            Ok(state.clone())
        })
    }

    fn exception(
        &self,
        id: &str,
        event: &Event,
        failure: &ProjectorFailure,
        unlock: bool,
    ) -> Result<State, StateStoreError> {
        self.with_state(id, |state| {
            state.advance(event);
            state.failure = Some(StateFailure::from(failure));
            if unlock {
                state.locked = false;
            }
            Ok(state.clone())
        })
    }

    fn latest(&self, id: &str) -> Result<Option<State>, StateStoreError> {
        let states = self
            .states
            .read()
            .map_err(|_| StateStoreError::Storage("lock poisoned".to_string()))?;
        Ok(states.get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<(), StateStoreError> {
        let mut states = self
            .states
            .write()
            .map_err(|_| StateStoreError::Storage("lock poisoned".to_string()))?;
        states.remove(id);
        Ok(())
    }
}
