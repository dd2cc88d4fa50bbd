//! Per-projector progress tracking.
//!
//! A [`State`] records how far a projector got in the log, whether its last
//! event failed, and whether a run currently holds it. States are created on
//! first access and only mutated through a [`StateStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use evstore_events::{Event, ProjectorFailure};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("projector '{0}' is locked")]
pub struct ProjectorLockedError(pub String);

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error(transparent)]
    Locked(#[from] ProjectorLockedError),

    #[error("state store error: {0}")]
    Storage(String),
}

/// Error recorded on a state by a failing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFailure {
    pub code: i64,
    pub message: String,
    pub trace: Option<String>,
}

impl From<&ProjectorFailure> for StateFailure {
    fn from(failure: &ProjectorFailure) -> Self {
        Self {
            code: failure.code(),
            message: failure.message().to_string(),
            trace: failure.trace().map(str::to_string),
        }
    }
}

/// Progress of one projector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub(crate) id: String,
    pub(crate) latest_event_position: u64,
    pub(crate) latest_event_date: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) locked: bool,
    pub(crate) failure: Option<StateFailure>,
}

impl State {
    /// State of a projector that never processed anything.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            latest_event_position: 0,
            latest_event_date: None,
            created_at: now,
            updated_at: now,
            locked: false,
            failure: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn latest_event_position(&self) -> u64 {
        self.latest_event_position
    }

    pub fn latest_event_date(&self) -> Option<DateTime<Utc>> {
        self.latest_event_date
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_error(&self) -> bool {
        self.failure.is_some()
    }

    pub fn error(&self) -> Option<&StateFailure> {
        self.failure.as_ref()
    }

    pub fn error_code(&self) -> i64 {
        self.failure.as_ref().map_or(0, |f| f.code)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }

    pub fn error_trace(&self) -> Option<&str> {
        self.failure.as_ref().and_then(|f| f.trace.as_deref())
    }

    /// Move progress to `event`, never backwards.
    pub(crate) fn advance(&mut self, event: &Event) {
        if event.position() >= self.latest_event_position {
            self.latest_event_position = event.position();
            self.latest_event_date = Some(event.valid_at());
        }
        self.updated_at = Utc::now();
    }
}

/// Persistence of projector states.
///
/// `lock` MUST be an atomic compare-and-set against the backing storage: two
/// concurrent callers can never both get the lock.
pub trait StateStore: Send + Sync {
    /// Take the lock. Fails with [`ProjectorLockedError`] when already locked,
    /// unless `force` is set.
    fn lock(&self, id: &str, force: bool) -> Result<State, StateStoreError>;

    /// Release the lock unconditionally.
    fn unlock(&self, id: &str) -> Result<State, StateStoreError>;

    /// Record successful processing of `event` and clear any previous error.
    fn update(&self, id: &str, event: &Event, unlock: bool) -> Result<State, StateStoreError>;

    /// Record a failure on `event`. Progress still moves to `event`.
    fn exception(
        &self,
        id: &str,
        event: &Event,
        failure: &ProjectorFailure,
        unlock: bool,
    ) -> Result<State, StateStoreError>;

    /// Shorthand for [`StateStore::exception`] with a plain message.
    fn error(
        &self,
        id: &str,
        event: &Event,
        message: &str,
        code: i64,
        unlock: bool,
    ) -> Result<State, StateStoreError> {
        self.exception(id, event, &ProjectorFailure::new(message).with_code(code), unlock)
    }

    fn latest(&self, id: &str) -> Result<Option<State>, StateStoreError>;

    /// Forget a projector entirely. Reserved to resets of replayable projectors.
    fn delete(&self, id: &str) -> Result<(), StateStoreError>;
}

impl<S> StateStore for Arc<S>
where
    S: StateStore + ?Sized,
{
    fn lock(&self, id: &str, force: bool) -> Result<State, StateStoreError> {
        (**self).lock(id, force)
    }

    fn unlock(&self, id: &str) -> Result<State, StateStoreError> {
        (**self).unlock(id)
    }

    fn update(&self, id: &str, event: &Event, unlock: bool) -> Result<State, StateStoreError> {
        (**self).update(id, event, unlock)
    }

    fn exception(
        &self,
        id: &str,
        event: &Event,
        failure: &ProjectorFailure,
        unlock: bool,
    ) -> Result<State, StateStoreError> {
        (**self).exception(id, event, failure, unlock)
    }

    fn error(
        &self,
        id: &str,
        event: &Event,
        message: &str,
        code: i64,
        unlock: bool,
    ) -> Result<State, StateStoreError> {
        (**self).error(id, event, message, code, unlock)
    }

    fn latest(&self, id: &str) -> Result<Option<State>, StateStoreError> {
        (**self).latest(id)
    }

    fn delete(&self, id: &str) -> Result<(), StateStoreError> {
        (**self).delete(id)
    }
}
