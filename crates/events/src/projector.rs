//! Read-model consumers ("projectors").
//!
//! A projector materializes a read model by reacting to events in log order.
//! The base capability is [`Projector`]; optional refinements are exposed
//! through capability lookups (`as_replayable`, `as_runtime_excluded`) instead
//! of type inspection:
//!
//! - [`Replayable`]: can drop its read model and be replayed from scratch.
//! - [`RuntimeExcluded`]: skipped by live dispatch, only driven by explicit
//!   batch replays (one-shot migrations, expensive rebuilds).
//!
//! Progress is NOT tracked by the projector itself; the state store keeps it
//! under the projector's [`Projector::identifier`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Event;

/// Failure raised by a projector while handling an event.
///
/// Opaque to the core: it is recorded on the projector state (message, code,
/// trace) and reported, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProjectorFailure {
    message: String,
    code: i64,
    trace: Option<String>,
}

impl ProjectorFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: 0,
            trace: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Capture any error, keeping its source chain as the trace.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        let failure = Self::new(err.to_string());
        if chain.is_empty() {
            failure
        } else {
            failure.with_trace(chain.join("\ncaused by: "))
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "projector panicked".to_string()
        };
        Self::new(message).with_trace("panic")
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }
}

/// Base projector capability.
pub trait Projector: Send + Sync {
    /// Stable identifier, used as the state store key.
    fn identifier(&self) -> &str;

    /// React to a single event.
    ///
    /// Any error (or panic) is treated as a failure of this projector only.
    fn on_event(&self, event: &Event) -> Result<(), ProjectorFailure>;

    /// Date of the last event the read model itself knows about, if tracked.
    fn last_processed_event_date(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Event names this projector reacts to, `None` meaning "all".
    fn handled_events(&self) -> Option<Vec<String>> {
        None
    }

    fn as_replayable(&self) -> Option<&dyn Replayable> {
        None
    }

    fn as_runtime_excluded(&self) -> Option<&dyn RuntimeExcluded> {
        None
    }
}

/// Projector whose read model can be dropped and rebuilt.
pub trait Replayable: Projector {
    /// Delete everything and prepare for a full replay.
    fn reset(&self) -> Result<(), ProjectorFailure>;
}

/// Marker: never called by live dispatch.
pub trait RuntimeExcluded: Projector {}

pub fn is_replayable(projector: &dyn Projector) -> bool {
    projector.as_replayable().is_some()
}

pub fn is_runtime_excluded(projector: &dyn Projector) -> bool {
    projector.as_runtime_excluded().is_some()
}

/// Invoke a projector, folding panics into a [`ProjectorFailure`].
///
/// This is the single entry point the dispatch paths use, so a failing
/// projector always comes back as a value the caller must handle.
pub fn invoke(projector: &dyn Projector, event: &Event) -> Result<(), ProjectorFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| projector.on_event(event))) {
        Ok(result) => result,
        Err(payload) => Err(ProjectorFailure::from_panic(payload)),
    }
}

/// Reset a replayable projector, folding panics into a [`ProjectorFailure`].
pub fn invoke_reset(projector: &dyn Replayable) -> Result<(), ProjectorFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| projector.reset())) {
        Ok(result) => result,
        Err(payload) => Err(ProjectorFailure::from_panic(payload)),
    }
}
