//! Projector test doubles.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Event, Projector, ProjectorFailure, Replayable, RuntimeExcluded};

/// Null-object projector: accepts every event and only counts calls.
///
/// Capabilities can be switched on to exercise replay and runtime-exclusion
/// paths without writing a dedicated type.
#[derive(Debug)]
pub struct NullProjector {
    id: String,
    on_event_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    replayable: bool,
    runtime_excluded: bool,
}

impl NullProjector {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            on_event_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
            replayable: false,
            runtime_excluded: false,
        }
    }

    pub fn replayable(mut self) -> Self {
        self.replayable = true;
        self
    }

    pub fn runtime_excluded(mut self) -> Self {
        self.runtime_excluded = true;
        self
    }

    pub fn on_event_call_count(&self) -> usize {
        self.on_event_calls.load(Ordering::SeqCst)
    }

    pub fn reset_call_count(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }
}

impl Projector for NullProjector {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn on_event(&self, _event: &Event) -> Result<(), ProjectorFailure> {
        self.on_event_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_replayable(&self) -> Option<&dyn Replayable> {
        self.replayable.then_some(self as &dyn Replayable)
    }

    fn as_runtime_excluded(&self) -> Option<&dyn RuntimeExcluded> {
        self.runtime_excluded.then_some(self as &dyn RuntimeExcluded)
    }
}

impl Replayable for NullProjector {
    fn reset(&self) -> Result<(), ProjectorFailure> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RuntimeExcluded for NullProjector {}

type Callback = Box<dyn Fn(&Event) -> Result<(), ProjectorFailure> + Send + Sync>;

/// Projector delegating to a closure.
pub struct CallbackProjector {
    id: String,
    callback: Callback,
    on_event_calls: AtomicUsize,
}

impl CallbackProjector {
    pub fn new<F>(id: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Event) -> Result<(), ProjectorFailure> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            callback: Box::new(callback),
            on_event_calls: AtomicUsize::new(0),
        }
    }

    pub fn on_event_call_count(&self) -> usize {
        self.on_event_calls.load(Ordering::SeqCst)
    }
}

impl Projector for CallbackProjector {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn on_event(&self, event: &Event) -> Result<(), ProjectorFailure> {
        self.on_event_calls.fetch_add(1, Ordering::SeqCst);
        (self.callback)(event)
    }
}

impl core::fmt::Debug for CallbackProjector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackProjector")
            .field("id", &self.id)
            .field("on_event_calls", &self.on_event_call_count())
            .finish_non_exhaustive()
    }
}
