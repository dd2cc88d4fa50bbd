//! Worker progress notifications.
//!
//! Observers are called synchronously, in registration order, from the
//! worker's own call stack. A panicking observer aborts the run like any
//! other panic in the caller.

use tracing::{debug, error, info, warn};

use super::state::State;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A run starts over `total` events (possibly an estimate).
    Begin { total: u64 },
    /// Event number `index` (1-based) is about to be played.
    Next { total: u64, index: u64 },
    /// A projector failed on event `index` and stops for this run.
    Error { total: u64, index: u64, state: State },
    /// No projector could take event `index`; the run stops.
    Broken { total: u64, index: u64 },
    /// The run is over after `index` events.
    End { total: u64, index: u64 },
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Begin { .. } => "begin",
            WorkerEvent::Next { .. } => "next",
            WorkerEvent::Error { .. } => "error",
            WorkerEvent::Broken { .. } => "broken",
            WorkerEvent::End { .. } => "end",
        }
    }
}

pub trait WorkerObserver: Send + Sync {
    fn notify(&self, event: &WorkerEvent);
}

impl<F> WorkerObserver for F
where
    F: Fn(&WorkerEvent) + Send + Sync,
{
    fn notify(&self, event: &WorkerEvent) {
        self(event)
    }
}

/// Observer turning notifications into log records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WorkerObserver for TracingObserver {
    fn notify(&self, event: &WorkerEvent) {
        match event {
            WorkerEvent::Begin { total } => info!(total, "replay started"),
            WorkerEvent::Next { total, index } => debug!(total, index, "replaying event"),
            WorkerEvent::Error {
                total,
                index,
                state,
            } => warn!(
                total,
                index,
                projector = state.id(),
                position = state.latest_event_position(),
                error = state.error_message().unwrap_or_default(),
                "projector failed"
            ),
            WorkerEvent::Broken { total, index } => {
                error!(total, index, "no projector accepted the event, replay aborted")
            }
            WorkerEvent::End { total, index } => info!(total, index, "replay finished"),
        }
    }
}
