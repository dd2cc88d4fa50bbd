//! Projector listing for operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evstore_events::ProjectorRegistry;

use super::state::{StateFailure, StateStore, StateStoreError};

/// Snapshot of one registered projector and its progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorStatus {
    pub id: String,
    /// `None` when the projector never ran.
    pub position: Option<u64>,
    pub date: Option<DateTime<Utc>>,
    pub locked: bool,
    pub error: Option<StateFailure>,
    pub runtime_enabled: bool,
    pub replayable: bool,
}

/// Status of every registered projector, in registration order.
///
/// Read-only: projectors that never ran are reported without creating a state.
pub fn list<S>(registry: &ProjectorRegistry, store: &S) -> Result<Vec<ProjectorStatus>, StateStoreError>
where
    S: StateStore + ?Sized,
{
    registry
        .all()
        .iter()
        .map(|projector| {
            let id = projector.identifier();
            let state = store.latest(id)?;
            Ok(ProjectorStatus {
                id: id.to_string(),
                position: state.as_ref().map(|s| s.latest_event_position()),
                date: state.as_ref().and_then(|s| s.latest_event_date()),
                locked: state.as_ref().is_some_and(|s| s.is_locked()),
                error: state.as_ref().and_then(|s| s.error().cloned()),
                runtime_enabled: projector.as_runtime_excluded().is_none(),
                replayable: projector.as_replayable().is_some(),
            })
        })
        .collect()
}
