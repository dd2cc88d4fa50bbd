use thiserror::Error;

use evstore_events::{ProjectorDoesNotExistError, ProjectorFailure};

use super::state::StateStoreError;
use crate::event_store::EventStoreError;

/// Batch replay error.
///
/// Per-event projector failures are never reported here: they are recorded
/// on the projector state and notified. Only target resolution problems and
/// storage failures abort a run.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    DoesNotExist(#[from] ProjectorDoesNotExistError),

    #[error("missing projector: {0}")]
    MissingProjector(String),

    #[error("projector '{0}' is not replayable")]
    NotReplayable(String),

    #[error("reset of projector '{id}' failed: {failure}")]
    ResetFailed {
        id: String,
        failure: ProjectorFailure,
    },

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),
}
