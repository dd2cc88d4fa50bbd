//! Events and the projectors that consume them.

pub mod builder;
pub mod event;
pub mod projector;
pub mod registry;
pub mod testing;

pub use builder::{Amendment, EventBuilder, Failure, NewEvent};
pub use event::{DEFAULT_AGGREGATE_TYPE, DEFAULT_NAMESPACE, Event, EventParts, Payload};
pub use projector::{
    Projector, ProjectorFailure, Replayable, RuntimeExcluded, invoke, invoke_reset,
    is_replayable, is_runtime_excluded,
};
pub use registry::{ProjectorDoesNotExistError, ProjectorRegistry};
