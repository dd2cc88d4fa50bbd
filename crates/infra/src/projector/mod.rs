//! Projection engine: state tracking, live dispatch and batch replay.
//!
//! - [`StateStore`] keeps per-projector progress, errors and locks.
//! - [`RuntimePlayer`] fans a freshly stored event out to projectors.
//! - [`Worker`] replays history into one or more projectors.

pub mod error;
pub mod in_memory;
pub mod notify;
pub mod postgres;
pub mod runtime;
pub mod state;
pub mod status;
pub mod worker;

pub use error::WorkerError;
pub use in_memory::InMemoryStateStore;
pub use notify::{TracingObserver, WorkerEvent, WorkerObserver};
pub use postgres::PostgresStateStore;
pub use runtime::{RuntimeLockPolicy, RuntimePlayer};
pub use state::{ProjectorLockedError, State, StateFailure, StateStore, StateStoreError};
pub use status::ProjectorStatus;
pub use worker::{PlaybackReport, Worker, WorkerContext};
