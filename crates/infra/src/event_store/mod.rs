//! Append-only event log boundary.
//!
//! The [`EventStore`] trait is what the projection engine consumes: append and
//! amend primitives, a fluent query, counting, and point lookups. Backends:
//!
//! - [`InMemoryEventStore`] for tests and development.
//! - [`PostgresEventStore`] for persistence.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod stream;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::{PgEventStream, PostgresEventStore};
pub use query::{EventFilter, EventQuery};
pub use stream::{EventStream, VecEventStream};
pub use r#trait::{AggregateMetadata, CountPolicy, EventStore, EventStoreError};
