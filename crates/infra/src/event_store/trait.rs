use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use evstore_core::AggregateId;
use evstore_events::{Amendment, Event, NewEvent};

use super::query::{EventFilter, EventQuery};
use super::stream::EventStream;

/// Event store operation error.
///
/// Infrastructure errors only. Invalid query arguments are reported as
/// `CoreError::InvalidArgument` by the query builder before anything reaches
/// the store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event not found: {0}")]
    NotFound(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// How `count` answers when the query allows an estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountPolicy {
    /// Always count matching events.
    Exact,
    /// Use the backend's cheap estimate of the whole log when the query only
    /// paginates and the caller allowed it.
    #[default]
    Approximate,
}

/// What the store knows about an aggregate, fixed by its first event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMetadata {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub aggregate_root: Option<AggregateId>,
    pub namespace: String,
    pub latest_revision: u64,
    pub created_at: DateTime<Utc>,
}

/// Append-only event log with a query surface.
///
/// ## Ordering keys
///
/// - `position`: global, strictly increasing, assigned at append and never
///   reused. Total order of the log.
/// - `revision`: per aggregate, starting at 1 and incremented by one for every
///   event of that aggregate.
///
/// Results of [`EventStore::execute`] are ordered by `valid_at` then
/// `position`, both reversed when the filter asks for it.
///
/// ## Aggregate metadata
///
/// The first event of an aggregate fixes its type, root and namespace. Later
/// events inherit them; an event explicitly naming a different type is
/// rejected with [`EventStoreError::AggregateTypeMismatch`].
pub trait EventStore: Send + Sync {
    /// Persist a new event and return it with its ordering keys.
    fn append(&self, event: NewEvent) -> Result<Event, EventStoreError>;

    /// Amend a stored event. Position, revision and payload never change.
    fn update(&self, position: u64, amendment: Amendment) -> Result<Event, EventStoreError>;

    /// Run a filter and return the matching events.
    fn execute(&self, filter: &EventFilter) -> Result<Box<dyn EventStream>, EventStoreError>;

    /// Count events matching a filter, ignoring its limit.
    fn count(&self, filter: &EventFilter) -> Result<u64, EventStoreError>;

    fn find_by_position(&self, position: u64) -> Result<Option<Event>, EventStoreError>;

    fn find_by_revision(
        &self,
        aggregate_id: AggregateId,
        revision: u64,
    ) -> Result<Option<Event>, EventStoreError>;

    fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool, EventStoreError>;

    fn find_aggregate_metadata(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateMetadata>, EventStoreError>;

    /// Start a fluent query bound to this store.
    fn query(&self) -> EventQuery<'_>
    where
        Self: Sized,
    {
        EventQuery::new(self)
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(&self, event: NewEvent) -> Result<Event, EventStoreError> {
        (**self).append(event)
    }

    fn update(&self, position: u64, amendment: Amendment) -> Result<Event, EventStoreError> {
        (**self).update(position, amendment)
    }

    fn execute(&self, filter: &EventFilter) -> Result<Box<dyn EventStream>, EventStoreError> {
        (**self).execute(filter)
    }

    fn count(&self, filter: &EventFilter) -> Result<u64, EventStoreError> {
        (**self).count(filter)
    }

    fn find_by_position(&self, position: u64) -> Result<Option<Event>, EventStoreError> {
        (**self).find_by_position(position)
    }

    fn find_by_revision(
        &self,
        aggregate_id: AggregateId,
        revision: u64,
    ) -> Result<Option<Event>, EventStoreError> {
        (**self).find_by_revision(aggregate_id, revision)
    }

    fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool, EventStoreError> {
        (**self).aggregate_exists(aggregate_id)
    }

    fn find_aggregate_metadata(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateMetadata>, EventStoreError> {
        (**self).find_aggregate_metadata(aggregate_id)
    }
}
