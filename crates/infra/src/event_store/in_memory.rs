use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use evstore_core::AggregateId;
use evstore_events::{Amendment, DEFAULT_AGGREGATE_TYPE, DEFAULT_NAMESPACE, Event, NewEvent};

use super::query::EventFilter;
use super::r#trait::{AggregateMetadata, CountPolicy, EventStore, EventStoreError};
use super::stream::{EventStream, VecEventStream};

#[derive(Debug, Default)]
struct Log {
    /// Indexed by `position - 1`.
    events: Vec<Event>,
    aggregates: HashMap<AggregateId, AggregateMetadata>,
}

/// In-memory event log.
///
/// Intended for tests/dev. Queries scan the whole log.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
    count_policy: CountPolicy,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count_policy(mut self, policy: CountPolicy) -> Self {
        self.count_policy = policy;
        self
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Log>, EventStoreError> {
        self.log
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Log>, EventStoreError> {
        self.log
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))
    }

    fn use_estimate(&self, filter: &EventFilter) -> bool {
        self.count_policy == CountPolicy::Approximate
            && filter.is_approximate_count_allowed()
            && filter.is_approximate_count_possible()
    }

    fn select(log: &Log, filter: &EventFilter) -> Vec<Event> {
        let mut selected: Vec<Event> = log
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        selected.sort_by(|a, b| {
            a.valid_at()
                .cmp(&b.valid_at())
                .then(a.position().cmp(&b.position()))
        });
        if filter.is_reverse() {
            selected.reverse();
        }
        if filter.limit_value() > 0 {
            selected.truncate(usize::try_from(filter.limit_value()).unwrap_or(usize::MAX));
        }
        selected
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, event: NewEvent) -> Result<Event, EventStoreError> {
        let mut log = self.write()?;
        let now = Utc::now();
        let aggregate_id = event.aggregate_id();

        let metadata = match log.aggregates.get(&aggregate_id) {
            Some(existing) => {
                if let Some(requested) = event.aggregate_type() {
                    if requested != existing.aggregate_type {
                        return Err(EventStoreError::AggregateTypeMismatch(format!(
                            "aggregate {aggregate_id} is a '{}', attempted append with '{requested}'",
                            existing.aggregate_type
                        )));
                    }
                }
                existing.clone()
            }
            None => AggregateMetadata {
                aggregate_id,
                aggregate_type: event
                    .aggregate_type()
                    .unwrap_or(DEFAULT_AGGREGATE_TYPE)
                    .to_string(),
                aggregate_root: event.aggregate_root(),
                namespace: event.namespace().unwrap_or(DEFAULT_NAMESPACE).to_string(),
                latest_revision: 0,
                created_at: now,
            },
        };

        let position = log.events.len() as u64 + 1;
        let revision = metadata.latest_revision + 1;

        let mut parts = event
            .into_event(
                position,
                revision,
                now,
                Some(metadata.aggregate_type.clone()),
                metadata.aggregate_root,
            )
            .into_parts();
        parts.namespace = Some(metadata.namespace.clone());
        let stored = Event::from(parts);

        log.aggregates.insert(
            aggregate_id,
            AggregateMetadata {
                latest_revision: revision,
                ..metadata
            },
        );
        log.events.push(stored.clone());

        Ok(stored)
    }

    fn update(&self, position: u64, amendment: Amendment) -> Result<Event, EventStoreError> {
        let mut log = self.write()?;
        let index = usize::try_from(position)
            .ok()
            .and_then(|p| p.checked_sub(1))
            .filter(|i| *i < log.events.len())
            .ok_or_else(|| EventStoreError::NotFound(format!("no event at position {position}")))?;

        let amended = amendment.apply(log.events[index].clone());
        log.events[index] = amended.clone();
        Ok(amended)
    }

    fn execute(&self, filter: &EventFilter) -> Result<Box<dyn EventStream>, EventStoreError> {
        let log = self.read()?;
        let stream = VecEventStream::new(Self::select(&log, filter));
        if self.use_estimate(filter) {
            Ok(Box::new(stream.with_approximate_count(log.events.len() as u64)))
        } else {
            Ok(Box::new(stream))
        }
    }

    fn count(&self, filter: &EventFilter) -> Result<u64, EventStoreError> {
        let log = self.read()?;
        if self.use_estimate(filter) {
            return Ok(log.events.len() as u64);
        }
        Ok(log.events.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    fn find_by_position(&self, position: u64) -> Result<Option<Event>, EventStoreError> {
        let log = self.read()?;
        Ok(usize::try_from(position)
            .ok()
            .and_then(|p| p.checked_sub(1))
            .and_then(|i| log.events.get(i))
            .cloned())
    }

    fn find_by_revision(
        &self,
        aggregate_id: AggregateId,
        revision: u64,
    ) -> Result<Option<Event>, EventStoreError> {
        let log = self.read()?;
        Ok(log
            .events
            .iter()
            .find(|e| e.aggregate_id() == aggregate_id && e.revision() == revision)
            .cloned())
    }

    fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool, EventStoreError> {
        Ok(self.read()?.aggregates.contains_key(&aggregate_id))
    }

    fn find_aggregate_metadata(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateMetadata>, EventStoreError> {
        Ok(self.read()?.aggregates.get(&aggregate_id).cloned())
    }
}
