use std::vec;

use evstore_events::Event;

use super::r#trait::EventStoreError;

/// Result of an executed query.
///
/// Iterating yields each matching event once, in query order. The count is
/// known up front and may be an estimate; check
/// [`EventStream::is_count_approximate`] before relying on it.
pub trait EventStream: Iterator<Item = Result<Event, EventStoreError>> + Send {
    fn total_count(&self) -> u64;

    fn is_count_approximate(&self) -> bool {
        false
    }
}

/// Stream over events already fetched into memory.
#[derive(Debug)]
pub struct VecEventStream {
    events: vec::IntoIter<Event>,
    count: u64,
    approximate: bool,
}

impl VecEventStream {
    pub fn new(events: Vec<Event>) -> Self {
        let count = events.len() as u64;
        Self {
            events: events.into_iter(),
            count,
            approximate: false,
        }
    }

    /// Replace the exact count with an estimate.
    pub fn with_approximate_count(mut self, count: u64) -> Self {
        self.count = count;
        self.approximate = true;
        self
    }
}

impl Iterator for VecEventStream {
    type Item = Result<Event, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.next().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.events.size_hint()
    }
}

impl EventStream for VecEventStream {
    fn total_count(&self) -> u64 {
        self.count
    }

    fn is_count_approximate(&self) -> bool {
        self.approximate
    }
}
