//! Fluent event query.
//!
//! [`EventFilter`] is the plain filter value handed to a store. [`EventQuery`]
//! binds a filter to the store that will run it, so a query reads as one chain:
//!
//! ```ignore
//! let stream = store
//!     .query()
//!     .with_name(["user.created", "user.renamed"])
//!     .from_date(since)
//!     .limit(100)?
//!     .execute()?;
//! ```
//!
//! ## Approximate counting
//!
//! A count may be answered with a cheap estimate only when the caller allowed
//! it AND the filter does nothing beyond pagination (position, revision,
//! limit, reverse). Any other filter switches the estimate off for good.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use evstore_core::{AggregateId, CoreError, CoreResult};
use evstore_events::Event;

use super::r#trait::{EventStore, EventStoreError};
use super::stream::EventStream;

/// Filter, ordering and limit of an event query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub(crate) reverse: bool,
    pub(crate) position: Option<u64>,
    pub(crate) revision: Option<u64>,
    pub(crate) aggregate_id: Option<AggregateId>,
    pub(crate) include_roots: bool,
    pub(crate) failed: Option<bool>,
    pub(crate) aggregate_types: BTreeSet<String>,
    pub(crate) names: BTreeSet<String>,
    pub(crate) search_name: Option<String>,
    pub(crate) search_data: Option<String>,
    /// Accepted values per property; empty means "must be present".
    pub(crate) properties: BTreeMap<String, Vec<String>>,
    pub(crate) without_properties: BTreeSet<String>,
    pub(crate) date_lower_bound: Option<DateTime<Utc>>,
    pub(crate) date_upper_bound: Option<DateTime<Utc>>,
    pub(crate) limit: u64,
    pub(crate) approximate_count_possible: bool,
    pub(crate) approximate_count_allowed: bool,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            reverse: false,
            position: None,
            revision: None,
            aggregate_id: None,
            include_roots: false,
            failed: Some(false),
            aggregate_types: BTreeSet::new(),
            names: BTreeSet::new(),
            search_name: None,
            search_data: None,
            properties: BTreeMap::new(),
            without_properties: BTreeSet::new(),
            date_lower_bound: None,
            date_upper_bound: None,
            limit: 0,
            approximate_count_possible: true,
            approximate_count_allowed: false,
        }
    }
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_approximate_count(mut self, toggle: bool) -> Self {
        self.approximate_count_allowed = toggle;
        self
    }

    pub fn reverse(mut self, toggle: bool) -> Self {
        self.reverse = toggle;
        self
    }

    /// Position cursor: `>=` in ascending order, `<=` under `reverse`. 0 is no bound.
    pub fn from_position(mut self, position: u64) -> Self {
        self.position = (position > 0).then_some(position);
        self
    }

    /// Revision cursor, same rules as [`EventFilter::from_position`].
    pub fn from_revision(mut self, revision: u64) -> Self {
        self.revision = (revision > 0).then_some(revision);
        self
    }

    /// Restrict to one aggregate given as a UUID string.
    pub fn for_aggregate(self, aggregate_id: &str, include_roots: bool) -> CoreResult<Self> {
        let id = aggregate_id.parse::<AggregateId>().map_err(|_| {
            CoreError::invalid_argument(format!(
                "aggregate identifier must be a valid UUID: '{aggregate_id}' given"
            ))
        })?;
        Ok(self.for_aggregate_id(id, include_roots))
    }

    pub fn for_aggregate_id(mut self, aggregate_id: AggregateId, include_roots: bool) -> Self {
        self.approximate_count_possible = false;
        self.aggregate_id = Some(aggregate_id);
        self.include_roots = include_roots;
        self
    }

    /// `Some(true)` only failed events, `Some(false)` only healthy ones, `None` both.
    pub fn failed(mut self, toggle: Option<bool>) -> Self {
        if toggle.is_some() {
            self.approximate_count_possible = false;
        }
        self.failed = toggle;
        self
    }

    pub fn with_type<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approximate_count_possible = false;
        self.aggregate_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_name<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approximate_count_possible = false;
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Case-insensitive substring match on the event name.
    pub fn with_search_name(mut self, name: impl Into<String>) -> Self {
        self.approximate_count_possible = false;
        self.search_name = Some(name.into());
        self
    }

    /// Case-insensitive substring match on the serialized payload.
    pub fn with_search_data(mut self, data: impl Into<String>) -> Self {
        self.approximate_count_possible = false;
        self.search_data = Some(data.into());
        self
    }

    /// Require a property. Values accumulate: any of them matches. `None`
    /// only requires the property to be set.
    pub fn with_property(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.approximate_count_possible = false;
        let name = name.into();
        self.without_properties.remove(&name);
        let values = self.properties.entry(name).or_default();
        if let Some(value) = value {
            if !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        }
        self
    }

    /// Require a property to be absent. Ignored when the same property was
    /// already required by [`EventFilter::with_property`].
    pub fn without_property(mut self, name: impl Into<String>) -> Self {
        self.approximate_count_possible = false;
        let name = name.into();
        if self.properties.contains_key(&name) {
            warn!(
                property = %name,
                "query already filters on this property value, without_property() call is ignored"
            );
        } else {
            self.without_properties.insert(name);
        }
        self
    }

    /// Lower date bound, ignored once the upper bound is fixed.
    pub fn from_date(mut self, from: DateTime<Utc>) -> Self {
        self.approximate_count_possible = false;
        if self.date_upper_bound.is_some() {
            warn!("query already has an upper date bound, from_date() call is ignored");
        } else {
            self.date_lower_bound = Some(from);
        }
        self
    }

    /// Upper date bound (inclusive), ignored once already fixed.
    pub fn to_date(mut self, to: DateTime<Utc>) -> Self {
        self.approximate_count_possible = false;
        if self.date_upper_bound.is_some() {
            warn!("query already has an upper date bound, to_date() call is ignored");
        } else {
            self.date_upper_bound = Some(to);
        }
        self
    }

    /// Both date bounds, in any order. Overrides a previous `from_date`.
    pub fn between_dates(mut self, a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        self.approximate_count_possible = false;
        if self.date_lower_bound.is_some() && self.date_upper_bound.is_none() {
            warn!("query already has a lower date bound, between_dates() call overrides it");
        }
        self.date_lower_bound = Some(a.min(b));
        self.date_upper_bound = Some(a.max(b));
        self
    }

    /// Maximum number of events, 0 meaning unlimited.
    pub fn limit(mut self, limit: i64) -> CoreResult<Self> {
        self.limit = u64::try_from(limit)
            .map_err(|_| CoreError::invalid_argument("limit cannot be less than 0"))?;
        Ok(self)
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn date_bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.date_lower_bound, self.date_upper_bound)
    }

    pub fn property_values(&self, name: &str) -> Option<&[String]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    pub fn excludes_property(&self, name: &str) -> bool {
        self.without_properties.contains(name)
    }

    pub fn limit_value(&self) -> u64 {
        self.limit
    }

    pub fn is_approximate_count_possible(&self) -> bool {
        self.approximate_count_possible
    }

    pub fn is_approximate_count_allowed(&self) -> bool {
        self.approximate_count_allowed
    }

    /// Whether a stored event passes every filter (ordering and limit aside).
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(failed) = self.failed {
            if event.has_failed() != failed {
                return false;
            }
        }
        if !self.names.is_empty() && !self.names.contains(event.name()) {
            return false;
        }
        if let Some(search) = &self.search_name {
            if !contains_ignore_case(event.name(), search) {
                return false;
            }
        }
        if let Some(search) = &self.search_data {
            if !contains_ignore_case(&event.payload().to_string(), search) {
                return false;
            }
        }
        if !self.aggregate_types.is_empty() && !self.aggregate_types.contains(event.aggregate_type())
        {
            return false;
        }
        if let Some(id) = self.aggregate_id {
            let root_match = self.include_roots && event.aggregate_root() == Some(id);
            if event.aggregate_id() != id && !root_match {
                return false;
            }
        }
        if let Some(lower) = self.date_lower_bound {
            if event.valid_at() < lower {
                return false;
            }
        }
        if let Some(upper) = self.date_upper_bound {
            if event.valid_at() > upper {
                return false;
            }
        }
        for (name, values) in &self.properties {
            match event.property(name) {
                None => return false,
                Some(actual) if !values.is_empty() && !values.iter().any(|v| v == actual) => {
                    return false;
                }
                Some(_) => {}
            }
        }
        if self.without_properties.iter().any(|name| event.has_property(name)) {
            return false;
        }
        if let Some(position) = self.position {
            let within = if self.reverse {
                event.position() <= position
            } else {
                event.position() >= position
            };
            if !within {
                return false;
            }
        }
        if let Some(revision) = self.revision {
            let within = if self.reverse {
                event.revision() <= revision
            } else {
                event.revision() >= revision
            };
            if !within {
                return false;
            }
        }
        true
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// An [`EventFilter`] bound to the store that runs it.
pub struct EventQuery<'s> {
    store: &'s dyn EventStore,
    filter: EventFilter,
}

macro_rules! delegate_to_filter {
    ($( fn $name:ident(self $(, $arg:ident : $ty:ty)*); )*) => {
        $(
            pub fn $name(self $(, $arg: $ty)*) -> Self {
                Self {
                    store: self.store,
                    filter: self.filter.$name($($arg),*),
                }
            }
        )*
    };
}

impl<'s> EventQuery<'s> {
    pub fn new(store: &'s dyn EventStore) -> Self {
        Self {
            store,
            filter: EventFilter::default(),
        }
    }

    delegate_to_filter! {
        fn allow_approximate_count(self, toggle: bool);
        fn reverse(self, toggle: bool);
        fn from_position(self, position: u64);
        fn from_revision(self, revision: u64);
        fn for_aggregate_id(self, aggregate_id: AggregateId, include_roots: bool);
        fn failed(self, toggle: Option<bool>);
        fn with_search_name(self, name: impl Into<String>);
        fn with_search_data(self, data: impl Into<String>);
        fn with_property(self, name: impl Into<String>, value: Option<&str>);
        fn without_property(self, name: impl Into<String>);
        fn from_date(self, from: DateTime<Utc>);
        fn to_date(self, to: DateTime<Utc>);
        fn between_dates(self, a: DateTime<Utc>, b: DateTime<Utc>);
    }

    pub fn with_type<I, S>(self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store: self.store,
            filter: self.filter.with_type(types),
        }
    }

    pub fn with_name<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store: self.store,
            filter: self.filter.with_name(names),
        }
    }

    pub fn for_aggregate(self, aggregate_id: &str, include_roots: bool) -> CoreResult<Self> {
        Ok(Self {
            store: self.store,
            filter: self.filter.for_aggregate(aggregate_id, include_roots)?,
        })
    }

    pub fn limit(self, limit: i64) -> CoreResult<Self> {
        Ok(Self {
            store: self.store,
            filter: self.filter.limit(limit)?,
        })
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn into_filter(self) -> EventFilter {
        self.filter
    }

    pub fn execute(self) -> Result<Box<dyn EventStream>, EventStoreError> {
        self.store.execute(&self.filter)
    }

    pub fn count(&self) -> Result<u64, EventStoreError> {
        self.store.count(&self.filter)
    }
}

impl core::fmt::Debug for EventQuery<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventQuery")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
