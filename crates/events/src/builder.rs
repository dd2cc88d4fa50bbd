//! Event construction and amendment.
//!
//! Producers describe an event with [`EventBuilder`], whose `build()` consumes
//! the builder into a [`NewEvent`]. The event store then turns a `NewEvent`
//! into a stored [`Event`] by assigning its ordering keys. Once built, nothing
//! can be changed: there is no builder left to mutate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use evstore_core::AggregateId;

use crate::event::{Event, EventParts, Payload};

/// Fluent description of an event about to be stored.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    payload: Payload,
    name: Option<String>,
    valid_at: Option<DateTime<Utc>>,
    aggregate_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_root: Option<AggregateId>,
    namespace: Option<String>,
    properties: BTreeMap<String, Option<String>>,
}

impl EventBuilder {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            name: None,
            valid_at: None,
            aggregate_type: None,
            aggregate_id: None,
            aggregate_root: None,
            namespace: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validity date, when not "now". Does not influence the position.
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.valid_at = Some(date);
        self
    }

    /// Aggregate information. A fresh identifier is generated when `id` is `None`.
    pub fn aggregate(mut self, aggregate_type: Option<&str>, id: Option<AggregateId>) -> Self {
        self.aggregate_type = aggregate_type.map(str::to_string);
        self.aggregate_id = id;
        self
    }

    pub fn aggregate_root(mut self, root: AggregateId) -> Self {
        self.aggregate_root = Some(root);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set a property; `None` explicitly removes it.
    pub fn property(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.properties.insert(name.into(), value.map(str::to_string));
        self
    }

    pub fn properties<'a>(
        mut self,
        properties: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> Self {
        for (name, value) in properties {
            self.properties
                .insert(name.to_string(), value.map(str::to_string));
        }
        self
    }

    /// Freeze the description.
    pub fn build(self) -> NewEvent {
        let name = self
            .name
            .unwrap_or_else(|| json_kind(self.payload.get()).to_string());

        NewEvent {
            payload: self.payload,
            name,
            valid_at: self.valid_at,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id.unwrap_or_default(),
            aggregate_root: self.aggregate_root,
            namespace: self.namespace,
            properties: self
                .properties
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect(),
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// An event ready to be appended (no position or revision yet).
#[derive(Debug, Clone)]
pub struct NewEvent {
    payload: Payload,
    name: String,
    valid_at: Option<DateTime<Utc>>,
    aggregate_type: Option<String>,
    aggregate_id: AggregateId,
    aggregate_root: Option<AggregateId>,
    namespace: Option<String>,
    properties: BTreeMap<String, String>,
}

impl NewEvent {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> Option<&str> {
        self.aggregate_type.as_deref()
    }

    pub fn aggregate_root(&self) -> Option<AggregateId> {
        self.aggregate_root
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn valid_at(&self) -> Option<DateTime<Utc>> {
        self.valid_at
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn payload(&self) -> &JsonValue {
        self.payload.get()
    }

    /// Turn into a stored event with the keys assigned by the store.
    ///
    /// `aggregate_type` and `aggregate_root` are passed explicitly because the
    /// store may inherit them from the aggregate's first event.
    pub fn into_event(
        self,
        position: u64,
        revision: u64,
        created_at: DateTime<Utc>,
        aggregate_type: Option<String>,
        aggregate_root: Option<AggregateId>,
    ) -> Event {
        Event::from(EventParts {
            position,
            revision,
            name: self.name,
            aggregate_id: self.aggregate_id,
            aggregate_root,
            aggregate_type,
            created_at,
            valid_at: self.valid_at.unwrap_or(created_at),
            namespace: self.namespace,
            has_failed: false,
            error_code: None,
            error_message: None,
            error_trace: None,
            properties: self.properties,
            payload: self.payload,
        })
    }

    /// Stored event keeping the builder's own aggregate metadata.
    pub fn stored_at(self, position: u64, revision: u64, created_at: DateTime<Utc>) -> Event {
        let aggregate_type = self.aggregate_type.clone();
        let aggregate_root = self.aggregate_root;
        self.into_event(position, revision, created_at, aggregate_type, aggregate_root)
    }
}

/// Failure marking of a stored event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Failure {
    pub code: Option<i64>,
    pub message: Option<String>,
    pub trace: Option<String>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// Correction applied to an already stored event.
///
/// Position and revision are never part of an amendment.
#[derive(Debug, Clone, Default)]
pub struct Amendment {
    valid_at: Option<DateTime<Utc>>,
    properties: BTreeMap<String, Option<String>>,
    failure: Option<Failure>,
}

impl Amendment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn valid_at(mut self, date: DateTime<Utc>) -> Self {
        self.valid_at = Some(date);
        self
    }

    /// Set a property; `None` removes it.
    pub fn property(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.properties.insert(name.into(), value.map(str::to_string));
        self
    }

    pub fn failed(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.valid_at.is_none() && self.properties.is_empty() && self.failure.is_none()
    }

    pub fn apply(&self, event: Event) -> Event {
        let mut parts = event.into_parts();

        if let Some(date) = self.valid_at {
            parts.valid_at = date;
        }
        for (name, value) in &self.properties {
            match value {
                Some(v) => {
                    parts.properties.insert(name.clone(), v.clone());
                }
                None => {
                    parts.properties.remove(name);
                }
            }
        }
        if let Some(failure) = &self.failure {
            parts.has_failed = true;
            parts.error_code = failure.code;
            parts.error_message = failure.message.clone();
            parts.error_trace = failure.trace.clone();
        }

        Event::from(parts)
    }
}
