use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use evstore_core::AggregateId;

/// Namespace used when the producer did not set one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Aggregate type used when the producer did not set one.
pub const DEFAULT_AGGREGATE_TYPE: &str = "none";

type PayloadLoader = Arc<dyn Fn() -> JsonValue + Send + Sync>;

/// Opaque event payload.
///
/// A payload is either already resolved or backed by a loader that runs at most
/// once, on first access. Stores use the deferred form to avoid decoding data
/// nobody reads (listing, counting, skipping already-projected events).
#[derive(Clone)]
pub struct Payload {
    value: OnceLock<JsonValue>,
    loader: Option<PayloadLoader>,
}

impl Payload {
    pub fn new(value: JsonValue) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(value);
        Self {
            value: cell,
            loader: None,
        }
    }

    /// Deferred payload; `loader` runs on first [`Payload::get`].
    pub fn lazy(loader: impl Fn() -> JsonValue + Send + Sync + 'static) -> Self {
        Self {
            value: OnceLock::new(),
            loader: Some(Arc::new(loader)),
        }
    }

    pub fn get(&self) -> &JsonValue {
        self.value.get_or_init(|| {
            self.loader
                .as_ref()
                .map_or(JsonValue::Null, |load| load())
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }
}

impl From<JsonValue> for Payload {
    fn from(value: JsonValue) -> Self {
        Self::new(value)
    }
}

impl core::fmt::Debug for Payload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.value.get() {
            Some(value) => f.debug_tuple("Payload").field(value).finish(),
            None => f.write_str("Payload(<deferred>)"),
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Payload::new)
    }
}

/// Every field of an [`Event`], used by stores to hydrate events from storage.
///
/// This is a plain constructor input: once converted, the resulting `Event` is
/// immutable.
#[derive(Debug, Clone)]
pub struct EventParts {
    pub position: u64,
    pub revision: u64,
    pub name: String,
    pub aggregate_id: AggregateId,
    pub aggregate_root: Option<AggregateId>,
    pub aggregate_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub valid_at: DateTime<Utc>,
    pub namespace: Option<String>,
    pub has_failed: bool,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub payload: Payload,
}

/// Immutable record of one domain occurrence.
///
/// - `position` is global across the whole log, `revision` is per aggregate.
///   Both are `0` until the event store assigns them.
/// - `created_at` is informational only; `valid_at` is the business-effective
///   date and is what queries order by. It may be amended to fix history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    position: u64,
    revision: u64,
    name: String,
    aggregate_id: AggregateId,
    aggregate_root: Option<AggregateId>,
    aggregate_type: Option<String>,
    created_at: DateTime<Utc>,
    valid_at: DateTime<Utc>,
    namespace: Option<String>,
    has_failed: bool,
    error_code: Option<i64>,
    error_message: Option<String>,
    error_trace: Option<String>,
    properties: BTreeMap<String, String>,
    payload: Payload,
}

impl From<EventParts> for Event {
    fn from(parts: EventParts) -> Self {
        Self {
            position: parts.position,
            revision: parts.revision,
            name: parts.name,
            aggregate_id: parts.aggregate_id,
            aggregate_root: parts.aggregate_root,
            aggregate_type: parts.aggregate_type,
            created_at: parts.created_at,
            valid_at: parts.valid_at,
            namespace: parts.namespace,
            has_failed: parts.has_failed,
            error_code: parts.error_code,
            error_message: parts.error_message,
            error_trace: parts.error_trace,
            properties: parts.properties,
            payload: parts.payload,
        }
    }
}

impl Event {
    /// Decompose into parts (stores use this to derive amended copies).
    pub fn into_parts(self) -> EventParts {
        EventParts {
            position: self.position,
            revision: self.revision,
            name: self.name,
            aggregate_id: self.aggregate_id,
            aggregate_root: self.aggregate_root,
            aggregate_type: self.aggregate_type,
            created_at: self.created_at,
            valid_at: self.valid_at,
            namespace: self.namespace,
            has_failed: self.has_failed,
            error_code: self.error_code,
            error_message: self.error_message,
            error_trace: self.error_trace,
            properties: self.properties,
            payload: self.payload,
        }
    }

    /// Position in the whole log.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Revision within the aggregate stream.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_stored(&self) -> bool {
        self.revision != 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_root(&self) -> Option<AggregateId> {
        self.aggregate_root
    }

    pub fn aggregate_type(&self) -> &str {
        self.aggregate_type.as_deref().unwrap_or(DEFAULT_AGGREGATE_TYPE)
    }

    /// Creation date. Informational only, never use it for business decisions.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Business-effective date.
    pub fn valid_at(&self) -> DateTime<Utc> {
        self.valid_at
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// The transaction or publication of this event failed and is considered
    /// rolled back.
    pub fn has_failed(&self) -> bool {
        self.has_failed
    }

    pub fn error_code(&self) -> Option<i64> {
        self.error_code
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_trace(&self) -> Option<&str> {
        self.error_trace.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Payload, resolving it on first access when deferred.
    pub fn payload(&self) -> &JsonValue {
        self.payload.get()
    }

    pub fn raw_payload(&self) -> &Payload {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn parts(position: u64, revision: u64, payload: Payload) -> EventParts {
        let now = Utc::now();
        EventParts {
            position,
            revision,
            name: "order.placed".to_string(),
            aggregate_id: AggregateId::new(),
            aggregate_root: None,
            aggregate_type: None,
            created_at: now,
            valid_at: now,
            namespace: None,
            has_failed: false,
            error_code: None,
            error_message: None,
            error_trace: None,
            properties: BTreeMap::new(),
            payload,
        }
    }

    #[test]
    fn stored_iff_revision_assigned() {
        let unstored = Event::from(parts(0, 0, Payload::new(JsonValue::Null)));
        assert!(!unstored.is_stored());

        let stored = Event::from(parts(7, 1, Payload::new(JsonValue::Null)));
        assert!(stored.is_stored());
    }

    #[test]
    fn defaults_apply_to_missing_type_and_namespace() {
        let event = Event::from(parts(1, 1, Payload::new(JsonValue::Null)));
        assert_eq!(event.aggregate_type(), DEFAULT_AGGREGATE_TYPE);
        assert_eq!(event.namespace(), DEFAULT_NAMESPACE);
    }

    #[test]
    fn lazy_payload_resolves_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let payload = Payload::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            serde_json::json!({"total": 42})
        });
        let event = Event::from(parts(1, 1, payload));

        assert!(!event.raw_payload().is_resolved());
        assert_eq!(event.payload()["total"], 42);
        assert_eq!(event.payload()["total"], 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(event.raw_payload().is_resolved());
    }

    #[test]
    fn serializes_resolved_payload() {
        let event = Event::from(parts(3, 2, Payload::lazy(|| serde_json::json!([1, 2]))));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"], serde_json::json!([1, 2]));
        assert_eq!(json["position"], 3);

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
