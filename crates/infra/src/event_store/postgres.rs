//! Postgres-backed event store implementation.
//!
//! Two tables (see `migrations/0001_event_store.sql`):
//!
//! - `evstore_aggregate`: one row per aggregate, fixed by its first event
//!   (type, root, namespace) plus the latest assigned revision.
//! - `evstore_event`: the log. `position` is a `bigserial`, so it is unique,
//!   increasing and never reused.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `InvalidAppend` |
//! | Database (foreign key violation) | `23503` | `InvalidAppend` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |
//!
//! ## Revision assignment
//!
//! Appending upserts the aggregate row and increments `latest_revision` in the
//! same statement. The row lock taken by the upsert serializes concurrent
//! appends to one aggregate until the transaction commits.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{Span, instrument};

use evstore_core::AggregateId;
use evstore_events::{
    Amendment, DEFAULT_AGGREGATE_TYPE, DEFAULT_NAMESPACE, Event, EventParts, NewEvent, Payload,
};

use super::query::EventFilter;
use super::r#trait::{AggregateMetadata, CountPolicy, EventStore, EventStoreError};
use super::stream::EventStream;

const EVENT_TABLE: &str = "evstore_event";

/// Rows fetched per round trip while streaming.
const PAGE_SIZE: u64 = 500;

const SELECT_EVENT: &str = r#"
SELECT
    e.position,
    e.revision,
    e.name,
    e.aggregate_id,
    a.aggregate_root,
    a.aggregate_type,
    a.namespace,
    e.created_at,
    e.valid_at,
    e.has_failed,
    e.error_code,
    e.error_message,
    e.error_trace,
    e.properties,
    e.data::text AS data
FROM evstore_event e
JOIN evstore_aggregate a ON a.aggregate_id = e.aggregate_id"#;

const COUNT_EVENT: &str = r#"
SELECT count(*) AS total
FROM evstore_event e
JOIN evstore_aggregate a ON a.aggregate_id = e.aggregate_id"#;

/// Postgres-backed event store.
///
/// The [`EventStore`] trait is synchronous; its implementation runs the async
/// methods below on the current tokio runtime, which must be multi-threaded.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    count_policy: CountPolicy,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            count_policy: CountPolicy::default(),
        }
    }

    pub fn with_count_policy(mut self, policy: CountPolicy) -> Self {
        self.count_policy = policy;
        self
    }

    /// Create the event tables if missing.
    #[instrument(skip(self), err)]
    pub async fn install_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(include_str!("../../migrations/0001_event_store.sql"))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("install_schema", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, event),
        fields(
            aggregate_id = %event.aggregate_id(),
            name = %event.name(),
            position = tracing::field::Empty
        ),
        err
    )]
    pub async fn append_event(&self, event: NewEvent) -> Result<Event, EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let aggregate = sqlx::query(
            r#"
            INSERT INTO evstore_aggregate (
                aggregate_id,
                aggregate_type,
                aggregate_root,
                namespace,
                latest_revision
            )
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET
                latest_revision = evstore_aggregate.latest_revision + 1
            RETURNING aggregate_type, aggregate_root, namespace, latest_revision
            "#,
        )
        .bind(*event.aggregate_id().as_uuid())
        .bind(event.aggregate_type().unwrap_or(DEFAULT_AGGREGATE_TYPE))
        .bind(event.aggregate_root().map(|id| *id.as_uuid()))
        .bind(event.namespace().unwrap_or(DEFAULT_NAMESPACE))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_aggregate", e))?;

        let aggregate_type: String = aggregate
            .try_get("aggregate_type")
            .map_err(|e| map_sqlx_error("read_aggregate", e))?;
        let aggregate_root: Option<uuid::Uuid> = aggregate
            .try_get("aggregate_root")
            .map_err(|e| map_sqlx_error("read_aggregate", e))?;
        let namespace: String = aggregate
            .try_get("namespace")
            .map_err(|e| map_sqlx_error("read_aggregate", e))?;
        let revision: i64 = aggregate
            .try_get("latest_revision")
            .map_err(|e| map_sqlx_error("read_aggregate", e))?;

        if let Some(requested) = event.aggregate_type() {
            if requested != aggregate_type {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "aggregate {} is a '{aggregate_type}', attempted append with '{requested}'",
                    event.aggregate_id()
                )));
            }
        }

        let created_at = Utc::now();
        let valid_at = event.valid_at().unwrap_or(created_at);

        let position: i64 = sqlx::query(
            r#"
            INSERT INTO evstore_event (
                aggregate_id,
                revision,
                name,
                created_at,
                valid_at,
                properties,
                data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING position
            "#,
        )
        .bind(*event.aggregate_id().as_uuid())
        .bind(revision)
        .bind(event.name())
        .bind(created_at)
        .bind(valid_at)
        .bind(Json(event.properties().clone()))
        .bind(Json(event.payload().clone()))
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("position"))
        .map_err(|e| map_sqlx_error("insert_event", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("position", position);

        let mut parts = event
            .into_event(
                position as u64,
                revision as u64,
                created_at,
                Some(aggregate_type),
                aggregate_root.map(AggregateId::from_uuid),
            )
            .into_parts();
        parts.namespace = Some(namespace);
        Ok(Event::from(parts))
    }

    #[instrument(skip(self, amendment), err)]
    pub async fn amend_event(
        &self,
        position: u64,
        amendment: Amendment,
    ) -> Result<Event, EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!("{SELECT_EVENT} WHERE e.position = $1 FOR UPDATE OF e"))
            .bind(position as i64)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("select_event", e))?
            .ok_or_else(|| EventStoreError::NotFound(format!("no event at position {position}")))?;

        let current = EventRow::from_row(&row).map_err(|e| map_sqlx_error("read_event", e))?;
        let amended = amendment.apply(Event::from(current));

        sqlx::query(
            r#"
            UPDATE evstore_event
            SET
                valid_at = $2,
                properties = $3,
                has_failed = $4,
                error_code = $5,
                error_message = $6,
                error_trace = $7
            WHERE position = $1
            "#,
        )
        .bind(position as i64)
        .bind(amended.valid_at())
        .bind(Json(amended.properties().clone()))
        .bind(amended.has_failed())
        .bind(amended.error_code())
        .bind(amended.error_message())
        .bind(amended.error_trace())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_event", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(amended)
    }

    /// Open a lazy stream over the filter. Only the total is read here; events
    /// are fetched page by page as the stream is consumed.
    #[instrument(skip(self, filter), err)]
    pub async fn fetch(&self, filter: &EventFilter) -> Result<PgEventStream, EventStoreError> {
        let approximate = self.uses_estimate(filter);
        let mut total = self.count_events(filter).await?;
        if !approximate && filter.limit_value() > 0 {
            total = total.min(filter.limit_value());
        }
        Ok(PgEventStream::new(self.clone(), filter.clone(), total, approximate))
    }

    /// One page of events strictly after `after` in the filter's order.
    #[instrument(skip(self, filter), fields(event_count = tracing::field::Empty), err)]
    pub async fn fetch_page(
        &self,
        filter: &EventFilter,
        after: Option<(DateTime<Utc>, u64)>,
        size: u64,
    ) -> Result<Vec<Event>, EventStoreError> {
        let rows = build_select(filter, after, size)
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_events", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let row = EventRow::from_row(&row).map_err(|e| map_sqlx_error("read_event", e))?;
            events.push(Event::from(row));
        }
        Span::current().record("event_count", events.len());
        Ok(events)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count_events(&self, filter: &EventFilter) -> Result<u64, EventStoreError> {
        if self.uses_estimate(filter) {
            return self.estimate_total().await;
        }

        let total: i64 = build_count(filter)
            .build()
            .fetch_one(&*self.pool)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| map_sqlx_error("count_events", e))?;
        Ok(total.max(0) as u64)
    }

    pub async fn load_by_position(&self, position: u64) -> Result<Option<Event>, EventStoreError> {
        let row = sqlx::query(&format!("{SELECT_EVENT} WHERE e.position = $1"))
            .bind(position as i64)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_by_position", e))?;

        row.map(|row| EventRow::from_row(&row).map(Event::from))
            .transpose()
            .map_err(|e| map_sqlx_error("read_event", e))
    }

    pub async fn load_by_revision(
        &self,
        aggregate_id: AggregateId,
        revision: u64,
    ) -> Result<Option<Event>, EventStoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_EVENT} WHERE e.aggregate_id = $1 AND e.revision = $2"
        ))
        .bind(*aggregate_id.as_uuid())
        .bind(revision as i64)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_by_revision", e))?;

        row.map(|row| EventRow::from_row(&row).map(Event::from))
            .transpose()
            .map_err(|e| map_sqlx_error("read_event", e))
    }

    pub async fn load_aggregate_metadata(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateMetadata>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                aggregate_id,
                aggregate_type,
                aggregate_root,
                namespace,
                latest_revision,
                created_at
            FROM evstore_aggregate
            WHERE aggregate_id = $1
            "#,
        )
        .bind(*aggregate_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_aggregate_metadata", e))?;

        row.map(|row| AggregateRow::from_row(&row).map(AggregateMetadata::from))
            .transpose()
            .map_err(|e| map_sqlx_error("read_aggregate", e))
    }

    fn uses_estimate(&self, filter: &EventFilter) -> bool {
        self.count_policy == CountPolicy::Approximate
            && filter.is_approximate_count_allowed()
            && filter.is_approximate_count_possible()
    }

    /// Planner estimate of the log size; `-1` (never analyzed) reads as 0.
    async fn estimate_total(&self) -> Result<u64, EventStoreError> {
        let estimate: Option<i64> = sqlx::query(
            "SELECT reltuples::bigint AS total FROM pg_class WHERE relname = $1",
        )
        .bind(EVENT_TABLE)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("estimate_total", e))?
        .map(|row| row.try_get("total"))
        .transpose()
        .map_err(|e| map_sqlx_error("estimate_total", e))?;

        Ok(estimate.unwrap_or(0).max(0) as u64)
    }

    fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, EventStoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EventStoreError::Storage(
                "PostgresEventStore requires async runtime (tokio). Ensure you're calling from within a tokio runtime context.".to_string(),
            )
        })?;
        Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
    }
}

impl EventStore for PostgresEventStore {
    fn append(&self, event: NewEvent) -> Result<Event, EventStoreError> {
        self.block_on(self.append_event(event))?
    }

    fn update(&self, position: u64, amendment: Amendment) -> Result<Event, EventStoreError> {
        self.block_on(self.amend_event(position, amendment))?
    }

    fn execute(&self, filter: &EventFilter) -> Result<Box<dyn EventStream>, EventStoreError> {
        let stream = self.block_on(self.fetch(filter))??;
        Ok(Box::new(stream))
    }

    fn count(&self, filter: &EventFilter) -> Result<u64, EventStoreError> {
        self.block_on(self.count_events(filter))?
    }

    fn find_by_position(&self, position: u64) -> Result<Option<Event>, EventStoreError> {
        self.block_on(self.load_by_position(position))?
    }

    fn find_by_revision(
        &self,
        aggregate_id: AggregateId,
        revision: u64,
    ) -> Result<Option<Event>, EventStoreError> {
        self.block_on(self.load_by_revision(aggregate_id, revision))?
    }

    fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool, EventStoreError> {
        Ok(self
            .block_on(self.load_aggregate_metadata(aggregate_id))??
            .is_some())
    }

    fn find_aggregate_metadata(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateMetadata>, EventStoreError> {
        self.block_on(self.load_aggregate_metadata(aggregate_id))?
    }
}

/// Events of a Postgres query, read lazily one keyset page at a time.
///
/// Each page resumes strictly after the last `(valid_at, position)` returned,
/// matching the query order, so memory stays bounded by [`PAGE_SIZE`]. The
/// total is read once when the stream is opened.
pub struct PgEventStream {
    store: PostgresEventStore,
    filter: EventFilter,
    page: std::vec::IntoIter<Event>,
    after: Option<(DateTime<Utc>, u64)>,
    /// Rows still allowed by the filter's limit.
    remaining: Option<u64>,
    exhausted: bool,
    total: u64,
    approximate: bool,
}

impl PgEventStream {
    fn new(store: PostgresEventStore, filter: EventFilter, total: u64, approximate: bool) -> Self {
        let remaining = (filter.limit_value() > 0).then(|| filter.limit_value());
        Self {
            store,
            filter,
            page: Vec::new().into_iter(),
            after: None,
            remaining,
            exhausted: false,
            total,
            approximate,
        }
    }

    fn next_page_size(&self) -> u64 {
        self.remaining.map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE))
    }
}

impl Iterator for PgEventStream {
    type Item = Result<Event, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.page.next() {
            return Some(Ok(event));
        }

        let size = self.next_page_size();
        if self.exhausted || size == 0 {
            return None;
        }

        let page = match self
            .store
            .block_on(self.store.fetch_page(&self.filter, self.after, size))
            .and_then(|page| page)
        {
            Ok(page) => page,
            Err(err) => {
                self.exhausted = true;
                return Some(Err(err));
            }
        };

        let fetched = page.len() as u64;
        if fetched < size {
            self.exhausted = true;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= fetched;
        }
        if let Some(last) = page.last() {
            self.after = Some((last.valid_at(), last.position()));
        }

        self.page = page.into_iter();
        self.page.next().map(Ok)
    }
}

impl EventStream for PgEventStream {
    fn total_count(&self) -> u64 {
        self.total
    }

    fn is_count_approximate(&self) -> bool {
        self.approximate
    }
}

impl core::fmt::Debug for PgEventStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PgEventStream")
            .field("after", &self.after)
            .field("remaining", &self.remaining)
            .field("exhausted", &self.exhausted)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// SELECT statement for one page of a filter, resuming after a keyset cursor.
///
/// `limit` of 0 means unbounded.
pub(crate) fn build_select(
    filter: &EventFilter,
    after: Option<(DateTime<Utc>, u64)>,
    limit: u64,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(SELECT_EVENT);
    push_conditions(&mut qb, filter);

    let (direction, keyset) = if filter.is_reverse() {
        ("DESC", " < ")
    } else {
        ("ASC", " > ")
    };
    if let Some((valid_at, position)) = after {
        qb.push(" AND (e.valid_at, e.position)")
            .push(keyset)
            .push("(")
            .push_bind(valid_at)
            .push(", ")
            .push_bind(position as i64)
            .push(")");
    }

    qb.push(format!(
        " ORDER BY e.valid_at {direction}, e.position {direction}"
    ));
    if limit > 0 {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
    qb
}

/// COUNT statement for a filter. Ordering and limit do not apply.
pub(crate) fn build_count(filter: &EventFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(COUNT_EVENT);
    push_conditions(&mut qb, filter);
    qb
}

fn push_conditions(qb: &mut QueryBuilder<'static, Postgres>, filter: &EventFilter) {
    qb.push(" WHERE TRUE");

    if !filter.names.is_empty() {
        qb.push(" AND e.name = ANY(")
            .push_bind(filter.names.iter().cloned().collect::<Vec<_>>())
            .push(")");
    }
    if let Some(search) = &filter.search_name {
        qb.push(" AND e.name ILIKE ").push_bind(like_pattern(search));
    }
    if let Some(search) = &filter.search_data {
        qb.push(" AND e.data::text ILIKE ").push_bind(like_pattern(search));
    }
    if !filter.aggregate_types.is_empty() {
        qb.push(" AND a.aggregate_type = ANY(")
            .push_bind(filter.aggregate_types.iter().cloned().collect::<Vec<_>>())
            .push(")");
    }
    if let Some(id) = filter.aggregate_id {
        if filter.include_roots {
            qb.push(" AND (e.aggregate_id = ")
                .push_bind(*id.as_uuid())
                .push(" OR a.aggregate_root = ")
                .push_bind(*id.as_uuid())
                .push(")");
        } else {
            qb.push(" AND e.aggregate_id = ").push_bind(*id.as_uuid());
        }
    }
    match filter.date_bounds() {
        (Some(lower), Some(upper)) => {
            qb.push(" AND e.valid_at BETWEEN ")
                .push_bind(lower)
                .push(" AND ")
                .push_bind(upper);
        }
        (Some(lower), None) => {
            qb.push(" AND e.valid_at >= ").push_bind(lower);
        }
        (None, Some(upper)) => {
            qb.push(" AND e.valid_at <= ").push_bind(upper);
        }
        (None, None) => {}
    }
    if let Some(failed) = filter.failed {
        qb.push(" AND e.has_failed = ").push_bind(failed);
    }
    for (name, values) in &filter.properties {
        qb.push(" AND e.properties ->> ").push_bind(name.clone());
        if values.is_empty() {
            qb.push(" IS NOT NULL");
        } else {
            qb.push(" = ANY(").push_bind(values.clone()).push(")");
        }
    }
    for name in &filter.without_properties {
        qb.push(" AND e.properties ->> ")
            .push_bind(name.clone())
            .push(" IS NULL");
    }

    let cursor = if filter.is_reverse() { " <= " } else { " >= " };
    if let Some(position) = filter.position {
        qb.push(" AND e.position")
            .push(cursor)
            .push_bind(position as i64);
    }
    if let Some(revision) = filter.revision {
        qb.push(" AND e.revision")
            .push(cursor)
            .push_bind(revision as i64);
    }
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique or foreign key violation.
                Some("23505") | Some("23503") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => EventStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct EventRow {
    position: i64,
    revision: i64,
    name: String,
    aggregate_id: uuid::Uuid,
    aggregate_root: Option<uuid::Uuid>,
    aggregate_type: String,
    namespace: String,
    created_at: DateTime<Utc>,
    valid_at: DateTime<Utc>,
    has_failed: bool,
    error_code: Option<i64>,
    error_message: Option<String>,
    error_trace: Option<String>,
    properties: BTreeMap<String, String>,
    data: String,
}

impl<'r> FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let properties: Json<BTreeMap<String, String>> = row.try_get("properties")?;
        Ok(EventRow {
            position: row.try_get("position")?,
            revision: row.try_get("revision")?,
            name: row.try_get("name")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_root: row.try_get("aggregate_root")?,
            aggregate_type: row.try_get("aggregate_type")?,
            namespace: row.try_get("namespace")?,
            created_at: row.try_get("created_at")?,
            valid_at: row.try_get("valid_at")?,
            has_failed: row.try_get("has_failed")?,
            error_code: row.try_get("error_code")?,
            error_message: row.try_get("error_message")?,
            error_trace: row.try_get("error_trace")?,
            properties: properties.0,
            data: row.try_get("data")?,
        })
    }
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let raw = row.data;
        // Decoded on first access only; most replays never look at the payload.
        let payload = Payload::lazy(move || {
            serde_json::from_str(&raw).unwrap_or_else(|_| JsonValue::String(raw.clone()))
        });

        Event::from(EventParts {
            position: row.position as u64,
            revision: row.revision as u64,
            name: row.name,
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_root: row.aggregate_root.map(AggregateId::from_uuid),
            aggregate_type: Some(row.aggregate_type),
            created_at: row.created_at,
            valid_at: row.valid_at,
            namespace: Some(row.namespace),
            has_failed: row.has_failed,
            error_code: row.error_code,
            error_message: row.error_message,
            error_trace: row.error_trace,
            properties: row.properties,
            payload,
        })
    }
}

#[derive(Debug)]
struct AggregateRow {
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    aggregate_root: Option<uuid::Uuid>,
    namespace: String,
    latest_revision: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AggregateRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AggregateRow {
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_root: row.try_get("aggregate_root")?,
            namespace: row.try_get("namespace")?,
            latest_revision: row.try_get("latest_revision")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<AggregateRow> for AggregateMetadata {
    fn from(row: AggregateRow) -> Self {
        AggregateMetadata {
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            aggregate_root: row.aggregate_root.map(AggregateId::from_uuid),
            namespace: row.namespace,
            latest_revision: row.latest_revision as u64,
            created_at: row.created_at,
        }
    }
}
