//! Postgres-backed projector state store.
//!
//! One row per projector in `evstore_projector_state` (see
//! `migrations/0002_projector_state.sql`). Every mutation is a single upsert,
//! so states are created on first access without a separate existence check.
//!
//! `lock` is a compare-and-set: the conflicting row is only updated when it is
//! not locked (or when forced). No returned row means someone else holds it.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use evstore_events::{Event, ProjectorFailure};

use super::state::{ProjectorLockedError, State, StateFailure, StateStore, StateStoreError};

const STATE_COLUMNS: &str = r#"
    id,
    latest_event_position,
    latest_event_date,
    created_at,
    updated_at,
    is_locked,
    is_error,
    error_code,
    error_message,
    error_trace"#;

#[derive(Debug, Clone)]
pub struct PostgresStateStore {
    pool: Arc<PgPool>,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the state table if missing.
    #[instrument(skip(self), err)]
    pub async fn install_schema(&self) -> Result<(), StateStoreError> {
        sqlx::raw_sql(include_str!("../../migrations/0002_projector_state.sql"))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("install_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(projector = %id))]
    pub async fn try_lock(&self, id: &str, force: bool) -> Result<State, StateStoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO evstore_projector_state (id, is_locked)
            VALUES ($1, true)
            ON CONFLICT (id)
            DO UPDATE SET
                is_locked = true,
                updated_at = now()
            WHERE evstore_projector_state.is_locked = false OR $2
            RETURNING {STATE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(force)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("lock", e))?;

        match row {
            Some(row) => read_state(&row),
            None => Err(ProjectorLockedError(id.to_string()).into()),
        }
    }

    #[instrument(skip(self), fields(projector = %id), err)]
    pub async fn release(&self, id: &str) -> Result<State, StateStoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO evstore_projector_state (id, is_locked)
            VALUES ($1, false)
            ON CONFLICT (id)
            DO UPDATE SET
                is_locked = false,
                updated_at = now()
            RETURNING {STATE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unlock", e))?;

        read_state(&row)
    }

    /// Advance progress to `event`, setting or clearing the error.
    #[instrument(
        skip(self, event, failure),
        fields(projector = %id, position = event.position(), failed = failure.is_some()),
        err
    )]
    pub async fn record(
        &self,
        id: &str,
        event: &Event,
        failure: Option<StateFailure>,
        unlock: bool,
    ) -> Result<State, StateStoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO evstore_projector_state (
                id,
                latest_event_position,
                latest_event_date,
                is_error,
                error_code,
                error_message,
                error_trace
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id)
            DO UPDATE SET
                latest_event_date = CASE
                    WHEN EXCLUDED.latest_event_position >= evstore_projector_state.latest_event_position
                    THEN EXCLUDED.latest_event_date
                    ELSE evstore_projector_state.latest_event_date
                END,
                latest_event_position = GREATEST(
                    evstore_projector_state.latest_event_position,
                    EXCLUDED.latest_event_position
                ),
                is_error = EXCLUDED.is_error,
                error_code = EXCLUDED.error_code,
                error_message = EXCLUDED.error_message,
                error_trace = EXCLUDED.error_trace,
                is_locked = CASE WHEN $8 THEN false ELSE evstore_projector_state.is_locked END,
                updated_at = now()
            RETURNING {STATE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(event.position() as i64)
        .bind(event.valid_at())
        .bind(failure.is_some())
        .bind(failure.as_ref().map_or(0, |f| f.code))
        .bind(failure.as_ref().map(|f| f.message.clone()))
        .bind(failure.as_ref().and_then(|f| f.trace.clone()))
        .bind(unlock)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record", e))?;

        read_state(&row)
    }

    pub async fn load(&self, id: &str) -> Result<Option<State>, StateStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM evstore_projector_state WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest", e))?;

        row.as_ref().map(read_state).transpose()
    }

    #[instrument(skip(self), fields(projector = %id), err)]
    pub async fn remove(&self, id: &str) -> Result<(), StateStoreError> {
        sqlx::query("DELETE FROM evstore_projector_state WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(())
    }

    fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, StateStoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StateStoreError::Storage(
                "PostgresStateStore requires async runtime (tokio). Ensure you're calling from within a tokio runtime context.".to_string(),
            )
        })?;
        Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
    }
}

impl StateStore for PostgresStateStore {
    fn lock(&self, id: &str, force: bool) -> Result<State, StateStoreError> {
        self.block_on(self.try_lock(id, force))?
    }

    fn unlock(&self, id: &str) -> Result<State, StateStoreError> {
        self.block_on(self.release(id))?
    }

    fn update(&self, id: &str, event: &Event, unlock: bool) -> Result<State, StateStoreError> {
        self.block_on(self.record(id, event, None, unlock))?
    }

    fn exception(
        &self,
        id: &str,
        event: &Event,
        failure: &ProjectorFailure,
        unlock: bool,
    ) -> Result<State, StateStoreError> {
        self.block_on(self.record(id, event, Some(StateFailure::from(failure)), unlock))?
    }

    fn latest(&self, id: &str) -> Result<Option<State>, StateStoreError> {
        self.block_on(self.load(id))?
    }

    fn delete(&self, id: &str) -> Result<(), StateStoreError> {
        self.block_on(self.remove(id))?
    }
}

fn read_state(row: &PgRow) -> Result<State, StateStoreError> {
    StateRow::from_row(row)
        .map(State::from)
        .map_err(|e| map_sqlx_error("read_state", e))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StateStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StateStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StateStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StateStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[derive(Debug)]
struct StateRow {
    id: String,
    latest_event_position: i64,
    latest_event_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_locked: bool,
    is_error: bool,
    error_code: i64,
    error_message: Option<String>,
    error_trace: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for StateRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StateRow {
            id: row.try_get("id")?,
            latest_event_position: row.try_get("latest_event_position")?,
            latest_event_date: row.try_get("latest_event_date")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            is_locked: row.try_get("is_locked")?,
            is_error: row.try_get("is_error")?,
            error_code: row.try_get("error_code")?,
            error_message: row.try_get("error_message")?,
            error_trace: row.try_get("error_trace")?,
        })
    }
}

impl From<StateRow> for State {
    fn from(row: StateRow) -> Self {
        let failure = row.is_error.then(|| StateFailure {
            code: row.error_code,
            message: row.error_message.unwrap_or_default(),
            trace: row.error_trace,
        });
        State {
            id: row.id,
            latest_event_position: row.latest_event_position.max(0) as u64,
            latest_event_date: row.latest_event_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
            locked: row.is_locked,
            failure,
        }
    }
}
