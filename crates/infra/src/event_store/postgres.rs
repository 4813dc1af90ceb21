//! Postgres-backed event store (sqlx).
//!
//! One table, append-only. The `(tenant_id, aggregate_id, sequence_number)`
//! unique index is the last line of defence for optimistic concurrency:
//! two writers racing past the in-transaction version check collapse into a
//! unique violation, which is surfaced as a conflict.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPool;
use tracing::instrument;
use uuid::Uuid;

use provigate_core::{AggregateId, CorrelationId, ExecutionContext, ExpectedVersion, TenantId, UserId};
use provigate_events::EventMetadata;

use super::store::{validate_batch, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Schema for the event log. Idempotent; applied via [`PostgresEventStore::migrate`].
pub const EVENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id              BIGSERIAL PRIMARY KEY,
    event_id        UUID        NOT NULL UNIQUE,
    tenant_id       UUID        NOT NULL,
    aggregate_id    UUID        NOT NULL,
    aggregate_type  TEXT        NOT NULL,
    event_type      TEXT        NOT NULL,
    event_version   INT         NOT NULL,
    sequence_number BIGINT      NOT NULL CHECK (sequence_number > 0),
    occurred_at     TIMESTAMPTZ NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    user_id         UUID        NOT NULL,
    correlation_id  UUID        NOT NULL,
    payload         JSONB       NOT NULL,
    UNIQUE (tenant_id, aggregate_id, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_events_stream
    ON events (tenant_id, aggregate_id, sequence_number);
"#;

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct StoredEventRow {
    event_id: Uuid,
    tenant_id: Uuid,
    aggregate_id: Uuid,
    aggregate_type: String,
    event_type: String,
    event_version: i32,
    sequence_number: i64,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    user_id: Uuid,
    correlation_id: Uuid,
    payload: JsonValue,
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            aggregate_id: AggregateId::from(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            sequence_number: row.sequence_number as u64,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
            metadata: EventMetadata {
                tenant_id: TenantId::from(row.tenant_id),
                user_id: UserId::from(row.user_id),
                correlation_id: CorrelationId::from(row.correlation_id),
            },
            payload: row.payload,
        }
    }
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the event-log schema.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(EVENTS_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

fn storage_error(err: sqlx::Error) -> EventStoreError {
    EventStoreError::Storage(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, ctx, events),
        fields(tenant_id = %ctx.tenant_id(), correlation_id = %ctx.correlation_id())
    )]
    async fn append(
        &self,
        ctx: &ExecutionContext,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let (aggregate_id, _) = validate_batch(ctx, &events)?;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        // Ownership check across the whole table, not just the tenant's
        // partition: an aggregate id belongs to its first writer.
        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT tenant_id FROM events WHERE aggregate_id = $1 LIMIT 1")
                .bind(Uuid::from(aggregate_id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?;
        if let Some(owner) = owner {
            if owner != Uuid::from(ctx.tenant_id()) {
                return Err(EventStoreError::TenantIsolation(
                    "stream is owned by another tenant".to_string(),
                ));
            }
        }

        let current_version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM events \
             WHERE tenant_id = $1 AND aggregate_id = $2",
        )
        .bind(Uuid::from(ctx.tenant_id()))
        .bind(Uuid::from(aggregate_id))
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        if !expected_version.matches(current_version as u64) {
            return Err(EventStoreError::Conflict {
                aggregate_id,
                detail: format!("expected {expected_version:?}, stream is at {current_version}"),
            });
        }

        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let sequence_number = current_version + offset as i64 + 1;
            let row: StoredEventRow = sqlx::query_as(
                "INSERT INTO events (event_id, tenant_id, aggregate_id, aggregate_type, \
                     event_type, event_version, sequence_number, occurred_at, \
                     user_id, correlation_id, payload) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 RETURNING event_id, tenant_id, aggregate_id, aggregate_type, event_type, \
                     event_version, sequence_number, occurred_at, created_at, \
                     user_id, correlation_id, payload",
            )
            .bind(event.event_id)
            .bind(Uuid::from(event.metadata.tenant_id))
            .bind(Uuid::from(event.aggregate_id))
            .bind(&event.aggregate_type)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(sequence_number)
            .bind(event.occurred_at)
            .bind(Uuid::from(event.metadata.user_id))
            .bind(Uuid::from(event.metadata.correlation_id))
            .bind(&event.payload)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    EventStoreError::Conflict {
                        aggregate_id,
                        detail: "concurrent writer won the stream position".to_string(),
                    }
                } else {
                    storage_error(err)
                }
            })?;
            committed.push(StoredEvent::from(row));
        }

        tx.commit().await.map_err(|err| {
            if is_unique_violation(&err) {
                EventStoreError::Conflict {
                    aggregate_id,
                    detail: "concurrent writer won the stream position".to_string(),
                }
            } else {
                storage_error(err)
            }
        })?;

        Ok(committed)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()))]
    async fn load_stream(
        &self,
        ctx: &ExecutionContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<StoredEventRow> = sqlx::query_as(
            "SELECT event_id, tenant_id, aggregate_id, aggregate_type, event_type, \
                 event_version, sequence_number, occurred_at, created_at, \
                 user_id, correlation_id, payload \
             FROM events \
             WHERE tenant_id = $1 AND aggregate_id = $2 \
             ORDER BY sequence_number",
        )
        .bind(Uuid::from(ctx.tenant_id()))
        .bind(Uuid::from(aggregate_id))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }
}
