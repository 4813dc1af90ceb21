//! Event store port: append with optimistic concurrency, load a full stream.
//!
//! Streams are identified by `(tenant_id, aggregate_id)`. Sequence numbers
//! are 1-based and gap-free per stream; the store never updates or deletes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use provigate_core::{AggregateId, ExecutionContext, ExpectedVersion, TenantId};
use provigate_events::{Event, EventEnvelope, EventMetadata};

/// An event decided by an aggregate, not yet persisted.
///
/// Sequence numbers are assigned by the store at append time, never by the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    /// Schema version of the payload.
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub metadata: EventMetadata,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Serialize a typed domain event for the store, stamping metadata from
    /// the ambient execution context.
    pub fn from_typed<E>(
        ctx: &ExecutionContext,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: Event + serde::Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("event payload not serializable: {e}"))
        })?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            metadata: EventMetadata {
                tenant_id: ctx.tenant_id(),
                user_id: ctx.user_id(),
                correlation_id: ctx.correlation_id(),
            },
            payload,
        })
    }
}

/// A persisted event as read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_version: u32,
    /// 1-based, gap-free position within the stream.
    pub sequence_number: u64,
    pub occurred_at: DateTime<Utc>,
    /// Storage time, assigned by the store.
    pub created_at: DateTime<Utc>,
    pub metadata: EventMetadata,
    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn tenant_id(&self) -> TenantId {
        self.metadata.tenant_id
    }

    /// Bus-envelope view of this event (raw JSON payload).
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.event_type.clone(),
            self.sequence_number,
            self.occurred_at,
            self.metadata,
            self.payload.clone(),
        )
    }

    /// Deserialize the payload back into its typed domain event.
    pub fn to_typed<E>(&self) -> Result<E, EventStoreError>
    where
        E: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            EventStoreError::Storage(format!(
                "stored payload of '{}' does not deserialize: {e}",
                self.event_type
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStoreError {
    /// Optimistic concurrency check failed; reload and retry.
    #[error("concurrency conflict on stream {aggregate_id}: {detail}")]
    Conflict {
        aggregate_id: AggregateId,
        detail: String,
    },

    /// The caller's tenant does not own the stream or batch it touches.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Malformed batch (empty, mixed aggregates, mismatched types).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// Underlying storage failure.
    #[error("event store failure: {0}")]
    Storage(String),
}

/// Append-only event store scoped by execution context.
///
/// Implementations must enforce, atomically per append:
/// - all-or-nothing batch persistence;
/// - `expected_version` against the stream's current version;
/// - tenant ownership (`ctx.tenant_id()` on every event and on the stream).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a batch to a single stream. Returns the events as persisted,
    /// with their assigned sequence numbers.
    async fn append(
        &self,
        ctx: &ExecutionContext,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load a stream in sequence order. A stream the tenant does not own
    /// reads as empty; ownership is never disclosed across tenants.
    async fn load_stream(
        &self,
        ctx: &ExecutionContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for std::sync::Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        ctx: &ExecutionContext,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(ctx, events, expected_version).await
    }

    async fn load_stream(
        &self,
        ctx: &ExecutionContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(ctx, aggregate_id).await
    }
}

/// Shared batch validation: non-empty, one aggregate, one aggregate type,
/// every event stamped with the caller's tenant.
pub(crate) fn validate_batch(
    ctx: &ExecutionContext,
    events: &[UncommittedEvent],
) -> Result<(AggregateId, String), EventStoreError> {
    let first = events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("empty batch".to_string()))?;

    for event in events {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "batch spans multiple aggregates".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(
                "batch mixes aggregate types".to_string(),
            ));
        }
        if event.metadata.tenant_id != ctx.tenant_id() {
            return Err(EventStoreError::TenantIsolation(format!(
                "event stamped for tenant {} appended under tenant {}",
                event.metadata.tenant_id,
                ctx.tenant_id()
            )));
        }
    }

    Ok((first.aggregate_id, first.aggregate_type.clone()))
}
