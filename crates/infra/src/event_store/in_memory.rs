//! In-memory event store for tests/dev.
//!
//! Same contract as the durable store: per-stream optimistic concurrency,
//! tenant partitioning, gap-free 1-based sequence numbers.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use provigate_core::{AggregateId, ExecutionContext, ExpectedVersion, TenantId};

use super::store::{validate_batch, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Streams are partitioned by tenant first; the same aggregate id under two
/// tenants is two unrelated streams as far as reads are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Default)]
struct Streams {
    events: HashMap<StreamKey, Vec<StoredEvent>>,
    /// First-writer tenant per aggregate id; appends from any other tenant
    /// are refused outright.
    owners: HashMap<AggregateId, TenantId>,
}

/// In-memory store; interior mutability via `RwLock`, short critical
/// sections only.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Streams>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Streams> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Streams> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        ctx: &ExecutionContext,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let (aggregate_id, _) = validate_batch(ctx, &events)?;
        let key = StreamKey {
            tenant_id: ctx.tenant_id(),
            aggregate_id,
        };

        let mut inner = self.write();

        match inner.owners.get(&aggregate_id) {
            Some(owner) if *owner != ctx.tenant_id() => {
                return Err(EventStoreError::TenantIsolation(
                    "stream is owned by another tenant".to_string(),
                ));
            }
            _ => {}
        }

        let stream = inner.events.entry(key).or_default();
        let current_version = stream.len() as u64;
        if !expected_version.matches(current_version) {
            return Err(EventStoreError::Conflict {
                aggregate_id,
                detail: format!("expected {expected_version:?}, stream is at {current_version}"),
            });
        }

        let created_at = Utc::now();
        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            committed.push(StoredEvent {
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                event_type: event.event_type,
                event_version: event.event_version,
                sequence_number: current_version + offset as u64 + 1,
                occurred_at: event.occurred_at,
                created_at,
                metadata: event.metadata,
                payload: event.payload,
            });
        }
        stream.extend(committed.iter().cloned());
        inner.owners.insert(aggregate_id, ctx.tenant_id());

        Ok(committed)
    }

    async fn load_stream(
        &self,
        ctx: &ExecutionContext,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id: ctx.tenant_id(),
            aggregate_id,
        };
        // A foreign tenant's stream reads as empty, never as an error.
        Ok(self.read().events.get(&key).cloned().unwrap_or_default())
    }
}
