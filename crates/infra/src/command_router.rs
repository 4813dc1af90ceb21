//! Command router: the persistent command pipeline.
//!
//! load stream → validate → rehydrate → decide → append (optimistic) →
//! publish → notify read models. One command, one stream, one transaction
//! boundary.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{instrument, warn};

use provigate_core::{
    Aggregate, AggregateId, DomainError, ExecutionContext, ExpectedVersion, reconstitute,
};
use provigate_events::{
    Command, Correlated, CorrelationHint, Event, EventBus, EventNotice, NoticeSubscriber,
};
use provigate_workflow::DispatchFailure;

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::read_model::{ReadModelNotifier, StateSummary};

#[derive(Debug, Error)]
pub enum RouteError {
    /// Another writer advanced the stream; reload and retry.
    #[error("concurrency conflict on {aggregate_id}: {detail}")]
    Concurrency {
        aggregate_id: AggregateId,
        detail: String,
    },

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Duplicate creation or similar domain-level conflict (not a lost
    /// optimistic-concurrency race).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    /// A persisted event no longer deserializes into the domain model.
    #[error("stored stream is unreadable: {0}")]
    UnreadableStream(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl RouteError {
    /// Stable machine-readable code, used as the workflow-facing error code.
    pub fn code(&self) -> &'static str {
        match self {
            RouteError::Concurrency { .. } => "CONCURRENCY_CONFLICT",
            RouteError::TenantIsolation(_) => "TENANT_ISOLATION",
            RouteError::Validation(_) => "VALIDATION_FAILED",
            RouteError::InvalidState(_) => "INVALID_STATE",
            RouteError::Conflict(_) => "CONFLICT",
            RouteError::Forbidden => "FORBIDDEN",
            RouteError::NotFound => "NOT_FOUND",
            RouteError::UnreadableStream(_) => "UNREADABLE_STREAM",
            RouteError::Store(_) => "STORE_FAILURE",
        }
    }
}

impl From<DomainError> for RouteError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => RouteError::Validation(msg),
            DomainError::InvalidState(msg) => RouteError::InvalidState(msg),
            DomainError::InvalidId(msg) => RouteError::Validation(msg),
            DomainError::Conflict(msg) => RouteError::Conflict(msg),
            DomainError::NotFound => RouteError::NotFound,
            DomainError::Forbidden => RouteError::Forbidden,
        }
    }
}

impl From<EventStoreError> for RouteError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::Conflict {
                aggregate_id,
                detail,
            } => RouteError::Concurrency {
                aggregate_id,
                detail,
            },
            EventStoreError::TenantIsolation(msg) => RouteError::TenantIsolation(msg),
            other => RouteError::Store(other),
        }
    }
}

impl From<RouteError> for DispatchFailure {
    fn from(err: RouteError) -> Self {
        DispatchFailure::new(err.code(), err.to_string())
    }
}

/// Routes commands to aggregates and owns the post-append fan-out.
///
/// Subscribers run inline after publication, in registration order, so a
/// caller returning from `route` knows every inline subscriber (e.g. the
/// workflow signal bridge) has observed the new events.
pub struct CommandRouter<S, B> {
    store: S,
    bus: B,
    subscribers: Vec<Arc<dyn NoticeSubscriber>>,
    notifier: Option<Arc<dyn ReadModelNotifier>>,
}

impl<S, B> CommandRouter<S, B>
where
    S: EventStore,
    B: EventBus<EventNotice<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            subscribers: Vec::new(),
            notifier: None,
        }
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn NoticeSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ReadModelNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Execute one command against one aggregate stream.
    ///
    /// `empty` builds the pre-creation aggregate instance for rehydration.
    /// Returns the newly committed events; an empty list means the command
    /// was accepted as a no-op.
    #[instrument(
        skip(self, ctx, empty, command),
        fields(
            tenant_id = %ctx.tenant_id(),
            user_id = %ctx.user_id(),
            correlation_id = %ctx.correlation_id(),
        )
    )]
    pub async fn route<A>(
        &self,
        ctx: &ExecutionContext,
        aggregate_type: &str,
        empty: impl FnOnce(AggregateId) -> A,
        command: &A::Command,
    ) -> Result<Vec<StoredEvent>, RouteError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + Correlated + Serialize + DeserializeOwned,
    {
        let aggregate_id = command.target_aggregate_id();

        let stream = self.store.load_stream(ctx, aggregate_id).await?;
        validate_loaded_stream(ctx, aggregate_type, &stream)?;
        let stream_version = stream.last().map(|e| e.sequence_number).unwrap_or(0);

        let mut history = Vec::with_capacity(stream.len());
        for stored in &stream {
            let event: A::Event = stored
                .to_typed()
                .map_err(|e| RouteError::UnreadableStream(e.to_string()))?;
            history.push(event);
        }
        let aggregate = reconstitute(empty(aggregate_id), history);

        let events = match aggregate.handle(command) {
            Ok(events) => events,
            Err(err) => {
                if matches!(err, DomainError::Forbidden) {
                    // Audit trail; the caller only sees an opaque refusal.
                    warn!(
                        tenant_id = %ctx.tenant_id(),
                        user_id = %ctx.user_id(),
                        %aggregate_id,
                        "command rejected: authorization failure"
                    );
                }
                return Err(RouteError::from(err));
            }
        };
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut uncommitted = Vec::with_capacity(events.len());
        for event in &events {
            uncommitted.push(UncommittedEvent::from_typed(
                ctx,
                aggregate_id,
                aggregate_type,
                event,
            )?);
        }

        let committed = self
            .store
            .append(ctx, uncommitted, ExpectedVersion::Exact(stream_version))
            .await?;

        self.fan_out(ctx, &events, &committed).await;

        Ok(committed)
    }

    /// Post-commit distribution. The append is already durable: nothing in
    /// here may fail the command, only log.
    async fn fan_out<E>(&self, ctx: &ExecutionContext, events: &[E], committed: &[StoredEvent])
    where
        E: Correlated,
    {
        for (event, stored) in events.iter().zip(committed) {
            let correlation = event
                .message_address()
                .map(|address| CorrelationHint::new(address, ctx.tenant_id()));
            let notice = EventNotice::new(stored.to_envelope(), correlation);

            if let Err(err) = self.bus.publish(notice.clone()) {
                warn!(
                    event_type = %stored.event_type,
                    aggregate_id = %stored.aggregate_id,
                    error = ?err,
                    "event publication failed; consumers catch up from the log"
                );
            }

            for subscriber in &self.subscribers {
                subscriber.on_notice(&notice).await;
            }
        }

        if let (Some(notifier), Some(last)) = (&self.notifier, committed.last()) {
            let summary = StateSummary {
                tenant_id: ctx.tenant_id(),
                aggregate_id: last.aggregate_id,
                aggregate_type: last.aggregate_type.clone(),
                last_event_type: last.event_type.clone(),
                version: last.sequence_number,
            };
            if let Err(err) = notifier.notify(summary).await {
                warn!(
                    aggregate_id = %last.aggregate_id,
                    error = %err,
                    "read-model notification failed; read model will catch up"
                );
            }
        }
    }
}

/// Defense in depth on reads: the store already partitions by tenant, but a
/// stream handed to rehydration is re-checked for ownership, ordering and
/// type before any event is applied.
fn validate_loaded_stream(
    ctx: &ExecutionContext,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> Result<(), RouteError> {
    for (index, stored) in stream.iter().enumerate() {
        if stored.tenant_id() != ctx.tenant_id() {
            return Err(RouteError::TenantIsolation(
                "loaded stream contains foreign-tenant events".to_string(),
            ));
        }
        if stored.aggregate_type != aggregate_type {
            return Err(RouteError::UnreadableStream(format!(
                "stream holds '{}' events, expected '{aggregate_type}'",
                stored.aggregate_type
            )));
        }
        let expected_sequence = index as u64 + 1;
        if stored.sequence_number != expected_sequence {
            return Err(RouteError::UnreadableStream(format!(
                "sequence gap: position {index} holds sequence {}",
                stored.sequence_number
            )));
        }
    }
    Ok(())
}
