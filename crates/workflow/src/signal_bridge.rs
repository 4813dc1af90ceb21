//! Event-to-workflow signal bridge.
//!
//! Subscribes to all published events and resumes process instances waiting
//! on a message. Everything in here is resilience-shaped: events with no hint
//! are skipped, signals with no target are logged and dropped, and a tenant
//! mismatch drops the signal while the instance stays waiting. The bridge
//! never fails the publisher.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use provigate_core::TenantId;
use provigate_events::{EventNotice, NoticeSubscriber};

use crate::engine::{ProcessEngine, VAR_INSTANCE_TENANT, Variables};

/// Variables delivered with a resuming message.
pub const VAR_TRIGGERING_EVENT_TYPE: &str = "triggering_event_type";
pub const VAR_TRIGGERING_EVENT_ID: &str = "triggering_event_id";

/// Resumes workflow instances waiting on correlated domain events.
pub struct EventSignalBridge<E> {
    engine: Arc<E>,
}

impl<E> EventSignalBridge<E>
where
    E: ProcessEngine,
{
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }
}

/// Tenant recorded on the instance's `tenant_id` variable, if readable.
///
/// Unreadable or malformed is treated as "no tenant", which drops the
/// signal: this check fails closed.
fn instance_tenant_variable(vars: &Variables) -> Option<TenantId> {
    vars.get(VAR_INSTANCE_TENANT)
        .and_then(JsonValue::as_str)
        .and_then(|s| TenantId::from_str(s).ok())
}

#[async_trait]
impl<E> NoticeSubscriber for EventSignalBridge<E>
where
    E: ProcessEngine,
{
    async fn on_notice(&self, notice: &EventNotice<JsonValue>) {
        let envelope = &notice.envelope;

        let Some(hint) = &notice.correlation else {
            // Normal: most domain events have no waiting workflow.
            debug!(
                event_type = envelope.event_type(),
                aggregate_id = %envelope.aggregate_id(),
                "event carries no correlation hint; skipping"
            );
            return;
        };

        let instance = match self
            .engine
            .find_message_subscription(&hint.message_name, &hint.correlation_key)
            .await
        {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                // Resilience case: the workflow may already be cancelled or
                // the signal may race a deployment.
                warn!(
                    message_name = %hint.message_name,
                    correlation_key = %hint.correlation_key,
                    "no waiting process instance for signal"
                );
                return;
            }
            Err(fault) => {
                warn!(
                    message_name = %hint.message_name,
                    correlation_key = %hint.correlation_key,
                    error = %fault,
                    "subscription lookup failed; signal dropped"
                );
                return;
            }
        };

        let vars = match self.engine.read_variables(instance).await {
            Ok(vars) => vars,
            Err(fault) => {
                warn!(%instance, error = %fault, "cannot read instance variables; signal dropped");
                return;
            }
        };

        // Cross-tenant security boundary: an event from tenant B must never
        // resume an instance owned by tenant A, even on a key collision.
        // Logged for audit; the instance stays in its waiting state.
        match instance_tenant_variable(&vars) {
            Some(instance_tenant) if instance_tenant == hint.tenant_id => {}
            instance_tenant => {
                warn!(
                    %instance,
                    event_tenant = %hint.tenant_id,
                    instance_tenant = ?instance_tenant,
                    message_name = %hint.message_name,
                    "tenant mismatch; signal dropped"
                );
                return;
            }
        }

        let mut delivery = Variables::new();
        delivery.insert(
            VAR_TRIGGERING_EVENT_TYPE.to_string(),
            JsonValue::from(envelope.event_type().to_string()),
        );
        delivery.insert(
            VAR_TRIGGERING_EVENT_ID.to_string(),
            JsonValue::from(envelope.event_id().to_string()),
        );

        match self
            .engine
            .deliver_message(instance, &hint.message_name, delivery)
            .await
        {
            Ok(()) => debug!(
                %instance,
                message_name = %hint.message_name,
                event_type = envelope.event_type(),
                "process instance resumed"
            ),
            Err(fault) => warn!(
                %instance,
                message_name = %hint.message_name,
                error = %fault,
                "message delivery failed"
            ),
        }
    }
}
