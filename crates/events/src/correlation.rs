//! Workflow correlation metadata attached to events at publish time.
//!
//! A process instance waits on a *message name* filtered by a *correlation
//! key* (typically its business key). When a domain event is published, the
//! publishing pipeline derives a [`CorrelationHint`] and attaches it to the
//! delivery; the hint is ephemeral and is never persisted with the event.

use serde::{Deserialize, Serialize};

use provigate_core::TenantId;

use crate::EventEnvelope;

/// Where an event should be signalled to, independent of tenancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAddress {
    /// Message name a process instance subscribes to (e.g. "request_decided").
    pub message_name: String,
    /// Business key of the instance the event belongs to.
    pub correlation_key: String,
}

impl MessageAddress {
    pub fn new(message_name: impl Into<String>, correlation_key: impl Into<String>) -> Self {
        Self {
            message_name: message_name.into(),
            correlation_key: correlation_key.into(),
        }
    }
}

/// Delivery-time correlation triple consumed by the event signal bridge.
///
/// `tenant_id` is carried so the bridge can refuse to resume a process
/// instance owned by a different tenant even when correlation keys collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationHint {
    pub message_name: String,
    pub correlation_key: String,
    pub tenant_id: TenantId,
}

impl CorrelationHint {
    pub fn new(address: MessageAddress, tenant_id: TenantId) -> Self {
        Self {
            message_name: address.message_name,
            correlation_key: address.correlation_key,
            tenant_id,
        }
    }
}

/// Implemented by domain event types that can wake a waiting workflow.
///
/// Most events return `None`: having no waiting workflow is the normal case,
/// not an error.
pub trait Correlated {
    fn message_address(&self) -> Option<MessageAddress>;
}

/// Bus message: a persisted event plus its optional correlation hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotice<E> {
    pub envelope: EventEnvelope<E>,
    pub correlation: Option<CorrelationHint>,
}

impl<E> EventNotice<E> {
    pub fn new(envelope: EventEnvelope<E>, correlation: Option<CorrelationHint>) -> Self {
        Self {
            envelope,
            correlation,
        }
    }

    pub fn uncorrelated(envelope: EventEnvelope<E>) -> Self {
        Self {
            envelope,
            correlation: None,
        }
    }
}
