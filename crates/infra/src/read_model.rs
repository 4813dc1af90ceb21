//! Read-model notification port.
//!
//! Fired by the command router after an append commits. Notification is
//! best-effort: the event log is the source of truth and a failed or lost
//! notification never rolls an append back; read models catch up from the
//! log.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use provigate_core::{AggregateId, TenantId};

/// Denormalized summary of an aggregate after a state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSummary {
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// Type of the last event in the change, e.g. "provisioning.request.approved".
    pub last_event_type: String,
    /// Stream version after the change.
    pub version: u64,
}

#[derive(Debug, Error)]
#[error("read-model notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait ReadModelNotifier: Send + Sync {
    async fn notify(&self, summary: StateSummary) -> Result<(), NotifyError>;
}

/// In-memory status board, keyed per tenant. Used as the default notifier in
/// tests and for dev tooling.
#[derive(Debug, Default)]
pub struct InMemoryStatusBoard {
    rows: Mutex<HashMap<(TenantId, AggregateId), StateSummary>>,
}

impl InMemoryStatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_for(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Option<StateSummary> {
        self.lock().get(&(tenant_id, aggregate_id)).cloned()
    }

    pub fn all_for_tenant(&self, tenant_id: TenantId) -> Vec<StateSummary> {
        self.lock()
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(TenantId, AggregateId), StateSummary>> {
        match self.rows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ReadModelNotifier for InMemoryStatusBoard {
    async fn notify(&self, summary: StateSummary) -> Result<(), NotifyError> {
        self.lock()
            .insert((summary.tenant_id, summary.aggregate_id), summary);
        Ok(())
    }
}
