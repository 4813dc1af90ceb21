//! Process-engine contract.
//!
//! The workflow engine is an external collaborator with its own persistence;
//! the core treats it purely as a message-passing peer. Everything here is
//! expressed against this trait so the core stays testable with the in-memory
//! fake and swappable against a real engine client.
//!
//! Consistency between "a command was dispatched" and "the instance advanced"
//! is best-effort across the two stores; the compensation overlay exists
//! because this link is not atomic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use provigate_core::TenantId;

/// Named variables of a process instance, as the engine sees them.
pub type Variables = serde_json::Map<String, JsonValue>;

/// Instance variable holding the owning tenant, set at start and compared by
/// the signal bridge before any message is delivered.
pub const VAR_INSTANCE_TENANT: &str = "tenant_id";

/// Engine-assigned identifier of a process instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessInstanceId(Uuid);

impl ProcessInstanceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProcessInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ProcessInstanceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Engine-side failure (instance gone, transport broken, ...).
#[derive(Debug, Error)]
pub enum EngineFault {
    #[error("process instance not found: {0}")]
    InstanceNotFound(ProcessInstanceId),

    #[error("no instance waiting on message '{message_name}' with key '{correlation_key}'")]
    NoSubscription {
        message_name: String,
        correlation_key: String,
    },

    #[error("engine failure: {0}")]
    Internal(String),
}

/// Contract the core honors when talking to the workflow engine.
///
/// The bridge is a *user* of this interface (the engine invokes registered
/// task implementations) and a *caller* of it when signalling. All operations
/// are potentially I/O-bound against a remote engine and therefore
/// suspending; implementations must not block a shared worker thread.
#[async_trait]
pub trait ProcessEngine: Send + Sync {
    /// Start a new instance of a deployed definition.
    ///
    /// The engine records `tenant_id` as the instance's ambient tenant and as
    /// the [`VAR_INSTANCE_TENANT`] variable.
    async fn start_instance(
        &self,
        definition_key: &str,
        business_key: &str,
        tenant_id: TenantId,
        variables: Variables,
    ) -> Result<ProcessInstanceId, EngineFault>;

    /// Ambient tenant of a running instance (authoritative; not a variable
    /// the workflow can overwrite from its own data).
    async fn instance_tenant(&self, instance: ProcessInstanceId) -> Result<TenantId, EngineFault>;

    async fn read_variables(&self, instance: ProcessInstanceId) -> Result<Variables, EngineFault>;

    async fn write_variable(
        &self,
        instance: ProcessInstanceId,
        name: &str,
        value: JsonValue,
    ) -> Result<(), EngineFault>;

    /// Find the instance currently subscribed to `message_name`, filtered by
    /// correlation key (typically the instance's business key).
    async fn find_message_subscription(
        &self,
        message_name: &str,
        correlation_key: &str,
    ) -> Result<Option<ProcessInstanceId>, EngineFault>;

    /// Deliver a message to a waiting instance, resuming it.
    ///
    /// At most one resumption per delivery; delivering to an instance that is
    /// not waiting on `message_name` is a fault.
    async fn deliver_message(
        &self,
        instance: ProcessInstanceId,
        message_name: &str,
        variables: Variables,
    ) -> Result<(), EngineFault>;

    /// Convenience: find + deliver in one call.
    ///
    /// Performs no tenant validation; the signal bridge does its own check
    /// between lookup and delivery and must not use this shortcut.
    async fn signal_waiting_instance(
        &self,
        message_name: &str,
        correlation_key: &str,
        variables: Variables,
    ) -> Result<(), EngineFault>;
}
