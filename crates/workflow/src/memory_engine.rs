//! In-memory process engine for tests/dev.
//!
//! Implements the full [`ProcessEngine`] contract plus a few inherent helpers
//! the tests use to put an instance into a waiting state and to observe what
//! was delivered. No task scheduling: tests drive bridge tasks explicitly.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use provigate_core::TenantId;

use crate::engine::{
    EngineFault, ProcessEngine, ProcessInstanceId, VAR_INSTANCE_TENANT, Variables,
};

/// A message subscription: the instance is suspended until a matching message
/// arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MessageSubscription {
    message_name: String,
    correlation_key: String,
}

/// Record of a delivered message (for assertions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub message_name: String,
    pub variables: Variables,
}

#[derive(Debug)]
struct InstanceState {
    #[allow(dead_code)]
    definition_key: String,
    business_key: String,
    tenant_id: TenantId,
    variables: Variables,
    waiting: Option<MessageSubscription>,
    delivered: Vec<DeliveredMessage>,
}

/// In-memory fake of the external workflow engine.
#[derive(Debug, Default)]
pub struct InMemoryProcessEngine {
    instances: Mutex<HashMap<ProcessInstanceId, InstanceState>>,
}

impl InMemoryProcessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an instance into a waiting state on `(message_name, correlation_key)`.
    ///
    /// In a real engine this happens when execution reaches a message catch
    /// event; here the test declares it.
    pub fn subscribe_message(
        &self,
        instance: ProcessInstanceId,
        message_name: impl Into<String>,
        correlation_key: impl Into<String>,
    ) -> Result<(), EngineFault> {
        let mut instances = self.lock();
        let state = instances
            .get_mut(&instance)
            .ok_or(EngineFault::InstanceNotFound(instance))?;
        state.waiting = Some(MessageSubscription {
            message_name: message_name.into(),
            correlation_key: correlation_key.into(),
        });
        Ok(())
    }

    /// Whether the instance is still suspended on a message.
    pub fn is_waiting(&self, instance: ProcessInstanceId) -> bool {
        self.lock()
            .get(&instance)
            .map(|s| s.waiting.is_some())
            .unwrap_or(false)
    }

    /// Messages delivered to the instance so far, in order.
    pub fn delivered_messages(&self, instance: ProcessInstanceId) -> Vec<DeliveredMessage> {
        self.lock()
            .get(&instance)
            .map(|s| s.delivered.clone())
            .unwrap_or_default()
    }

    pub fn business_key(&self, instance: ProcessInstanceId) -> Option<String> {
        self.lock().get(&instance).map(|s| s.business_key.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ProcessInstanceId, InstanceState>> {
        // Lock poisoning means a test already panicked; propagate the state.
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProcessEngine for InMemoryProcessEngine {
    async fn start_instance(
        &self,
        definition_key: &str,
        business_key: &str,
        tenant_id: TenantId,
        mut variables: Variables,
    ) -> Result<ProcessInstanceId, EngineFault> {
        let instance = ProcessInstanceId::new();
        variables.insert(
            VAR_INSTANCE_TENANT.to_string(),
            JsonValue::String(tenant_id.to_string()),
        );

        self.lock().insert(
            instance,
            InstanceState {
                definition_key: definition_key.to_string(),
                business_key: business_key.to_string(),
                tenant_id,
                variables,
                waiting: None,
                delivered: Vec::new(),
            },
        );

        Ok(instance)
    }

    async fn instance_tenant(&self, instance: ProcessInstanceId) -> Result<TenantId, EngineFault> {
        self.lock()
            .get(&instance)
            .map(|s| s.tenant_id)
            .ok_or(EngineFault::InstanceNotFound(instance))
    }

    async fn read_variables(&self, instance: ProcessInstanceId) -> Result<Variables, EngineFault> {
        self.lock()
            .get(&instance)
            .map(|s| s.variables.clone())
            .ok_or(EngineFault::InstanceNotFound(instance))
    }

    async fn write_variable(
        &self,
        instance: ProcessInstanceId,
        name: &str,
        value: JsonValue,
    ) -> Result<(), EngineFault> {
        let mut instances = self.lock();
        let state = instances
            .get_mut(&instance)
            .ok_or(EngineFault::InstanceNotFound(instance))?;
        state.variables.insert(name.to_string(), value);
        Ok(())
    }

    async fn find_message_subscription(
        &self,
        message_name: &str,
        correlation_key: &str,
    ) -> Result<Option<ProcessInstanceId>, EngineFault> {
        let instances = self.lock();
        Ok(instances
            .iter()
            .find(|(_, s)| {
                s.waiting.as_ref().is_some_and(|w| {
                    w.message_name == message_name && w.correlation_key == correlation_key
                })
            })
            .map(|(id, _)| *id))
    }

    async fn deliver_message(
        &self,
        instance: ProcessInstanceId,
        message_name: &str,
        variables: Variables,
    ) -> Result<(), EngineFault> {
        let mut instances = self.lock();
        let state = instances
            .get_mut(&instance)
            .ok_or(EngineFault::InstanceNotFound(instance))?;

        match &state.waiting {
            Some(sub) if sub.message_name == message_name => {
                state.waiting = None;
                for (name, value) in &variables {
                    state.variables.insert(name.clone(), value.clone());
                }
                state.delivered.push(DeliveredMessage {
                    message_name: message_name.to_string(),
                    variables,
                });
                Ok(())
            }
            _ => Err(EngineFault::NoSubscription {
                message_name: message_name.to_string(),
                correlation_key: state.business_key.clone(),
            }),
        }
    }

    async fn signal_waiting_instance(
        &self,
        message_name: &str,
        correlation_key: &str,
        variables: Variables,
    ) -> Result<(), EngineFault> {
        let instance = self
            .find_message_subscription(message_name, correlation_key)
            .await?
            .ok_or_else(|| EngineFault::NoSubscription {
                message_name: message_name.to_string(),
                correlation_key: correlation_key.to_string(),
            })?;
        self.deliver_message(instance, message_name, variables).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn start_records_tenant_as_ambient_and_as_variable() {
        let engine = InMemoryProcessEngine::new();
        let tenant = TenantId::new();

        let instance = engine
            .start_instance("request_fulfilment", "req-1", tenant, Variables::new())
            .await
            .unwrap();

        assert_eq!(engine.instance_tenant(instance).await.unwrap(), tenant);
        let vars = engine.read_variables(instance).await.unwrap();
        assert_eq!(
            vars.get(VAR_INSTANCE_TENANT),
            Some(&json!(tenant.to_string()))
        );
    }

    #[tokio::test]
    async fn message_delivery_resumes_exactly_the_matching_subscription() {
        let engine = InMemoryProcessEngine::new();
        let tenant = TenantId::new();
        let instance = engine
            .start_instance("request_fulfilment", "req-1", tenant, Variables::new())
            .await
            .unwrap();

        engine
            .subscribe_message(instance, "request_decided", "req-1")
            .unwrap();
        assert!(engine.is_waiting(instance));

        // Wrong key: nobody to signal.
        assert!(
            engine
                .find_message_subscription("request_decided", "req-2")
                .await
                .unwrap()
                .is_none()
        );

        engine
            .signal_waiting_instance("request_decided", "req-1", Variables::new())
            .await
            .unwrap();
        assert!(!engine.is_waiting(instance));
        assert_eq!(engine.delivered_messages(instance).len(), 1);

        // Second delivery of the same publish target: no subscription left.
        let err = engine
            .signal_waiting_instance("request_decided", "req-1", Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineFault::NoSubscription { .. }));
    }
}
