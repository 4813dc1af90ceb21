//! Compensation overlay.
//!
//! Not a runtime component of its own: a workflow definition declares an
//! error boundary on a dispatch-bridge task and, on catch, rewrites the
//! command descriptor variables to point at a semantically inverse command
//! (e.g. cancel in place of create), then re-invokes the same bridge
//! contract. The bridge never knows it is compensating.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::dispatch_bridge::{
    CommandDispatchBridge, VAR_COMMAND_CLASS_NAME, VAR_CONSTRUCTOR_PARAMETERS,
};
use crate::engine::{ProcessEngine, ProcessInstanceId};
use crate::error::EngineError;

/// The inverse command a failed task reroutes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationPlan {
    /// Registry key of the compensating command.
    pub command: String,
    /// Constructor parameters of the compensating command; the variables
    /// themselves must already be present on the instance.
    pub parameters: Vec<String>,
}

impl CompensationPlan {
    pub fn new(command: impl Into<String>, parameters: &[&str]) -> Self {
        Self {
            command: command.into(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Error-boundary wiring: failed command key → compensation plan.
#[derive(Debug, Default)]
pub struct CompensationBoundary {
    plans: HashMap<String, CompensationPlan>,
}

impl CompensationBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the inverse of a command (builder style, wired at startup
    /// alongside the registry).
    pub fn declare(mut self, failed_command: impl Into<String>, plan: CompensationPlan) -> Self {
        self.plans.insert(failed_command.into(), plan);
        self
    }

    /// Handle a caught boundary error: rewrite the descriptor variables to
    /// the declared inverse command and re-run the bridge task.
    ///
    /// Returns the compensation dispatch's own outcome; a failure here is a
    /// new engine error for the next boundary out (or an incident).
    pub async fn compensate<E>(
        &self,
        bridge: &CommandDispatchBridge,
        engine: &E,
        instance: ProcessInstanceId,
        caught: &EngineError,
    ) -> Result<(), EngineError>
    where
        E: ProcessEngine + ?Sized,
    {
        let vars = engine.read_variables(instance).await.map_err(EngineError::from)?;

        let failed_command = vars
            .get(VAR_COMMAND_CLASS_NAME)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                EngineError::new(
                    "NO_COMPENSATION",
                    "failed task has no command descriptor to compensate",
                )
            })?;

        let Some(plan) = self.plans.get(failed_command) else {
            warn!(
                %instance,
                failed_command,
                caught = %caught.code,
                "no compensation declared for failed command"
            );
            return Err(EngineError::new(
                "NO_COMPENSATION",
                format!("no compensation declared for '{failed_command}'"),
            ));
        };

        info!(
            %instance,
            failed_command,
            caught = %caught.code,
            compensating_command = %plan.command,
            "rerouting task variables to compensating command"
        );

        engine
            .write_variable(
                instance,
                VAR_COMMAND_CLASS_NAME,
                serde_json::Value::from(plan.command.clone()),
            )
            .await
            .map_err(EngineError::from)?;
        engine
            .write_variable(
                instance,
                VAR_CONSTRUCTOR_PARAMETERS,
                serde_json::Value::from(plan.parameters.clone()),
            )
            .await
            .map_err(EngineError::from)?;

        bridge.execute(engine, instance).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use provigate_core::{TenantId, UserId};

    use crate::dispatch_bridge::{RESULT_SUCCESS, VAR_COMMAND_RESULT};
    use crate::engine::Variables;
    use crate::error::DispatchFailure;
    use crate::memory_engine::InMemoryProcessEngine;
    use crate::registry::CommandRegistry;

    #[tokio::test]
    async fn boundary_reroutes_to_the_inverse_command() {
        let tenant = TenantId::new();
        let compensations: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let mut registry = CommandRegistry::new();
        registry.register(
            "requests.StartProvisioning",
            &["tenant_id", "request_id"],
            |_ctx, _params| {
                Box::pin(async {
                    Err(DispatchFailure::new("INVALID_STATE", "not approved"))
                })
            },
        );
        let recorded = compensations.clone();
        registry.register(
            "requests.CancelRequest",
            &["tenant_id", "request_id"],
            move |_ctx, params| {
                let recorded = recorded.clone();
                Box::pin(async move {
                    let id = params.get("request_id").and_then(|v| v.as_str());
                    recorded.lock().unwrap().push(id.unwrap_or("?").to_string());
                    Ok(())
                })
            },
        );

        let bridge = CommandDispatchBridge::new(Arc::new(registry), UserId::new());
        let boundary = CompensationBoundary::new().declare(
            "requests.StartProvisioning",
            CompensationPlan::new("requests.CancelRequest", &["tenant_id", "request_id"]),
        );

        let engine = InMemoryProcessEngine::new();
        let mut vars = Variables::new();
        vars.insert(VAR_COMMAND_CLASS_NAME.to_string(), json!("requests.StartProvisioning"));
        vars.insert(
            VAR_CONSTRUCTOR_PARAMETERS.to_string(),
            json!(["tenant_id", "request_id"]),
        );
        vars.insert("tenant_id".to_string(), json!(tenant.to_string()));
        vars.insert("request_id".to_string(), json!("req-1"));
        let instance = engine
            .start_instance("request_fulfilment", "req-1", tenant, vars)
            .await
            .unwrap();

        // Task fails, boundary catches, compensation dispatches the inverse.
        let caught = bridge.execute(&engine, instance).await.unwrap_err();
        assert_eq!(caught.code, "INVALID_STATE");

        boundary
            .compensate(&bridge, &engine, instance, &caught)
            .await
            .unwrap();

        assert_eq!(compensations.lock().unwrap().as_slice(), ["req-1"]);
        let vars = engine.read_variables(instance).await.unwrap();
        assert_eq!(vars.get(VAR_COMMAND_RESULT), Some(&json!(RESULT_SUCCESS)));
        assert_eq!(
            vars.get(VAR_COMMAND_CLASS_NAME),
            Some(&json!("requests.CancelRequest"))
        );
    }

    #[tokio::test]
    async fn undeclared_compensation_surfaces_as_its_own_error() {
        let tenant = TenantId::new();
        let registry = CommandRegistry::new();
        let bridge = CommandDispatchBridge::new(Arc::new(registry), UserId::new());
        let boundary = CompensationBoundary::new();

        let engine = InMemoryProcessEngine::new();
        let mut vars = Variables::new();
        vars.insert(VAR_COMMAND_CLASS_NAME.to_string(), json!("requests.Submit"));
        let instance = engine
            .start_instance("request_fulfilment", "req-1", tenant, vars)
            .await
            .unwrap();

        let caught = EngineError::new("INVALID_STATE", "boom");
        let err = boundary
            .compensate(&bridge, &engine, instance, &caught)
            .await
            .unwrap_err();
        assert_eq!(err.code, "NO_COMPENSATION");
    }
}
