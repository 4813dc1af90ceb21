//! Generic service task: dispatch a domain command described by process
//! variables.
//!
//! The task reads a command descriptor and a parameter-name list from the
//! instance's variables, collects the named variables, runs the ambient
//! tenant check, and invokes the registered factory. The outcome is written
//! back to `commandResult` so downstream gateways and error boundaries can
//! branch on it; failures leave the task as an [`EngineError`] signal, never
//! as an escaped internal error.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use provigate_core::{ExecutionContext, TenantId, UserId};

use crate::engine::{ProcessEngine, ProcessInstanceId, Variables};
use crate::error::{BridgeError, EngineError};
use crate::registry::CommandRegistry;

/// Process-variable contract of the bridge.
pub const VAR_COMMAND_CLASS_NAME: &str = "commandClassName";
pub const VAR_CONSTRUCTOR_PARAMETERS: &str = "constructorParameters";
pub const VAR_COMMAND_RESULT: &str = "commandResult";

/// `commandResult` value on success; failures carry the error code instead.
pub const RESULT_SUCCESS: &str = "SUCCESS";

/// Constructor parameter subject to the ambient tenant check.
const PARAM_TENANT_ID: &str = "tenant_id";

/// Optional variable naming the human actor on whose behalf the workflow
/// dispatches; absent for purely system-driven steps.
const VAR_INITIATOR: &str = "initiator";

/// The generic command-dispatch service task.
pub struct CommandDispatchBridge {
    registry: Arc<CommandRegistry>,
    /// Actor recorded on events caused by engine-driven steps with no
    /// `initiator` variable.
    service_user: UserId,
}

impl CommandDispatchBridge {
    pub fn new(registry: Arc<CommandRegistry>, service_user: UserId) -> Self {
        Self {
            registry,
            service_user,
        }
    }

    /// Execute the task against a running instance.
    ///
    /// On success `commandResult` is `"SUCCESS"`. On failure `commandResult`
    /// carries the error code and the same code is returned as an
    /// [`EngineError`] for the caller's error boundary.
    pub async fn execute<E>(
        &self,
        engine: &E,
        instance: ProcessInstanceId,
    ) -> Result<(), EngineError>
    where
        E: ProcessEngine + ?Sized,
    {
        match self.run(engine, instance).await {
            Ok(()) => {
                engine
                    .write_variable(instance, VAR_COMMAND_RESULT, JsonValue::from(RESULT_SUCCESS))
                    .await
                    .map_err(EngineError::from)?;
                debug!(%instance, "command dispatch succeeded");
                Ok(())
            }
            Err(err) => {
                let signal = EngineError::from(err);
                warn!(
                    %instance,
                    code = %signal.code,
                    detail = %signal.message,
                    "command dispatch failed; raising engine error signal"
                );
                // Best effort: the result variable is for branching, the
                // signal is the authoritative failure path.
                if let Err(fault) = engine
                    .write_variable(
                        instance,
                        VAR_COMMAND_RESULT,
                        JsonValue::from(signal.code.clone()),
                    )
                    .await
                {
                    warn!(%instance, error = %fault, "failed to write commandResult");
                }
                Err(signal)
            }
        }
    }

    async fn run<E>(&self, engine: &E, instance: ProcessInstanceId) -> Result<(), BridgeError>
    where
        E: ProcessEngine + ?Sized,
    {
        let vars = engine.read_variables(instance).await?;

        let command_key = string_var(&vars, VAR_COMMAND_CLASS_NAME)?;
        let entry = self
            .registry
            .entry(&command_key)
            .ok_or_else(|| BridgeError::UnknownCommand(command_key.clone()))?;

        let declared = parameter_list(&vars)?;

        // Fail fast on any missing variable before constructing anything.
        // The factory's own declared parameters are cross-checked so a
        // workflow that under-declares the list fails here, by name, too.
        for required in entry.parameters() {
            if !declared.iter().any(|p| p == required) {
                return Err(BridgeError::MissingVariable(required.clone()));
            }
        }
        let mut params = Variables::new();
        for name in &declared {
            let value = vars
                .get(name)
                .ok_or_else(|| BridgeError::MissingVariable(name.clone()))?;
            params.insert(name.clone(), value.clone());
        }

        // Ambient tenant check: the variable's claim is validated against the
        // engine's own record for the instance, not against other variables.
        let ambient = engine.instance_tenant(instance).await?;
        if let Some(value) = params.get(PARAM_TENANT_ID) {
            let claimed = tenant_from_value(PARAM_TENANT_ID, value)?;
            if claimed != ambient {
                return Err(BridgeError::TenantMismatch { ambient, claimed });
            }
        }

        let user = match vars.get(VAR_INITIATOR) {
            Some(v) => user_from_value(VAR_INITIATOR, v)?,
            None => self.service_user,
        };
        let ctx = ExecutionContext::new(ambient, user);

        entry
            .invoke(ctx, params)
            .await
            .map_err(BridgeError::Dispatch)
    }
}

fn string_var(vars: &Variables, name: &str) -> Result<String, BridgeError> {
    match vars.get(name) {
        None => Err(BridgeError::MissingVariable(name.to_string())),
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(other) => Err(BridgeError::InvalidVariable {
            name: name.to_string(),
            detail: format!("expected string, got {other}"),
        }),
    }
}

fn parameter_list(vars: &Variables) -> Result<Vec<String>, BridgeError> {
    let value = vars
        .get(VAR_CONSTRUCTOR_PARAMETERS)
        .ok_or_else(|| BridgeError::MissingVariable(VAR_CONSTRUCTOR_PARAMETERS.to_string()))?;

    let items = value.as_array().ok_or_else(|| BridgeError::InvalidVariable {
        name: VAR_CONSTRUCTOR_PARAMETERS.to_string(),
        detail: "expected a list of parameter names".to_string(),
    })?;

    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| BridgeError::InvalidVariable {
                    name: VAR_CONSTRUCTOR_PARAMETERS.to_string(),
                    detail: format!("parameter name is not a string: {item}"),
                })
        })
        .collect()
}

fn tenant_from_value(name: &str, value: &JsonValue) -> Result<TenantId, BridgeError> {
    let s = value.as_str().ok_or_else(|| BridgeError::InvalidVariable {
        name: name.to_string(),
        detail: format!("expected uuid string, got {value}"),
    })?;
    TenantId::from_str(s).map_err(|e| BridgeError::InvalidVariable {
        name: name.to_string(),
        detail: e.to_string(),
    })
}

fn user_from_value(name: &str, value: &JsonValue) -> Result<UserId, BridgeError> {
    let s = value.as_str().ok_or_else(|| BridgeError::InvalidVariable {
        name: name.to_string(),
        detail: format!("expected uuid string, got {value}"),
    })?;
    UserId::from_str(s).map_err(|e| BridgeError::InvalidVariable {
        name: name.to_string(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::engine::Variables;
    use crate::error::DispatchFailure;
    use crate::memory_engine::InMemoryProcessEngine;

    type Invocations = Arc<Mutex<Vec<(ExecutionContext, Variables)>>>;

    fn registry_with_recorder(key: &str, parameters: &[&str]) -> (Arc<CommandRegistry>, Invocations) {
        let calls: Invocations = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let mut registry = CommandRegistry::new();
        registry.register(key, parameters, move |ctx, params| {
            let recorded = recorded.clone();
            Box::pin(async move {
                recorded.lock().unwrap().push((ctx, params));
                Ok(())
            })
        });
        (Arc::new(registry), calls)
    }

    async fn started_instance(
        engine: &InMemoryProcessEngine,
        tenant: TenantId,
        vars: Variables,
    ) -> ProcessInstanceId {
        engine
            .start_instance("request_fulfilment", "req-1", tenant, vars)
            .await
            .unwrap()
    }

    fn task_vars(command: &str, params: &[(&str, JsonValue)]) -> Variables {
        let mut vars = Variables::new();
        vars.insert(VAR_COMMAND_CLASS_NAME.to_string(), json!(command));
        vars.insert(
            VAR_CONSTRUCTOR_PARAMETERS.to_string(),
            json!(params.iter().map(|(n, _)| *n).collect::<Vec<_>>()),
        );
        for (name, value) in params {
            vars.insert(name.to_string(), value.clone());
        }
        vars
    }

    #[tokio::test]
    async fn dispatches_and_writes_success_result() {
        let tenant = TenantId::new();
        let (registry, calls) =
            registry_with_recorder("requests.CancelRequest", &["tenant_id", "request_id"]);
        let bridge = CommandDispatchBridge::new(registry, UserId::new());
        let engine = InMemoryProcessEngine::new();

        let instance = started_instance(
            &engine,
            tenant,
            task_vars(
                "requests.CancelRequest",
                &[
                    ("tenant_id", json!(tenant.to_string())),
                    ("request_id", json!("req-1")),
                ],
            ),
        )
        .await;

        bridge.execute(&engine, instance).await.unwrap();

        let vars = engine.read_variables(instance).await.unwrap();
        assert_eq!(vars.get(VAR_COMMAND_RESULT), Some(&json!(RESULT_SUCCESS)));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.tenant_id(), tenant);
        assert_eq!(calls[0].1.get("request_id"), Some(&json!("req-1")));
    }

    #[tokio::test]
    async fn missing_variable_fails_before_construction() {
        let tenant = TenantId::new();
        let (registry, calls) =
            registry_with_recorder("requests.CancelRequest", &["tenant_id", "request_id"]);
        let bridge = CommandDispatchBridge::new(registry, UserId::new());
        let engine = InMemoryProcessEngine::new();

        // "request_id" is declared but never set as a variable.
        let mut vars = task_vars(
            "requests.CancelRequest",
            &[("tenant_id", json!(tenant.to_string()))],
        );
        vars.insert(
            VAR_CONSTRUCTOR_PARAMETERS.to_string(),
            json!(["tenant_id", "request_id"]),
        );
        let instance = started_instance(&engine, tenant, vars).await;

        let err = bridge.execute(&engine, instance).await.unwrap_err();
        assert_eq!(err.code, "MISSING_VARIABLE");
        assert!(err.message.contains("request_id"));
        assert!(calls.lock().unwrap().is_empty());

        let vars = engine.read_variables(instance).await.unwrap();
        assert_eq!(vars.get(VAR_COMMAND_RESULT), Some(&json!("MISSING_VARIABLE")));
    }

    #[tokio::test]
    async fn underdeclared_parameter_list_fails_by_name() {
        let tenant = TenantId::new();
        let (registry, calls) =
            registry_with_recorder("requests.CancelRequest", &["tenant_id", "request_id"]);
        let bridge = CommandDispatchBridge::new(registry, UserId::new());
        let engine = InMemoryProcessEngine::new();

        let instance = started_instance(
            &engine,
            tenant,
            task_vars(
                "requests.CancelRequest",
                &[("tenant_id", json!(tenant.to_string()))],
            ),
        )
        .await;

        let err = bridge.execute(&engine, instance).await.unwrap_err();
        assert_eq!(err.code, "MISSING_VARIABLE");
        assert!(err.message.contains("request_id"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tenant_mismatch_fails_closed() {
        let ambient = TenantId::new();
        let other = TenantId::new();
        let (registry, calls) = registry_with_recorder("requests.CancelRequest", &["tenant_id"]);
        let bridge = CommandDispatchBridge::new(registry, UserId::new());
        let engine = InMemoryProcessEngine::new();

        let instance = started_instance(
            &engine,
            ambient,
            task_vars(
                "requests.CancelRequest",
                &[("tenant_id", json!(other.to_string()))],
            ),
        )
        .await;

        let err = bridge.execute(&engine, instance).await.unwrap_err();
        assert_eq!(err.code, "TENANT_MISMATCH");
        assert!(calls.lock().unwrap().is_empty());

        let vars = engine.read_variables(instance).await.unwrap();
        assert_eq!(vars.get(VAR_COMMAND_RESULT), Some(&json!("TENANT_MISMATCH")));
    }

    #[tokio::test]
    async fn unknown_command_is_a_distinct_code() {
        let tenant = TenantId::new();
        let (registry, _calls) = registry_with_recorder("requests.CancelRequest", &[]);
        let bridge = CommandDispatchBridge::new(registry, UserId::new());
        let engine = InMemoryProcessEngine::new();

        let instance =
            started_instance(&engine, tenant, task_vars("requests.DoesNotExist", &[])).await;

        let err = bridge.execute(&engine, instance).await.unwrap_err();
        assert_eq!(err.code, "UNKNOWN_COMMAND");
    }

    #[tokio::test]
    async fn dispatch_failure_code_reaches_the_result_variable() {
        let tenant = TenantId::new();
        let mut registry = CommandRegistry::new();
        registry.register("requests.StartProvisioning", &[], |_ctx, _params| {
            Box::pin(async {
                Err(DispatchFailure::new(
                    "INVALID_STATE",
                    "cannot start provisioning in status Pending",
                ))
            })
        });
        let bridge = CommandDispatchBridge::new(Arc::new(registry), UserId::new());
        let engine = InMemoryProcessEngine::new();

        let instance =
            started_instance(&engine, tenant, task_vars("requests.StartProvisioning", &[])).await;

        let err = bridge.execute(&engine, instance).await.unwrap_err();
        assert_eq!(err.code, "INVALID_STATE");

        let vars = engine.read_variables(instance).await.unwrap();
        assert_eq!(vars.get(VAR_COMMAND_RESULT), Some(&json!("INVALID_STATE")));
    }
}
