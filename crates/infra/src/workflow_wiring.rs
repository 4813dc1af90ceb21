//! Startup wiring of request commands into the workflow command registry.
//!
//! Each entry maps a stable descriptor key (the value a workflow definition
//! puts in `commandClassName`) to a typed command built from the collected
//! process variables and routed through the command pipeline. Parameter names
//! are the commands' serde field names; optional fields are declared too and
//! passed as JSON null when absent.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use provigate_core::ExecutionContext;
use provigate_events::{EventBus, EventNotice};
use provigate_requests::{
    ApproveRequest, CancelRequest, ProvisioningRequest, RecordProvisioningOutcome, RejectRequest,
    RequestCommand, RequestId, StartProvisioning, SubmitRequest, REQUEST_AGGREGATE_TYPE,
};
use provigate_workflow::{CommandRegistry, DispatchFailure, Variables};

use crate::command_router::CommandRouter;
use crate::event_store::EventStore;

pub const CMD_SUBMIT_REQUEST: &str = "requests.SubmitRequest";
pub const CMD_APPROVE_REQUEST: &str = "requests.ApproveRequest";
pub const CMD_REJECT_REQUEST: &str = "requests.RejectRequest";
pub const CMD_CANCEL_REQUEST: &str = "requests.CancelRequest";
pub const CMD_START_PROVISIONING: &str = "requests.StartProvisioning";
pub const CMD_RECORD_PROVISIONING_OUTCOME: &str = "requests.RecordProvisioningOutcome";

/// Deserialize a command from collected process variables, stamping business
/// time at dispatch.
fn command_from<C>(mut params: Variables) -> Result<C, DispatchFailure>
where
    C: DeserializeOwned,
{
    let occurred_at = serde_json::to_value(Utc::now())
        .map_err(|e| DispatchFailure::invalid_input(e.to_string()))?;
    params.insert("occurred_at".to_string(), occurred_at);

    serde_json::from_value(JsonValue::Object(params))
        .map_err(|e| DispatchFailure::invalid_input(e.to_string()))
}

async fn dispatch<S, B>(
    router: &CommandRouter<S, B>,
    ctx: &ExecutionContext,
    command: RequestCommand,
) -> Result<(), DispatchFailure>
where
    S: EventStore,
    B: EventBus<EventNotice<JsonValue>>,
{
    router
        .route(
            ctx,
            REQUEST_AGGREGATE_TYPE,
            |id| ProvisioningRequest::empty(RequestId::new(id)),
            &command,
        )
        .await
        .map(|_| ())
        .map_err(DispatchFailure::from)
}

/// Register every request command under its descriptor key.
pub fn register_request_commands<S, B>(
    registry: &mut CommandRegistry,
    router: Arc<CommandRouter<S, B>>,
) where
    S: EventStore + 'static,
    B: EventBus<EventNotice<JsonValue>> + 'static,
{
    let r = router.clone();
    registry.register(
        CMD_SUBMIT_REQUEST,
        &[
            "tenant_id",
            "request_id",
            "requested_by",
            "resource",
            "justification",
        ],
        move |ctx, params| {
            let router = r.clone();
            Box::pin(async move {
                let cmd: SubmitRequest = command_from(params)?;
                dispatch(&router, &ctx, RequestCommand::Submit(cmd)).await
            })
        },
    );

    let r = router.clone();
    registry.register(
        CMD_APPROVE_REQUEST,
        &["tenant_id", "request_id", "decided_by", "comment"],
        move |ctx, params| {
            let router = r.clone();
            Box::pin(async move {
                let cmd: ApproveRequest = command_from(params)?;
                dispatch(&router, &ctx, RequestCommand::Approve(cmd)).await
            })
        },
    );

    let r = router.clone();
    registry.register(
        CMD_REJECT_REQUEST,
        &["tenant_id", "request_id", "decided_by", "reason"],
        move |ctx, params| {
            let router = r.clone();
            Box::pin(async move {
                let cmd: RejectRequest = command_from(params)?;
                dispatch(&router, &ctx, RequestCommand::Reject(cmd)).await
            })
        },
    );

    let r = router.clone();
    registry.register(
        CMD_CANCEL_REQUEST,
        &["tenant_id", "request_id", "cancelled_by", "reason"],
        move |ctx, params| {
            let router = r.clone();
            Box::pin(async move {
                let cmd: CancelRequest = command_from(params)?;
                dispatch(&router, &ctx, RequestCommand::Cancel(cmd)).await
            })
        },
    );

    let r = router.clone();
    registry.register(
        CMD_START_PROVISIONING,
        &["tenant_id", "request_id"],
        move |ctx, params| {
            let router = r.clone();
            Box::pin(async move {
                let cmd: StartProvisioning = command_from(params)?;
                dispatch(&router, &ctx, RequestCommand::StartProvisioning(cmd)).await
            })
        },
    );

    let r = router;
    registry.register(
        CMD_RECORD_PROVISIONING_OUTCOME,
        &["tenant_id", "request_id", "succeeded", "error"],
        move |ctx, params| {
            let router = r.clone();
            Box::pin(async move {
                let cmd: RecordProvisioningOutcome = command_from(params)?;
                dispatch(&router, &ctx, RequestCommand::RecordOutcome(cmd)).await
            })
        },
    );
}
