//! `provigate-workflow` — the bidirectional bridge between the event-sourced
//! core and an external workflow engine.
//!
//! Outbound: a workflow service task invokes domain commands through a typed
//! command registry ([`CommandDispatchBridge`]), without compile-time coupling
//! between workflow definitions and command types.
//!
//! Inbound: domain events carrying a correlation hint resume process
//! instances waiting on a message ([`EventSignalBridge`]), with a hard
//! cross-tenant drop.
//!
//! On a caught boundary error, [`CompensationBoundary`] reroutes the same
//! task variables at a semantically inverse command through the same bridge.

pub mod compensation;
pub mod dispatch_bridge;
pub mod engine;
pub mod error;
pub mod memory_engine;
pub mod registry;
pub mod signal_bridge;

pub use compensation::{CompensationBoundary, CompensationPlan};
pub use dispatch_bridge::{
    CommandDispatchBridge, RESULT_SUCCESS, VAR_COMMAND_CLASS_NAME, VAR_CONSTRUCTOR_PARAMETERS,
    VAR_COMMAND_RESULT,
};
pub use engine::{EngineFault, ProcessEngine, ProcessInstanceId, VAR_INSTANCE_TENANT, Variables};
pub use error::{BridgeError, DispatchFailure, EngineError};
pub use memory_engine::InMemoryProcessEngine;
pub use registry::{CommandEntry, CommandRegistry, InvokeFuture};
pub use signal_bridge::EventSignalBridge;
