//! Bridge error taxonomy and its translation into engine-native signals.

use thiserror::Error;

use provigate_core::TenantId;

use crate::engine::EngineFault;

/// Outcome of a command dispatch, flattened into a stable error code so the
/// bridge can write it into `commandResult` and the boundary can branch on it.
///
/// Produced by the registered invoke closures (which know the routing layer's
/// error type); the bridge itself never inspects routing errors directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct DispatchFailure {
    pub code: String,
    pub message: String,
}

impl DispatchFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("INVALID_INPUT", message)
    }
}

/// Everything that can go wrong inside a dispatch-bridge task.
///
/// One variant per distinct failure cause: compensation boundaries attach to
/// error codes, so two different causes must never collapse into one code.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The command descriptor does not resolve to a registered factory.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// A declared constructor parameter has no process variable. Fails fast,
    /// before any command object is constructed; never defaults silently.
    #[error("missing process variable '{0}'")]
    MissingVariable(String),

    /// A variable was present but not usable (e.g. malformed uuid).
    #[error("invalid process variable '{name}': {detail}")]
    InvalidVariable { name: String, detail: String },

    /// The `tenant_id` parameter disagrees with the engine's ambient tenant
    /// for the running instance. Security control; fails closed.
    #[error("tenant mismatch: instance belongs to {ambient}, variables claim {claimed}")]
    TenantMismatch {
        ambient: TenantId,
        claimed: TenantId,
    },

    /// The constructed command was rejected by the routing layer.
    #[error(transparent)]
    Dispatch(DispatchFailure),

    /// The engine itself failed (variables unreadable, instance gone).
    #[error(transparent)]
    Engine(#[from] EngineFault),
}

impl BridgeError {
    pub fn code(&self) -> &str {
        match self {
            BridgeError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            BridgeError::MissingVariable(_) => "MISSING_VARIABLE",
            BridgeError::InvalidVariable { .. } => "INVALID_VARIABLE",
            BridgeError::TenantMismatch { .. } => "TENANT_MISMATCH",
            BridgeError::Dispatch(f) => &f.code,
            BridgeError::Engine(_) => "ENGINE_FAULT",
        }
    }
}

/// Engine-native error signal (the BPMN boundary-catchable shape).
///
/// The bridge converts every internal failure into this instead of letting an
/// exception escape the task, so declared error-boundary handling remains the
/// single place compensation logic lives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: String,
    pub message: String,
}

impl EngineError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<BridgeError> for EngineError {
    fn from(value: BridgeError) -> Self {
        Self {
            code: value.code().to_string(),
            message: value.to_string(),
        }
    }
}

impl From<EngineFault> for EngineError {
    fn from(value: EngineFault) -> Self {
        Self {
            code: "ENGINE_FAULT".to_string(),
            message: value.to_string(),
        }
    }
}
