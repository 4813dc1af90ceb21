//! Infrastructure layer: event store, command routing, engine wiring.

pub mod command_router;
pub mod config;
pub mod event_store;
pub mod read_model;
pub mod workflow_wiring;


pub use command_router::{CommandRouter, RouteError};
pub use config::{ConfigError, PostgresConfig};
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent,
    UncommittedEvent,
};
pub use read_model::{InMemoryStatusBoard, NotifyError, ReadModelNotifier, StateSummary};
pub use workflow_wiring::{
    register_request_commands, CMD_APPROVE_REQUEST, CMD_CANCEL_REQUEST,
    CMD_RECORD_PROVISIONING_OUTCOME, CMD_REJECT_REQUEST, CMD_START_PROVISIONING,
    CMD_SUBMIT_REQUEST,
};
