//! Tenant-partitioned, append-only event store.

pub mod in_memory;
pub mod postgres;
pub mod store;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
