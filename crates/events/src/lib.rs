//! `provigate-events` — eventing contracts shared by domain and infrastructure.
//!
//! Domain events, tenant-scoped envelopes, the pub/sub bus abstraction, and
//! the correlation metadata consumed by the workflow signal bridge.

pub mod bus;
pub mod command;
pub mod correlation;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod subscriber;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use correlation::{Correlated, CorrelationHint, EventNotice, MessageAddress};
pub use envelope::{EventEnvelope, EventMetadata};
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
pub use subscriber::NoticeSubscriber;
