//! Synchronous-with-publication event consumers.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::EventNotice;

/// A consumer invoked inline by the publishing pipeline, once per stored
/// event, after the event is durable.
///
/// Implementations must never fail the publisher: anything that goes wrong is
/// the subscriber's problem to log and absorb. Cancellation raised by the
/// runtime during an await must still propagate normally (do not wrap awaits
/// in catch-all recovery).
#[async_trait]
pub trait NoticeSubscriber: Send + Sync {
    async fn on_notice(&self, notice: &EventNotice<JsonValue>);
}
