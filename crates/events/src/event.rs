use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "provisioning.request.submitted").
    ///
    /// Used for polymorphic deserialization of persisted payloads, so it must
    /// never change once events of this type exist in a store.
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time, distinct from storage time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
