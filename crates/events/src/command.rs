use provigate_core::AggregateId;

/// A command targets a specific aggregate.
///
/// Commands represent **intent** — a request to perform an action. They are
/// transient (not persisted) and are transformed into events (which are).
/// A command is rejected if invalid; events represent accepted changes.
///
/// `target_aggregate_id()` lets infrastructure route a command to the correct
/// aggregate instance, which is also the transaction boundary: one command
/// operates on exactly one stream.
///
/// Tenancy is enforced at the event level (envelopes) and through the
/// execution context; commands stay domain-focused.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
