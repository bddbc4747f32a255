use chrono::{DateTime, Utc};

/// A fact recorded by an aggregate.
///
/// Events are immutable and append-only; `event_type` plus `version` identify
/// the payload schema when a stream is replayed.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable name, e.g. `"orders.purchase_order.status_changed"`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
