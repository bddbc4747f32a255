//! Process-wide logging setup for binaries and test harnesses embedding the engine.

pub mod tracing;

pub use self::tracing::init_with_filter;

/// Install the JSON subscriber. Later calls are no-ops.
pub fn init() {
    self::tracing::init();
}
