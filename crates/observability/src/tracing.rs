//! Tracing/logging initialization.
//!
//! JSON lines on stdout, one object per event, with the span fields
//! (`sku`, `job`, `order_id`, ...) flattened in. Filtering follows `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `default_filter` applies when `RUST_LOG` is
/// unset or unparsable.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}
