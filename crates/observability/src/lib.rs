//! Process-wide tracing setup shared by the stock ledger binaries.

/// Initialize process-wide observability (tracing/logging) with the default
/// `info` filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing configuration (filters, layers).
pub mod tracing;
