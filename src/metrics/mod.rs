//! Relay-wide counters.

pub mod collector;

pub use collector::{MetricsSnapshot, RelayMetrics, RequestTimer};
