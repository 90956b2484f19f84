//! Push-based observability: no HTTP server, no incoming connections.
//! Metrics are rendered as structured JSON to stdout on an interval.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
