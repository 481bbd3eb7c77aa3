//! ATRIUM Telemetry - Observability Infrastructure
//!
//! Structured logging through `tracing` and Prometheus counters for the
//! service layer. Both work without any external collector.

pub mod metrics;
pub mod tracer;

pub use metrics::AtriumMetrics;
pub use tracer::{init_tracing, TelemetryConfig};
