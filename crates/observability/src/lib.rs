//! Observability infrastructure for Wagerline
//!
//! - Structured logging via `tracing`
//! - Prometheus exporter and the gauges the queue monitor publishes
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("wagerline", LogFormat::Json, "info")?;
//! observability::metrics::init_metrics(9100)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, MonitorGauges};
