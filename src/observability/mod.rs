//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! http::proxy finishes a request
//!     → record.rs (ObservabilityRecord: request, phases, response, error)
//!     → sink.rs (RecordSink; TracingSink by default)
//!         → logging.rs (structured log event, pretty or JSON)
//!         → metrics.rs (counters, histograms)
//! ```
//!
//! # Design Decisions
//! - One record per accepted request, emitted exactly once
//! - The sink is a trait object so embedders and tests can capture records
//! - Metrics are cheap (no-ops unless an exporter is installed)

pub mod logging;
pub mod metrics;
pub mod record;
pub mod sink;

pub use record::{ObservabilityRecord, RequestMetrics, ResponseMetrics};
pub use sink::{RecordSink, TracingSink};
