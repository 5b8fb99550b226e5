//! logxy: a single-target HTTP reverse proxy that emits one structured
//! access record per request, with per-phase transport timings and body
//! throughput in both directions.

pub mod cli;
pub mod config;
pub mod http;
pub mod instrument;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
pub use observability::{ObservabilityRecord, RecordSink, TracingSink};
