//! The per-request access record.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{Method, StatusCode};
use serde::{Serialize, Serializer};

use crate::instrument::phase::fractional_millis;
use crate::instrument::{Phase, PhaseEntry, StreamMeter};

/// Everything observed about one proxied request.
///
/// Built once, when the response finishes streaming or the request fails,
/// then handed to a [`RecordSink`](crate::observability::RecordSink).
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityRecord {
    pub id: String,
    pub req: RequestMetrics,
    /// Phase durations since arrival, in completion order.
    pub latency: Vec<PhaseEntry>,
    /// Absent when no upstream response was obtained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp: Option<ResponseMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ObservabilityRecord {
    /// Elapsed time at which `phase` completed, if it was recorded.
    pub fn phase(&self, phase: Phase) -> Option<Duration> {
        self.latency
            .iter()
            .find(|e| e.phase == phase)
            .map(|e| e.elapsed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    #[serde(serialize_with = "unix_millis")]
    pub arrived_at: SystemTime,
    pub method: String,
    /// The rewritten URL the request was forwarded to.
    pub url: String,
    pub body_bytes: u64,
    pub body_read_bps: u64,
    #[serde(serialize_with = "millis")]
    pub body_read_ms: Duration,
}

impl RequestMetrics {
    pub fn new(arrived_at: SystemTime, method: &Method, url: String, body: &StreamMeter) -> Self {
        Self {
            arrived_at,
            method: method.to_string(),
            url,
            body_bytes: body.bytes_read(),
            body_read_bps: body.bytes_per_second(),
            body_read_ms: body.duration(),
        }
    }

    /// Arrival time as Unix milliseconds.
    pub fn arrived_at_millis(&self) -> u64 {
        epoch_millis(self.arrived_at)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetrics {
    /// Status line text, e.g. `200 OK`.
    pub status: String,
    pub status_code: u16,
    pub body_bytes: u64,
    pub body_read_bps: u64,
    #[serde(serialize_with = "millis")]
    pub body_read_ms: Duration,
}

impl ResponseMetrics {
    pub fn new(status: StatusCode, body: &StreamMeter) -> Self {
        Self {
            status: status_text(status),
            status_code: status.as_u16(),
            body_bytes: body.bytes_read(),
            body_read_bps: body.bytes_per_second(),
            body_read_ms: body.duration(),
        }
    }
}

/// `"404 Not Found"`, or just the code when it has no canonical reason.
pub fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_str(), reason),
        None => status.as_str().to_string(),
    }
}

/// Pre-epoch clocks read as 0.
fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn unix_millis<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(epoch_millis(*time))
}

fn millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(fractional_millis(*duration))
}
