//! Destinations for access records.

use crate::instrument::phase::fractional_millis;
use crate::instrument::Phase;
use crate::observability::metrics;
use crate::observability::record::ObservabilityRecord;

/// Consumer of finished access records.
///
/// Called exactly once per accepted request, from whichever task finishes
/// the request (the handler on upstream failure, the caller's connection
/// task once the response body is done).
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: ObservabilityRecord);
}

/// Emits each record as one structured `tracing` event on `logxy::access`,
/// and feeds the request metrics.
///
/// Phases become numeric `latency.<phase>` fields in milliseconds; phases
/// that never fired are left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn emit(&self, record: ObservabilityRecord) {
        metrics::record_request(&record);

        let ms = |phase| record.phase(phase).map(fractional_millis);
        let resp = record.resp.as_ref();
        tracing::info!(
            target: "logxy::access",
            id = %record.id,
            req.arrived_at = record.req.arrived_at_millis(),
            req.method = %record.req.method,
            req.url = %record.req.url,
            req.body_bytes = record.req.body_bytes,
            req.body_read_bps = record.req.body_read_bps,
            req.body_read_ms = fractional_millis(record.req.body_read_ms),
            latency.dns_start = ms(Phase::DnsStart),
            latency.dns_done = ms(Phase::DnsDone),
            latency.tls_start = ms(Phase::TlsHandshakeStart),
            latency.tls_done = ms(Phase::TlsHandshakeDone),
            latency.get_conn = ms(Phase::GetConn),
            latency.conn_start = ms(Phase::ConnectStart),
            latency.conn_done = ms(Phase::ConnectDone),
            latency.got_conn = ms(Phase::GotConn),
            latency.wrote_req_headers = ms(Phase::WroteRequestHeaders),
            latency.wrote_req_body = ms(Phase::WroteRequestBody),
            latency.TTFB_resp = ms(Phase::FirstResponseByte),
            latency.wrote_resp = ms(Phase::WroteResponse),
            resp.status = resp.map(|r| r.status.as_str()),
            resp.body_bytes = resp.map(|r| r.body_bytes),
            resp.body_read_bps = resp.map(|r| r.body_read_bps),
            resp.body_read_ms = resp.map(|r| fractional_millis(r.body_read_ms)),
            error = record.error.as_deref(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, SystemTime};

    use axum::http::{Method, StatusCode};
    use serde_json::Value;

    use crate::instrument::{PhaseEntry, StreamMeter};
    use crate::observability::{RequestMetrics, ResponseMetrics};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn emit_as_json(record: ObservabilityRecord) -> Value {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || TracingSink.emit(record));

        let bytes = captured.0.lock().unwrap().clone();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn entry(phase: Phase, micros: u64) -> PhaseEntry {
        PhaseEntry {
            phase,
            elapsed: Duration::from_micros(micros),
        }
    }

    #[test]
    fn access_event_carries_numeric_phase_fields() {
        let record = ObservabilityRecord {
            id: "0a1b2c3d4e5f".to_string(),
            req: RequestMetrics::new(
                SystemTime::now(),
                &Method::GET,
                "http://up.example/".to_string(),
                &StreamMeter::new(),
            ),
            latency: vec![
                entry(Phase::GetConn, 250),
                entry(Phase::GotConn, 1_500),
                entry(Phase::FirstResponseByte, 4_000),
            ],
            resp: Some(ResponseMetrics::new(StatusCode::OK, &StreamMeter::new())),
            error: None,
        };

        let event = emit_as_json(record);
        assert_eq!(event["target"], "logxy::access");
        assert_eq!(event["id"], "0a1b2c3d4e5f");
        assert_eq!(event["req.method"], "GET");
        assert_eq!(event["latency.get_conn"].as_f64(), Some(0.25));
        assert_eq!(event["latency.got_conn"].as_f64(), Some(1.5));
        assert_eq!(event["latency.TTFB_resp"].as_f64(), Some(4.0));
        assert!(event.get("latency.dns_start").is_none());
        assert!(event.get("latency").is_none());
        assert_eq!(event["resp.status"], "200 OK");
        assert!(event.get("error").is_none());
    }

    #[test]
    fn failed_request_event_has_error_and_no_response() {
        let record = ObservabilityRecord {
            id: "ffffffffffff".to_string(),
            req: RequestMetrics::new(
                SystemTime::now(),
                &Method::PUT,
                "http://127.0.0.1:1/items".to_string(),
                &StreamMeter::new(),
            ),
            latency: vec![entry(Phase::GetConn, 10), entry(Phase::ConnectDone, 90)],
            resp: None,
            error: Some("dial tcp 127.0.0.1:1: connection refused".to_string()),
        };

        let event = emit_as_json(record);
        assert_eq!(event["error"], "dial tcp 127.0.0.1:1: connection refused");
        assert_eq!(event["latency.conn_done"].as_f64(), Some(0.09));
        assert!(event.get("resp.status").is_none());
    }
}
