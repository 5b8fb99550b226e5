//! Named lifecycle phases and the per-request timer that records them.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::ser::{Serialize, SerializeMap, Serializer};

/// A point in the outbound request lifecycle.
///
/// The string names are emitted in every access record, so they are part of
/// the external log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    DnsStart,
    DnsDone,
    TlsHandshakeStart,
    TlsHandshakeDone,
    GetConn,
    ConnectStart,
    ConnectDone,
    GotConn,
    WroteRequestHeaders,
    WroteRequestBody,
    FirstResponseByte,
    WroteResponse,
}

impl Phase {
    /// Every phase, in the order they occur on a fresh TLS connection.
    pub const ALL: [Phase; 12] = [
        Phase::GetConn,
        Phase::DnsStart,
        Phase::DnsDone,
        Phase::ConnectStart,
        Phase::ConnectDone,
        Phase::TlsHandshakeStart,
        Phase::TlsHandshakeDone,
        Phase::GotConn,
        Phase::WroteRequestHeaders,
        Phase::WroteRequestBody,
        Phase::FirstResponseByte,
        Phase::WroteResponse,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::DnsStart => "dns_start",
            Phase::DnsDone => "dns_done",
            Phase::TlsHandshakeStart => "tls_start",
            Phase::TlsHandshakeDone => "tls_done",
            Phase::GetConn => "get_conn",
            Phase::ConnectStart => "conn_start",
            Phase::ConnectDone => "conn_done",
            Phase::GotConn => "got_conn",
            Phase::WroteRequestHeaders => "wrote_req_headers",
            Phase::WroteRequestBody => "wrote_req_body",
            Phase::FirstResponseByte => "TTFB_resp",
            Phase::WroteResponse => "wrote_resp",
        }
    }

    /// Phases that only happen while dialling a new upstream connection.
    pub const fn is_dial(self) -> bool {
        matches!(
            self,
            Phase::DnsStart
                | Phase::DnsDone
                | Phase::ConnectStart
                | Phase::ConnectDone
                | Phase::TlsHandshakeStart
                | Phase::TlsHandshakeDone
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One recorded phase: how long after arrival it completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseEntry {
    pub phase: Phase,
    pub elapsed: Duration,
}

/// Milliseconds with sub-millisecond precision, as written in access records.
pub fn fractional_millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Serialized as a single-key object, `{"dns_start": 1.25}`, in milliseconds.
impl Serialize for PhaseEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.phase.as_str(), &fractional_millis(self.elapsed))?;
        map.end()
    }
}

/// Ordered phase durations for a single request, relative to its arrival.
///
/// Cloning yields another handle onto the same entries, which is how trace
/// hooks running on the client's connection task share it with the handler.
#[derive(Debug, Clone)]
pub struct PhaseTimer {
    arrived: Instant,
    entries: Arc<Mutex<Vec<PhaseEntry>>>,
}

impl PhaseTimer {
    /// Create an empty timer anchored at the request's arrival instant.
    pub fn new(arrived: Instant) -> Self {
        Self {
            arrived,
            entries: Arc::new(Mutex::new(Vec::with_capacity(Phase::ALL.len()))),
        }
    }

    /// Record `phase` as completed now.
    ///
    /// Returns `false` if the phase was already recorded; a phase appears at
    /// most once per request.
    pub fn record(&self, phase: Phase) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| e.phase == phase) {
            return false;
        }
        // Measured under the lock so entry order matches elapsed order.
        entries.push(PhaseEntry {
            phase,
            elapsed: self.arrived.elapsed(),
        });
        true
    }

    /// Snapshot of the entries recorded so far, in completion order.
    pub fn entries(&self) -> Vec<PhaseEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.phase == phase)
    }

    pub fn arrived(&self) -> Instant {
        self.arrived
    }
}
