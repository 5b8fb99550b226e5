//! Byte-counting, time-accumulating body wrapper.
//!
//! [`InstrumentedStream`] sits between a body and whoever drains it (the
//! upstream connection for request bodies, the caller's connection for
//! response bodies). It never buffers or alters frames; it only observes them.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use hyper::body::{Body, Buf, Frame, SizeHint};

use crate::instrument::phase::Phase;
use crate::instrument::trace::ClientTrace;

/// Bytes per second for `bytes` read over `duration`.
///
/// Sub-second transfers report the raw byte count instead of extrapolating a
/// rate from a tiny sample. Zero duration reports zero.
pub fn throughput(bytes: u64, duration: Duration) -> u64 {
    if duration.is_zero() {
        return 0;
    }
    if duration < Duration::from_secs(1) {
        return bytes;
    }
    let rate = u128::from(bytes) * 1_000_000_000 / duration.as_nanos();
    u64::try_from(rate).unwrap_or(u64::MAX)
}

#[derive(Debug, Default)]
struct Counters {
    bytes: AtomicU64,
    nanos: AtomicU64,
}

/// Read-only view of an [`InstrumentedStream`]'s counters.
///
/// Clones observe the same counters, so a meter kept by the handler reports
/// the progress of a body that has been handed off to the transport.
#[derive(Debug, Clone, Default)]
pub struct StreamMeter {
    counters: Arc<Counters>,
}

impl StreamMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_read(&self) -> u64 {
        self.counters.bytes.load(Ordering::Acquire)
    }

    /// Total time spent in reads that produced data.
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.counters.nanos.load(Ordering::Acquire))
    }

    pub fn bytes_per_second(&self) -> u64 {
        throughput(self.bytes_read(), self.duration())
    }

    fn add(&self, bytes: u64, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.counters.nanos.fetch_add(nanos, Ordering::AcqRel);
        self.counters.bytes.fetch_add(bytes, Ordering::AcqRel);
    }
}

/// How a wrapped body stopped being read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The body reached its end.
    Completed,
    /// The inner body returned an error.
    Failed(String),
    /// The reader dropped the body before its end.
    Aborted,
}

impl StreamOutcome {
    /// Error text for the access record, if the stream did not complete.
    pub fn into_error(self) -> Option<String> {
        match self {
            StreamOutcome::Completed => None,
            StreamOutcome::Failed(e) => Some(e),
            StreamOutcome::Aborted => {
                Some("connection closed before the response body was fully written".to_string())
            }
        }
    }
}

type FinishHook = Box<dyn FnOnce(StreamOutcome) + Send>;

/// Body wrapper that counts bytes and read time.
///
/// A read is timed from the first poll that starts waiting for a frame until
/// the poll that yields it. Only reads yielding a non-empty data frame update
/// the counters; trailers, empty frames, errors and end of stream do not.
///
/// Dropping the wrapper drops the inner body.
pub struct InstrumentedStream<B> {
    inner: B,
    meter: StreamMeter,
    read_started: Option<Instant>,
    trace: Option<ClientTrace>,
    on_finish: Option<FinishHook>,
    is_end: fn(&B) -> bool,
}

impl<B: Body> InstrumentedStream<B> {
    pub fn new(inner: B, meter: StreamMeter) -> Self {
        Self {
            inner,
            meter,
            read_started: None,
            trace: None,
            on_finish: None,
            is_end: <B as Body>::is_end_stream,
        }
    }
}

impl<B> InstrumentedStream<B> {
    /// Fire request-write phases on `trace` as the transport drains the body.
    ///
    /// `wrote_req_headers` fires when the transport first consults the body,
    /// which happens once the request head is encoded; `wrote_req_body`
    /// fires when the body reports its end.
    pub fn with_trace(mut self, trace: ClientTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Run `hook` exactly once, when the body ends, fails or is dropped.
    pub fn on_finish<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(StreamOutcome) + Send + 'static,
    {
        self.on_finish = Some(Box::new(hook));
        self
    }

    pub fn meter(&self) -> &StreamMeter {
        &self.meter
    }

    fn fire(&self, phase: Phase) {
        if let Some(trace) = &self.trace {
            // The transport only consults the body once it owns a
            // connection, so that is the latest point `got_conn` can be.
            if phase == Phase::WroteRequestHeaders {
                trace.fire(Phase::GotConn);
            }
            trace.fire(phase);
        }
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        if let Some(hook) = self.on_finish.take() {
            hook(outcome);
        }
    }
}

impl<B> Body for InstrumentedStream<B>
where
    B: Body + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        this.fire(Phase::WroteRequestHeaders);
        let started = *this.read_started.get_or_insert_with(Instant::now);

        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if polled.is_ready() {
            this.read_started = None;
        }

        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(frame))) => {
                let len = frame.data_ref().map_or(0, |data| data.remaining());
                if len > 0 {
                    this.meter.add(len as u64, started.elapsed());
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish(StreamOutcome::Failed(err.to_string()));
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.fire(Phase::WroteRequestBody);
                this.finish(StreamOutcome::Completed);
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.fire(Phase::WroteRequestHeaders);
        let end = self.inner.is_end_stream();
        if end {
            self.fire(Phase::WroteRequestBody);
        }
        end
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for InstrumentedStream<B> {
    fn drop(&mut self) {
        if self.on_finish.is_none() {
            return;
        }
        // Transports stop polling once a body reports its end, so only
        // treat the drop as an abort if the end was never reached.
        let outcome = if (self.is_end)(&self.inner) {
            StreamOutcome::Completed
        } else {
            StreamOutcome::Aborted
        };
        self.finish(outcome);
    }
}
