//! Per-request instrumentation.
//!
//! # Data Flow
//! ```text
//! inbound body  → stream.rs (InstrumentedStream, bytes + read time)  → upstream
//! upstream body → stream.rs (InstrumentedStream, bytes + read time)  → caller
//!
//! transport lifecycle events
//!     → trace.rs (ClientTrace, named phase slots)
//!     → phase.rs (PhaseTimer, durations since arrival)
//! ```
//!
//! # Design Decisions
//! - Counters are read through cloneable meters; the body itself is owned by the transport
//! - Phase hooks may fire from the client's connection task, so the timer is mutex guarded
//! - Throughput is derived on every read of the meter, never cached

pub mod phase;
pub mod stream;
pub mod trace;

pub use phase::{Phase, PhaseEntry, PhaseTimer};
pub use stream::{throughput, InstrumentedStream, StreamMeter, StreamOutcome};
pub use trace::ClientTrace;
