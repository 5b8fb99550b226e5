//! Connection trace hooks.
//!
//! A [`ClientTrace`] is the set of callbacks the outbound transport fires as a
//! request moves through its lifecycle: dialling (DNS, TCP, TLS), acquiring a
//! connection, writing the request and receiving the response head. Each
//! phase is a named slot; the recording trace appends one entry per slot to
//! the request's [`PhaseTimer`].
//!
//! The pooled client shares one connector between all requests, so the trace
//! reaches the connector through a task-local scope around the outbound call
//! rather than through the connector itself.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::instrument::phase::{Phase, PhaseTimer};

tokio::task_local! {
    static CURRENT: ClientTrace;
}

type Hook = dyn Fn(Phase) + Send + Sync;

/// Lifecycle callbacks attached to one outbound call.
#[derive(Clone)]
pub struct ClientTrace {
    hook: Arc<Hook>,
}

impl ClientTrace {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(Phase) + Send + Sync + 'static,
    {
        Self {
            hook: Arc::new(hook),
        }
    }

    /// A trace whose every slot records into `timer`.
    pub fn recording(timer: PhaseTimer) -> Self {
        Self::new(move |phase| {
            timer.record(phase);
        })
    }

    /// Fire the slot for `phase`.
    pub fn fire(&self, phase: Phase) {
        (self.hook)(phase);
    }

    /// The trace attached to the outbound call currently being polled, if any.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Run `fut` with this trace attached, so connectors polled inside it can
    /// find it through [`ClientTrace::current`].
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }
}

impl fmt::Debug for ClientTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTrace").finish_non_exhaustive()
    }
}

/// Fire `phase` on `trace` when one is attached.
pub(crate) fn fire(trace: Option<&ClientTrace>, phase: Phase) {
    if let Some(trace) = trace {
        trace.fire(phase);
    }
}
